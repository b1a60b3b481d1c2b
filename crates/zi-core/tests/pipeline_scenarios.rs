//! End-to-end pipeline scenarios: CSV in, fitted models and predictions out.

use std::io::Write;

use tempfile::NamedTempFile;
use zi_common::Error;
use zi_core::config::ResolvedConfig;
use zi_core::data::{build_series, Observation};
use zi_core::engine::{FitBudget, IrlsEngine, ModelFormula};
use zi_core::hurdle::{HurdleVariant, PresenceFitter};
use zi_core::engine::BinomialLink;
use zi_core::logging::LogContext;
use zi_core::pipeline::Pipeline;

fn csv(content: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().expect("temp file");
    f.write_all(content.as_bytes()).expect("write csv");
    f
}

/// Defaults, with the linear variant using the constant `site` column.
fn site_config() -> ResolvedConfig {
    let mut config = ResolvedConfig::defaults();
    config.settings.variants.linear.presence = "site".into();
    config.settings.variants.linear.magnitude = "site".into();
    config
}

// ============================================================================
// Scenario A: mixed zeros and positives, constant covariate
// ============================================================================

#[test]
fn scenario_a_constant_covariate_recovers_rates() {
    let pipeline = Pipeline::new(site_config());
    let f = csv("time,value,site\n1,0,1\n2,0,1\n3,5.2,1\n4,0,1\n5,3.1,1\n");
    let series = pipeline.load(f.path()).unwrap();
    assert_eq!(series.present_count(), 2);

    let run = pipeline.run_hurdle(&series, HurdleVariant::Linear).unwrap();
    assert_eq!(run.summary.presence.aliased, vec!["site".to_string()]);
    assert_eq!(run.summary.magnitude.n, 2);
    for p in &run.batch.predictions {
        assert!((p.presence_probability - 0.4).abs() < 1e-6);
        assert!((p.magnitude - 4.15).abs() < 1e-6);
        assert!((p.expected - 0.4 * 4.15).abs() < 1e-6);
    }
}

// ============================================================================
// Scenario B: all zeros
// ============================================================================

#[test]
fn scenario_b_all_zeros_fails_magnitude_fit() {
    let pipeline = Pipeline::new(site_config());
    let f = csv("time,value,site\n1,0,1\n2,0,1\n3,0,1\n4,0,1\n");
    let series = pipeline.load(f.path()).unwrap();

    match pipeline.run_hurdle(&series, HurdleVariant::Linear) {
        Err(Error::FitFailure { model, .. }) => assert_eq!(model, "hurdle-linear/magnitude"),
        other => panic!("expected magnitude fit failure, got {:?}", other.map(|r| r.summary)),
    }
}

#[test]
fn scenario_b_presence_alone_fits_near_zero() {
    let series = build_series((0..4).map(|i| Observation::new(i, 0.0)).collect()).unwrap();
    let engine = IrlsEngine::default();
    let fit = PresenceFitter::new(&engine, BinomialLink::Logit)
        .fit(
            "presence",
            &series,
            &ModelFormula::intercept_only(),
            FitBudget::unlimited(),
            &LogContext::detached(),
        )
        .unwrap();
    assert!(fit.fitted_values.iter().all(|&p| (0.0..1e-6).contains(&p)));
}

// ============================================================================
// Scenario C: negative value
// ============================================================================

#[test]
fn scenario_c_negative_value_rejected_before_fitting() {
    let pipeline = Pipeline::new(ResolvedConfig::defaults());
    let f = csv("time,value\n1,0\n2,2.5\n3,-1.0\n4,1.0\n");
    match pipeline.load(f.path()) {
        Err(Error::Validation { row, message }) => {
            assert_eq!(row, Some(2));
            assert!(message.contains("-1"));
        }
        other => panic!("expected validation error, got {:?}", other.map(|s| s.len())),
    }
}

// ============================================================================
// Tweedie and comparison
// ============================================================================

const TREND: &str = "time,value\n\
1,0\n2,1.2\n3,0\n4,2.1\n5,0\n6,3.4\n7,2.2\n8,0\n9,4.8\n10,3.9\n11,0\n12,5.5\n";

#[test]
fn tweedie_profile_is_deterministic() {
    let f = csv(TREND);
    let a = {
        let pipeline = Pipeline::new(ResolvedConfig::defaults());
        let series = pipeline.load(f.path()).unwrap();
        pipeline.run_tweedie(&series, None).unwrap()
    };
    let b = {
        let pipeline = Pipeline::new(ResolvedConfig::defaults());
        let series = pipeline.load(f.path()).unwrap();
        pipeline.run_tweedie(&series, None).unwrap()
    };
    assert_eq!(a.summary.power, b.summary.power);
    assert_eq!(a.summary.log_likelihood, b.summary.log_likelihood);
    assert_eq!(a.summary.profile, b.summary.profile);
    assert!(a.summary.profiled);
    assert_eq!(a.summary.profile.len(), 11);
    // Zeros make the Gamma endpoint undefined.
    let last = a.summary.profile.last().unwrap();
    assert_eq!(last.power, 2.0);
    assert!(last.log_likelihood.is_none());
}

#[test]
fn comparison_scores_every_candidate() {
    let mut config = ResolvedConfig::defaults();
    config.settings.compare.candidates = Some(vec![
        zi_core::compare::CandidateKind::Tweedie,
        zi_core::compare::CandidateKind::HurdleLinear,
    ]);
    let pipeline = Pipeline::new(config);
    let f = csv(TREND);
    let series = pipeline.load(f.path()).unwrap();
    let report = pipeline.run_compare(&series).unwrap();

    assert_eq!(report.records.len(), 2);
    for r in &report.records {
        assert!(r.error.is_none(), "{} failed: {:?}", r.model_name, r.error);
        assert_eq!(r.n, 12);
        assert!(r.rmse.unwrap() >= 0.0);
        let score = r.score.unwrap();
        assert!((-1.0..=1.0).contains(&score));
    }
    let scores: Vec<f64> = report.records.iter().map(|r| r.score.unwrap()).collect();
    assert!(scores[0] >= scores[1]);
}

#[test]
fn holdout_comparison_scores_only_heldout_rows() {
    let mut config = ResolvedConfig::defaults();
    config.settings.compare.candidates = Some(vec![zi_core::compare::CandidateKind::Tweedie]);
    config.settings.compare.holdout_fraction = 0.25;
    let pipeline = Pipeline::new(config);
    let f = csv(TREND);
    let series = pipeline.load(f.path()).unwrap();
    let report = pipeline.run_compare(&series).unwrap();
    assert_eq!(
        report.split,
        zi_core::compare::EvaluationSplit::Holdout {
            fraction: 0.25,
            seed: 42,
            train_rows: 9,
            scoring_rows: 3,
        }
    );
    assert_eq!(report.records[0].n, 3);
}

// ============================================================================
// Smooth and random-intercept variants on zero-edged data
// ============================================================================

/// Twenty periods in three groups; the first two and last two are zero.
const EDGE_ZEROS: &str = "time,value,group\n\
1,0,north\n2,0,south\n3,1.2,east\n4,2.5,north\n5,0,south\n6,3.1,east\n7,2.2,north\n\
8,0,south\n9,4.0,east\n10,3.6,north\n11,2.9,south\n12,0,east\n13,4.4,north\n14,3.3,south\n\
15,0,east\n16,2.1,north\n17,1.5,south\n18,0.8,east\n19,0,north\n20,0,south\n";

#[test]
fn smooth_variant_predicts_zero_edged_series() {
    let pipeline = Pipeline::new(ResolvedConfig::defaults());
    let f = csv(EDGE_ZEROS);
    let series = pipeline.load(f.path()).unwrap();

    let run = pipeline.run_hurdle(&series, HurdleVariant::Smooth).unwrap();
    assert_eq!(run.batch.predictions.len(), 20);
    assert!(run.batch.skipped.is_empty());
    assert_eq!(run.summary.magnitude.n, 12);
    assert_eq!(run.summary.magnitude.smoothing.len(), 1);
    // Time 1, 2, 19 and 20 lie outside the magnitude model's training times.
    for i in [0, 1, 18, 19] {
        let p = &run.batch.predictions[i];
        assert!(p.magnitude.is_finite() && p.magnitude > 0.0, "row {}: {:?}", i, p);
        assert!((0.0..=1.0).contains(&p.presence_probability));
    }
    for p in &run.batch.predictions {
        assert!(p.expected >= 0.0 && p.expected.is_finite());
    }
}

#[test]
fn mixed_variant_fits_group_intercepts() {
    let pipeline = Pipeline::new(ResolvedConfig::defaults());
    let f = csv(EDGE_ZEROS);
    let series = pipeline.load(f.path()).unwrap();

    let run = pipeline.run_hurdle(&series, HurdleVariant::Mixed).unwrap();
    assert_eq!(run.batch.predictions.len(), 20);
    let names: Vec<&str> = run
        .summary
        .presence
        .coefficients
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec!["(Intercept)", "time", "re(group)east", "re(group)north", "re(group)south"]
    );
    assert_eq!(run.summary.magnitude.smoothing[0].term, "re(group)");
    assert!(run.batch.predictions.iter().all(|p| p.expected >= 0.0));
}

#[test]
fn default_comparison_runs_every_applicable_candidate() {
    let pipeline = Pipeline::new(ResolvedConfig::defaults());

    let grouped = csv(EDGE_ZEROS);
    let report = pipeline.run_compare(&pipeline.load(grouped.path()).unwrap()).unwrap();
    assert_eq!(report.records.len(), 4);
    assert!(report.first_error().is_none(), "{:?}", report.first_error());

    // Without a `group` column the random-intercept candidate is left out.
    let plain = csv(&EDGE_ZEROS
        .lines()
        .map(|l| l.rsplit_once(',').map_or(l, |(head, _)| head))
        .collect::<Vec<_>>()
        .join("\n"));
    let report = pipeline.run_compare(&pipeline.load(plain.path()).unwrap()).unwrap();
    let mut names: Vec<&str> = report.records.iter().map(|r| r.model_name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["hurdle-linear", "hurdle-smooth", "tweedie"]);
    assert!(report.first_error().is_none(), "{:?}", report.first_error());
}

