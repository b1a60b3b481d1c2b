//! Model comparison.
//!
//! Every candidate is fitted on the same training rows and scored on the
//! same scoring rows by Pearson correlation between predicted and observed
//! values, with RMSE and MAE alongside. The report is ordered by score for
//! display; it does not declare a winner.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use zi_common::{Error, Result, StructuredError};

use crate::config::Settings;
use crate::data::ObservationSeries;
use crate::engine::{FitBudget, FittingEngine};
use crate::hurdle::composite::at_row;
use crate::hurdle::{FailurePolicy, HurdleModel, HurdleVariant};
use crate::logging::{event_names, LogContext, Stage};
use crate::tweedie::{self, TweedieFitter};

/// A model entered into the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateKind {
    Tweedie,
    HurdleLinear,
    HurdleSmooth,
    HurdleMixed,
}

impl CandidateKind {
    pub const ALL: [CandidateKind; 4] = [
        CandidateKind::Tweedie,
        CandidateKind::HurdleLinear,
        CandidateKind::HurdleSmooth,
        CandidateKind::HurdleMixed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CandidateKind::Tweedie => tweedie::MODEL_NAME,
            CandidateKind::HurdleLinear => HurdleVariant::Linear.model_name(),
            CandidateKind::HurdleSmooth => HurdleVariant::Smooth.model_name(),
            CandidateKind::HurdleMixed => HurdleVariant::Mixed.model_name(),
        }
    }

    pub fn hurdle_variant(&self) -> Option<HurdleVariant> {
        match self {
            CandidateKind::Tweedie => None,
            CandidateKind::HurdleLinear => Some(HurdleVariant::Linear),
            CandidateKind::HurdleSmooth => Some(HurdleVariant::Smooth),
            CandidateKind::HurdleMixed => Some(HurdleVariant::Mixed),
        }
    }
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for CandidateKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CandidateKind::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown candidate model: {}", s))
    }
}

/// Score of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub model_name: String,
    /// Pearson correlation; `None` when undefined (e.g. constant predictions).
    pub score: Option<f64>,
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
    /// Rows that contributed to the score.
    pub n: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl ComparisonRecord {
    fn failed(model_name: &str, err: &Error) -> Self {
        ComparisonRecord {
            model_name: model_name.to_string(),
            score: None,
            rmse: None,
            mae: None,
            n: 0,
            skipped: 0,
            error: Some(StructuredError::from(err)),
        }
    }

    fn scored(model_name: &str, predicted: &[f64], observed: &[f64], skipped: usize) -> Self {
        ComparisonRecord {
            model_name: model_name.to_string(),
            score: zi_math::pearson_correlation(predicted, observed),
            rmse: zi_math::rmse(predicted, observed),
            mae: zi_math::mae(predicted, observed),
            n: predicted.len(),
            skipped,
            error: None,
        }
    }
}

/// How rows were divided between fitting and scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationSplit {
    /// Fitted and scored on every row.
    Full { rows: usize },
    Holdout {
        fraction: f64,
        seed: u64,
        train_rows: usize,
        scoring_rows: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub split: EvaluationSplit,
    /// Ordered by score, descending; undefined scores last.
    pub records: Vec<ComparisonRecord>,
}

impl ComparisonReport {
    /// First candidate error, in candidate order.
    pub fn first_error(&self) -> Option<&StructuredError> {
        self.records.iter().find_map(|r| r.error.as_ref())
    }
}

/// Split `series` into training and scoring rows with a seeded shuffle.
///
/// Both halves keep time order. Needs at least one training row and two
/// scoring rows.
pub fn holdout_split(
    series: &ObservationSeries,
    fraction: f64,
    seed: u64,
) -> Result<(ObservationSeries, ObservationSeries)> {
    if !(0.0..1.0).contains(&fraction) || fraction == 0.0 {
        return Err(Error::Config(format!(
            "holdout fraction {} must be in (0, 1)",
            fraction
        )));
    }
    let n = series.len();
    let scoring = (n as f64 * fraction).round() as usize;
    if scoring < 2 || scoring >= n {
        return Err(Error::validation(
            None,
            format!(
                "holdout fraction {} of {} rows leaves {} training and {} scoring rows",
                fraction,
                n,
                n.saturating_sub(scoring),
                scoring
            ),
        ));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let (score_idx, train_idx) = indices.split_at(scoring);
    Ok((series.select(train_idx), series.select(score_idx)))
}

/// Sort records by score descending, undefined scores last.
///
/// Stable, so equal scores keep candidate order.
pub fn rank_records(records: &mut [ComparisonRecord]) {
    records.sort_by(|a, b| match (a.score, b.score) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// Fits and scores every configured candidate.
pub struct Comparator<'a> {
    engine: &'a dyn FittingEngine,
    settings: &'a Settings,
}

impl<'a> Comparator<'a> {
    pub fn new(engine: &'a dyn FittingEngine, settings: &'a Settings) -> Self {
        Comparator { engine, settings }
    }

    /// Run the comparison.
    ///
    /// A candidate that fails is recorded with its error and does not stop
    /// the others. Only a bad split fails the whole comparison.
    pub fn run(
        &self,
        series: &ObservationSeries,
        budget: FitBudget,
        log: &LogContext,
    ) -> Result<ComparisonReport> {
        let compare = &self.settings.compare;
        let (split, train, scoring) = if compare.holdout_fraction > 0.0 {
            let (train, scoring) = holdout_split(series, compare.holdout_fraction, compare.seed)?;
            let split = EvaluationSplit::Holdout {
                fraction: compare.holdout_fraction,
                seed: compare.seed,
                train_rows: train.len(),
                scoring_rows: scoring.len(),
            };
            (split, train, scoring)
        } else {
            let split = EvaluationSplit::Full { rows: series.len() };
            (split, series.clone(), series.clone())
        };

        let candidates = self.candidates(&train, log)?;
        let mut records = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let record = match self.evaluate(candidate, &train, &scoring, budget, log) {
                Ok(record) => record,
                Err(e) => {
                    crate::log_event!(
                        log,
                        WARN,
                        event_names::FIT_FAILED,
                        Stage::Compare,
                        "candidate failed",
                        model = candidate.name(),
                        code = u64::from(e.code()),
                        reason = e.to_string().as_str()
                    );
                    ComparisonRecord::failed(candidate.name(), &e)
                }
            };
            crate::log_event!(
                log,
                INFO,
                event_names::COMPARE_CANDIDATE,
                Stage::Compare,
                "candidate scored",
                model = candidate.name(),
                score = record.score.unwrap_or(f64::NAN),
                n = record.n as u64
            );
            records.push(record);
        }
        rank_records(&mut records);

        crate::log_event!(
            log,
            INFO,
            event_names::COMPARE_FINISHED,
            Stage::Compare,
            "comparison finished",
            candidates = records.len() as u64,
            failed = records.iter().filter(|r| r.error.is_some()).count() as u64
        );
        Ok(ComparisonReport { split, records })
    }

    /// Configured candidates, or every candidate whose covariates appear on
    /// every training row.
    fn candidates(&self, train: &ObservationSeries, log: &LogContext) -> Result<Vec<CandidateKind>> {
        if let Some(list) = &self.settings.compare.candidates {
            return Ok(list.clone());
        }
        let mut chosen = Vec::with_capacity(CandidateKind::ALL.len());
        for candidate in CandidateKind::ALL {
            let vars = self.settings.candidate_variables(candidate)?;
            let missing = vars
                .iter()
                .find(|v| train.rows().iter().any(|o| !o.covariates.contains_key(v.as_str())));
            match missing {
                Some(var) => crate::log_event!(
                    log,
                    INFO,
                    event_names::COMPARE_SKIPPED,
                    Stage::Compare,
                    "candidate left out: data lacks a covariate it reads",
                    model = candidate.name(),
                    covariate = var.as_str()
                ),
                None => chosen.push(candidate),
            }
        }
        Ok(chosen)
    }

    fn evaluate(
        &self,
        candidate: CandidateKind,
        train: &ObservationSeries,
        scoring: &ObservationSeries,
        budget: FitBudget,
        log: &LogContext,
    ) -> Result<ComparisonRecord> {
        let policy = self.settings.run.on_prediction_error;
        let mut predicted = Vec::with_capacity(scoring.len());
        let mut observed = Vec::with_capacity(scoring.len());
        let mut skipped = 0;

        match candidate.hurdle_variant() {
            Some(variant) => {
                let spec = self.settings.hurdle_spec(variant)?;
                let model = HurdleModel::fit(self.engine, train, &spec, budget, log)?;
                let batch = model.predictor(policy).predict_rows(scoring.rows(), log)?;
                for p in &batch.predictions {
                    predicted.push(p.expected);
                    observed.push(scoring.rows()[p.index].value);
                }
                skipped = batch.skipped.len();
            }
            None => {
                let formula = self.settings.tweedie_formula()?;
                let power = self.settings.tweedie.power_spec();
                let fit = TweedieFitter::new(self.engine).fit(train, &formula, &power, budget, log)?;
                for (index, obs) in scoring.rows().iter().enumerate() {
                    match fit.predict(&obs.covariates).map_err(|e| at_row(e, index)) {
                        Ok(mu) => {
                            predicted.push(mu);
                            observed.push(obs.value);
                        }
                        Err(Error::Prediction { .. }) if policy == FailurePolicy::Skip => skipped += 1,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(ComparisonRecord::scored(candidate.name(), &predicted, &observed, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{build_series, CovariateValue, Observation};
    use crate::engine::IrlsEngine;

    fn record(name: &str, score: Option<f64>) -> ComparisonRecord {
        ComparisonRecord {
            model_name: name.to_string(),
            score,
            rmse: None,
            mae: None,
            n: 0,
            skipped: 0,
            error: None,
        }
    }

    fn series(n: usize) -> ObservationSeries {
        build_series(
            (0..n)
                .map(|i| {
                    let v = if i % 3 == 0 { 0.0 } else { 1.0 + (i % 5) as f64 };
                    Observation::new(i as i64, v).with("time", CovariateValue::Numeric(i as f64))
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn ranking_puts_undefined_last_and_is_stable() {
        let mut records = vec![
            record("a", None),
            record("b", Some(0.2)),
            record("c", Some(0.9)),
            record("d", None),
            record("e", Some(0.2)),
        ];
        rank_records(&mut records);
        let names: Vec<_> = records.iter().map(|r| r.model_name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "e", "a", "d"]);
    }

    #[test]
    fn holdout_is_seeded_and_disjoint() {
        let s = series(20);
        let (train_a, score_a) = holdout_split(&s, 0.25, 42).unwrap();
        let (train_b, score_b) = holdout_split(&s, 0.25, 42).unwrap();
        assert_eq!(score_a.len(), 5);
        assert_eq!(train_a.len(), 15);
        let times = |s: &ObservationSeries| s.rows().iter().map(|o| o.time_index).collect::<Vec<_>>();
        assert_eq!(times(&score_a), times(&score_b));
        assert_eq!(times(&train_a), times(&train_b));
        for t in times(&score_a) {
            assert!(!times(&train_a).contains(&t));
        }
        assert!(times(&score_a).windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn holdout_too_small_is_validation_error() {
        let s = series(4);
        assert!(matches!(holdout_split(&s, 0.2, 1), Err(Error::Validation { .. })));
        assert!(matches!(holdout_split(&s, 0.0, 1), Err(Error::Config(_))));
    }

    #[test]
    fn candidate_names_round_trip_through_serde() {
        for c in CandidateKind::ALL {
            assert_eq!(c.name().parse::<CandidateKind>(), Ok(c));
            let json = serde_json::to_string(&c).unwrap();
            assert_eq!(json, format!("\"{}\"", c.name()));
        }
    }

    #[test]
    fn failing_candidate_is_recorded_not_fatal() {
        let mut settings = Settings::default();
        settings.compare.candidates = Some(vec![CandidateKind::HurdleLinear, CandidateKind::HurdleMixed]);
        let engine = IrlsEngine::default();
        let report = Comparator::new(&engine, &settings)
            .run(&series(12), FitBudget::unlimited(), &LogContext::detached())
            .unwrap();

        assert_eq!(report.split, EvaluationSplit::Full { rows: 12 });
        assert_eq!(report.records.len(), 2);
        let linear = report.records.iter().find(|r| r.model_name == "hurdle-linear").unwrap();
        assert!(linear.error.is_none());
        assert_eq!(linear.n, 12);
        assert!(linear.rmse.is_some());

        // No `group` column, so the random-intercept variant cannot build its design.
        let mixed = report.records.iter().find(|r| r.model_name == "hurdle-mixed").unwrap();
        assert!(mixed.error.is_some());
        assert_eq!(mixed.score, None);
        assert_eq!(report.records.last().map(|r| r.model_name.as_str()), Some("hurdle-mixed"));
        assert!(report.first_error().is_some());
    }

    #[test]
    fn default_candidates_follow_available_covariates() {
        let settings = Settings::default();
        let engine = IrlsEngine::default();
        let log = LogContext::detached();
        let comparator = Comparator::new(&engine, &settings);

        let plain = series(30);
        assert_eq!(
            comparator.candidates(&plain, &log).unwrap(),
            vec![CandidateKind::Tweedie, CandidateKind::HurdleLinear, CandidateKind::HurdleSmooth]
        );
        let report = comparator.run(&plain, FitBudget::unlimited(), &log).unwrap();
        assert_eq!(report.records.len(), 3);
        assert!(report.first_error().is_none(), "{:?}", report.first_error());

        let grouped = build_series(
            plain
                .rows()
                .iter()
                .map(|o| {
                    let g = if o.time_index % 2 == 0 { "north" } else { "south" };
                    o.clone().with("group", CovariateValue::Categorical(g.into()))
                })
                .collect(),
        )
        .unwrap();
        assert_eq!(comparator.candidates(&grouped, &log).unwrap(), CandidateKind::ALL.to_vec());
    }
}
