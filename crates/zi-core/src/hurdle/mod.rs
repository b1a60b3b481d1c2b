//! Two-part hurdle model.
//!
//! A hurdle model multiplies a presence probability (binomial GLM on every
//! row) by a positive magnitude (Gamma GLM on present rows). The variant only
//! changes the formulas handed to the engine; fitting and prediction are the
//! same for every variant.

pub mod composite;
pub mod magnitude;
pub mod presence;

pub use composite::{
    CompositePrediction, CompositePredictor, FailurePolicy, PredictionBatch, SkippedRow,
};
pub use magnitude::MagnitudeFitter;
pub use presence::PresenceFitter;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;

use zi_common::{Error, Result};

use crate::data::ObservationSeries;
use crate::engine::{
    BinomialLink, EngineFit, FitBudget, FittedSubModel, FittingEngine, ModelFormula,
    ModelSummary,
};
use crate::logging::LogContext;

/// Predictor family used by both parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HurdleVariant {
    /// Linear and factor terms.
    Linear,
    /// Penalized spline terms.
    Smooth,
    /// Random group intercepts.
    Mixed,
}

impl HurdleVariant {
    pub const ALL: [HurdleVariant; 3] = [HurdleVariant::Linear, HurdleVariant::Smooth, HurdleVariant::Mixed];

    /// Model name used in reports and logs.
    pub fn model_name(&self) -> &'static str {
        match self {
            HurdleVariant::Linear => "hurdle-linear",
            HurdleVariant::Smooth => "hurdle-smooth",
            HurdleVariant::Mixed => "hurdle-mixed",
        }
    }
}

impl fmt::Display for HurdleVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HurdleVariant::Linear => write!(f, "linear"),
            HurdleVariant::Smooth => write!(f, "smooth"),
            HurdleVariant::Mixed => write!(f, "mixed"),
        }
    }
}

/// Name the sub-model in a training-row validation error and point its row
/// at the fitted series. `series_row` maps a training row to its series index.
pub(crate) fn attribute_error(err: Error, model: &str, series_row: impl Fn(usize) -> usize) -> Error {
    match err {
        Error::Validation { row, message } => Error::Validation {
            row: row.map(series_row),
            message: format!("{}: {}", model, message),
        },
        other => other,
    }
}

/// Everything needed to fit one hurdle model.
#[derive(Debug, Clone, PartialEq)]
pub struct HurdleSpec {
    pub variant: HurdleVariant,
    pub presence_formula: ModelFormula,
    pub magnitude_formula: ModelFormula,
    pub link: BinomialLink,
    /// Minimum number of present rows for the magnitude fit.
    pub min_present_rows: usize,
    /// Fit the two parts on separate threads.
    pub parallel: bool,
}

/// Serializable view of a fitted hurdle model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HurdleSummary {
    pub model: String,
    pub variant: HurdleVariant,
    pub rows: usize,
    pub present_rows: usize,
    pub presence: ModelSummary,
    pub magnitude: ModelSummary,
}

/// A fitted presence/magnitude pair.
#[derive(Debug)]
pub struct HurdleModel {
    variant: HurdleVariant,
    rows: usize,
    present_rows: usize,
    presence: Box<dyn FittedSubModel>,
    magnitude: Box<dyn FittedSubModel>,
}

impl HurdleModel {
    /// Fit both parts on `series`.
    ///
    /// The parts share no state, so with `spec.parallel` they run on two
    /// scoped threads. When both fail, the presence error is reported.
    pub fn fit(
        engine: &dyn FittingEngine,
        series: &ObservationSeries,
        spec: &HurdleSpec,
        budget: FitBudget,
        log: &LogContext,
    ) -> Result<HurdleModel> {
        let name = spec.variant.model_name();
        let presence_name = format!("{}/presence", name);
        let magnitude_name = format!("{}/magnitude", name);
        let presence_fitter = PresenceFitter::new(engine, spec.link);
        let magnitude_fitter = MagnitudeFitter::new(engine, spec.min_present_rows);

        let fit_presence =
            || presence_fitter.fit(&presence_name, series, &spec.presence_formula, budget, log);
        let fit_magnitude =
            || magnitude_fitter.fit(&magnitude_name, series, &spec.magnitude_formula, budget, log);

        let (presence, magnitude): (Result<EngineFit>, Result<EngineFit>) = if spec.parallel {
            thread::scope(|s| {
                let handle = s.spawn(fit_presence);
                let magnitude = fit_magnitude();
                let presence = handle.join().unwrap_or_else(|_| {
                    tracing::error!("presence fit thread panicked");
                    Err(Error::fit_failure(presence_name.as_str(), "fit thread panicked"))
                });
                (presence, magnitude)
            })
        } else {
            let presence = fit_presence()?;
            (Ok(presence), fit_magnitude())
        };

        Ok(HurdleModel {
            variant: spec.variant,
            rows: series.len(),
            present_rows: series.present_count(),
            presence: presence?.model,
            magnitude: magnitude?.model,
        })
    }

    pub fn variant(&self) -> HurdleVariant {
        self.variant
    }

    pub fn name(&self) -> &'static str {
        self.variant.model_name()
    }

    pub fn presence(&self) -> &dyn FittedSubModel {
        self.presence.as_ref()
    }

    pub fn magnitude(&self) -> &dyn FittedSubModel {
        self.magnitude.as_ref()
    }

    pub fn predictor(&self, policy: FailurePolicy) -> CompositePredictor<'_> {
        CompositePredictor::new(self.name(), self.presence(), self.magnitude(), policy)
    }

    pub fn summary(&self) -> HurdleSummary {
        HurdleSummary {
            model: self.name().to_string(),
            variant: self.variant,
            rows: self.rows,
            present_rows: self.present_rows,
            presence: self.presence.summary().clone(),
            magnitude: self.magnitude.summary().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{build_series, CovariateValue, Observation};
    use crate::engine::IrlsEngine;

    fn scenario_a() -> ObservationSeries {
        build_series(
            [0.0, 0.0, 5.2, 0.0, 3.1]
                .iter()
                .enumerate()
                .map(|(i, &v)| Observation::new(i as i64, v).with("site", CovariateValue::Numeric(1.0)))
                .collect(),
        )
        .unwrap()
    }

    fn spec(parallel: bool) -> HurdleSpec {
        HurdleSpec {
            variant: HurdleVariant::Linear,
            presence_formula: ModelFormula::parse("site").unwrap(),
            magnitude_formula: ModelFormula::parse("site").unwrap(),
            link: BinomialLink::Logit,
            min_present_rows: 1,
            parallel,
        }
    }

    #[test]
    fn sequential_and_parallel_fits_agree() {
        let engine = IrlsEngine::default();
        let series = scenario_a();
        let log = LogContext::detached();
        let a = HurdleModel::fit(&engine, &series, &spec(false), FitBudget::unlimited(), &log).unwrap();
        let b = HurdleModel::fit(&engine, &series, &spec(true), FitBudget::unlimited(), &log).unwrap();
        assert_eq!(a.summary(), b.summary());

        let batch = a
            .predictor(FailurePolicy::Abort)
            .predict_rows(series.rows(), &log)
            .unwrap();
        for p in &batch.predictions {
            assert!((p.presence_probability - 0.4).abs() < 1e-8);
            assert!((p.magnitude - 4.15).abs() < 1e-8);
            assert!((p.expected - 1.66).abs() < 1e-8);
        }
    }

    #[test]
    fn magnitude_failure_surfaces_in_both_modes() {
        let engine = IrlsEngine::default();
        let series = build_series((0..4).map(|i| Observation::new(i, 0.0)).collect()).unwrap();
        for parallel in [false, true] {
            let mut s = spec(parallel);
            s.presence_formula = ModelFormula::intercept_only();
            s.magnitude_formula = ModelFormula::intercept_only();
            let err = HurdleModel::fit(&engine, &series, &s, FitBudget::unlimited(), &LogContext::detached())
                .unwrap_err();
            match err {
                Error::FitFailure { model, .. } => assert_eq!(model, "hurdle-linear/magnitude"),
                other => panic!("expected magnitude failure, got {:?}", other),
            }
        }
    }

    #[test]
    fn variant_names() {
        assert_eq!(HurdleVariant::Smooth.model_name(), "hurdle-smooth");
        assert_eq!(HurdleVariant::Mixed.to_string(), "mixed");
        assert_eq!(HurdleVariant::ALL.len(), 3);
    }
}
