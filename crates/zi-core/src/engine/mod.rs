//! Statistical fitting engine.
//!
//! The pipeline talks to the engine only through [`FittingEngine`] and the
//! [`FittedSubModel`] objects it returns, so the built-in [`IrlsEngine`] can
//! be swapped for another backend without touching the hurdle, Tweedie or
//! comparison logic.

pub mod design;
pub mod family;
pub mod formula;
pub mod irls;

pub use design::{DesignSpec, PenaltyBlock};
pub use family::{BinomialLink, Family};
pub use formula::{FormulaError, ModelFormula, PredictorKind, Term};
pub use irls::{IrlsEngine, IrlsModel, IrlsOptions};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use zi_common::{Error, Result};

use crate::data::{Covariates, Observation};
use crate::logging::LogContext;

/// Wall-clock budget shared by every fit in a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitBudget {
    deadline: Option<Instant>,
    seconds: Option<f64>,
}

impl FitBudget {
    pub fn unlimited() -> Self {
        FitBudget {
            deadline: None,
            seconds: None,
        }
    }

    /// Budget starting now.
    ///
    /// Non-positive or non-finite values mean unlimited, and so does a
    /// deadline too far away for the platform clock to represent.
    pub fn from_seconds(seconds: Option<f64>) -> Self {
        let Some(s) = seconds.filter(|s| s.is_finite() && *s > 0.0) else {
            return FitBudget::unlimited();
        };
        let deadline = Duration::try_from_secs_f64(s)
            .ok()
            .and_then(|d| Instant::now().checked_add(d));
        match deadline {
            Some(deadline) => FitBudget {
                deadline: Some(deadline),
                seconds: Some(s),
            },
            None => FitBudget::unlimited(),
        }
    }

    pub fn seconds(&self) -> Option<f64> {
        self.seconds
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with `FitTimeout` once the deadline has passed.
    pub fn check(&self, model: &str) -> Result<()> {
        if self.is_expired() {
            return Err(Error::FitTimeout {
                model: model.to_string(),
                seconds: self.seconds.unwrap_or(0.0),
            });
        }
        Ok(())
    }
}

impl Default for FitBudget {
    fn default() -> Self {
        FitBudget::unlimited()
    }
}

/// Everything the engine needs for one fit.
#[derive(Debug, Clone, Copy)]
pub struct FitRequest<'a> {
    /// Name used in errors and logs, e.g. `hurdle-smooth/presence`.
    pub model_name: &'a str,
    pub formula: &'a ModelFormula,
    pub family: Family,
    pub rows: &'a [Observation],
    /// One response per row.
    pub response: &'a [f64],
    pub budget: FitBudget,
    pub log: &'a LogContext,
}

/// Result of a successful engine fit.
#[derive(Debug)]
pub struct EngineFit {
    pub model: Box<dyn FittedSubModel>,
    /// Fitted means for the training rows, in request order.
    pub fitted_values: Vec<f64>,
}

/// A backend that fits GLMs described by a formula and a family.
pub trait FittingEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&self, request: &FitRequest<'_>) -> Result<EngineFit>;
}

/// A fitted model that maps covariates to a mean on the response scale.
pub trait FittedSubModel: Send + Sync + fmt::Debug {
    fn predict(&self, covariates: &Covariates) -> Result<f64>;

    fn summary(&self) -> &ModelSummary;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingParam {
    pub term: String,
    pub lambda: f64,
}

/// Serializable description of a fitted sub-model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub family: String,
    pub link: String,
    pub formula: String,
    pub coefficients: Vec<Coefficient>,
    pub deviance: f64,
    /// Effective degrees of freedom.
    pub edf: f64,
    pub dispersion: f64,
    pub iterations: usize,
    pub converged: bool,
    pub n: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub smoothing: Vec<SmoothingParam>,
    /// Terms dropped because their covariate was constant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliased: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_from_seconds() {
        assert_eq!(FitBudget::from_seconds(None), FitBudget::unlimited());
        assert_eq!(FitBudget::from_seconds(Some(0.0)), FitBudget::unlimited());
        assert_eq!(FitBudget::from_seconds(Some(f64::NAN)), FitBudget::unlimited());
        let b = FitBudget::from_seconds(Some(60.0));
        assert_eq!(b.seconds(), Some(60.0));
        assert!(!b.is_expired());
        assert!(b.check("m").is_ok());
    }

    #[test]
    fn huge_budgets_are_unlimited() {
        for s in [1e30, f64::MAX, u64::MAX as f64] {
            let b = FitBudget::from_seconds(Some(s));
            assert_eq!(b, FitBudget::unlimited(), "{} seconds", s);
            assert!(b.check("m").is_ok());
        }
        assert_eq!(FitBudget::from_seconds(Some(f64::INFINITY)), FitBudget::unlimited());
    }

    #[test]
    fn expired_budget_times_out() {
        let b = FitBudget::from_seconds(Some(1e-9));
        std::thread::sleep(Duration::from_millis(2));
        match b.check("tweedie") {
            Err(Error::FitTimeout { model, seconds }) => {
                assert_eq!(model, "tweedie");
                assert_eq!(seconds, 1e-9);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
