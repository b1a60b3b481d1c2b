//! Composite prediction: presence probability times positive magnitude.

use serde::{Deserialize, Serialize};
use std::fmt;

use zi_common::{Error, Result, StructuredError};

use crate::data::Observation;
use crate::engine::FittedSubModel;
use crate::logging::{event_names, LogContext, Stage};

/// What to do when a row cannot be predicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the batch at the first failing row.
    #[default]
    Abort,
    /// Record the row as skipped and continue.
    Skip,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "skip" => Ok(FailurePolicy::Skip),
            _ => Err(format!("unknown failure policy: {} (expected abort or skip)", s)),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::Skip => write!(f, "skip"),
        }
    }
}

/// Prediction for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositePrediction {
    /// Position of the row in the predicted series.
    pub index: usize,
    pub time_index: i64,
    pub presence_probability: f64,
    /// Expected value given presence.
    pub magnitude: f64,
    /// `presence_probability * magnitude`.
    pub expected: f64,
}

/// A row left out of a batch under [`FailurePolicy::Skip`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub index: usize,
    pub time_index: i64,
    pub error: StructuredError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionBatch {
    pub predictions: Vec<CompositePrediction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedRow>,
}

/// Combines a fitted presence model and a fitted magnitude model.
///
/// Holding both borrows is what makes a composite prediction possible; there
/// is no way to build one from a half-fitted hurdle.
pub struct CompositePredictor<'m> {
    model_name: &'m str,
    presence: &'m dyn FittedSubModel,
    magnitude: &'m dyn FittedSubModel,
    policy: FailurePolicy,
}

impl<'m> CompositePredictor<'m> {
    pub fn new(
        model_name: &'m str,
        presence: &'m dyn FittedSubModel,
        magnitude: &'m dyn FittedSubModel,
        policy: FailurePolicy,
    ) -> Self {
        CompositePredictor {
            model_name,
            presence,
            magnitude,
            policy,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Predict one row; prediction errors carry `index` as their row.
    pub fn predict_one(&self, index: usize, obs: &Observation) -> Result<CompositePrediction> {
        let presence_probability = self
            .presence
            .predict(&obs.covariates)
            .map_err(|e| at_row(e, index))?;
        let magnitude = self
            .magnitude
            .predict(&obs.covariates)
            .map_err(|e| at_row(e, index))?;
        Ok(CompositePrediction {
            index,
            time_index: obs.time_index,
            presence_probability,
            magnitude,
            expected: presence_probability * magnitude,
        })
    }

    /// Predict every row, applying the failure policy.
    pub fn predict_rows(&self, rows: &[Observation], log: &LogContext) -> Result<PredictionBatch> {
        let mut batch = PredictionBatch::default();
        for (index, obs) in rows.iter().enumerate() {
            match self.predict_one(index, obs) {
                Ok(p) => batch.predictions.push(p),
                Err(e @ Error::Prediction { .. }) if self.policy == FailurePolicy::Skip => {
                    crate::log_event!(
                        log,
                        WARN,
                        event_names::PREDICT_ROW_SKIPPED,
                        Stage::Predict,
                        "row skipped",
                        model = self.model_name,
                        row = index as u64,
                        reason = e.to_string().as_str()
                    );
                    batch.skipped.push(SkippedRow {
                        index,
                        time_index: obs.time_index,
                        error: StructuredError::from(&e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        crate::log_event!(
            log,
            INFO,
            event_names::PREDICT_FINISHED,
            Stage::Predict,
            "composite predictions computed",
            model = self.model_name,
            predicted = batch.predictions.len() as u64,
            skipped = batch.skipped.len() as u64
        );
        Ok(batch)
    }
}

/// Attach a row index to a prediction error.
pub(crate) fn at_row(err: Error, index: usize) -> Error {
    match err {
        Error::Prediction { model, reason, .. } => Error::Prediction {
            model,
            row: Some(index),
            reason,
        },
        other => other,
    }
}
