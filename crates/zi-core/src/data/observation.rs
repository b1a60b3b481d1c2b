//! The observation model shared by every pipeline stage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single covariate cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CovariateValue {
    Numeric(f64),
    Categorical(String),
}

impl CovariateValue {
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            CovariateValue::Numeric(v) => Some(*v),
            CovariateValue::Categorical(_) => None,
        }
    }

    /// Level key used by factor and group terms; numeric cells are keyed by
    /// their display form so integer-coded groups work.
    pub fn level_key(&self) -> String {
        match self {
            CovariateValue::Numeric(v) => v.to_string(),
            CovariateValue::Categorical(s) => s.clone(),
        }
    }
}

impl fmt::Display for CovariateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovariateValue::Numeric(v) => write!(f, "{}", v),
            CovariateValue::Categorical(s) => write!(f, "{}", s),
        }
    }
}

/// Named covariates of one observation.
pub type Covariates = BTreeMap<String, CovariateValue>;

/// One measurement in the series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Integer time index (year, period number, ...).
    pub time_index: i64,
    pub covariates: Covariates,
    /// Measured non-negative quantity; zero means absent.
    pub value: f64,
}

impl Observation {
    pub fn new(time_index: i64, value: f64) -> Self {
        Observation {
            time_index,
            covariates: Covariates::new(),
            value,
        }
    }

    /// Builder-style covariate insertion.
    pub fn with(mut self, name: impl Into<String>, value: CovariateValue) -> Self {
        self.covariates.insert(name.into(), value);
        self
    }

    /// Presence label: true iff the value is strictly positive.
    pub fn is_present(&self) -> bool {
        self.value > 0.0
    }
}

/// Validated, time-ordered, immutable observation sequence.
///
/// Only [`build_series`](super::build_series) constructs one from raw input,
/// so every series in the pipeline has finite, non-negative values. Derived
/// series (present rows, train/holdout splits) share no mutable state with
/// their parent.
#[derive(Debug, Clone)]
pub struct ObservationSeries {
    rows: Arc<[Observation]>,
}

impl ObservationSeries {
    pub(crate) fn from_validated(rows: Vec<Observation>) -> Self {
        ObservationSeries { rows: rows.into() }
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.rows.iter().map(|o| o.value).collect()
    }

    /// 1.0 for present rows, 0.0 otherwise.
    pub fn presence_labels(&self) -> Vec<f64> {
        self.rows
            .iter()
            .map(|o| if o.is_present() { 1.0 } else { 0.0 })
            .collect()
    }

    pub fn present_count(&self) -> usize {
        self.rows.iter().filter(|o| o.is_present()).count()
    }

    /// New series holding only rows with `value > 0`.
    pub fn present_only(&self) -> ObservationSeries {
        let rows: Vec<Observation> = self.rows.iter().filter(|o| o.is_present()).cloned().collect();
        ObservationSeries::from_validated(rows)
    }

    /// New series holding the rows at `indices`, kept in series order.
    pub fn select(&self, indices: &[usize]) -> ObservationSeries {
        let mut sorted: Vec<usize> = indices.iter().copied().filter(|&i| i < self.len()).collect();
        sorted.sort_unstable();
        sorted.dedup();
        ObservationSeries::from_validated(sorted.into_iter().map(|i| self.rows[i].clone()).collect())
    }
}
