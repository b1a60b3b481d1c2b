//! End-to-end runs: load, fit, predict, compare.
//!
//! A [`Pipeline`] owns the resolved configuration, the fitting engine and
//! the run's log context. Each `run_*` method starts a fresh wall-clock
//! budget that covers every fit of that command.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;

use zi_common::{Error, Result, RunId};

use crate::compare::{Comparator, ComparisonReport};
use crate::config::{ConfigSnapshot, ResolvedConfig, Settings};
use crate::data::{build_series, load_csv, ObservationSeries};
use crate::engine::{FitBudget, IrlsEngine};
use crate::hurdle::composite::at_row;
use crate::hurdle::{FailurePolicy, HurdleModel, HurdleSummary, HurdleVariant, PredictionBatch, SkippedRow};
use crate::logging::{event_names, LogContext, Stage};
use crate::tweedie::{PowerSpec, TweedieFitter, TweedieSummary};
use zi_common::StructuredError;

/// Version of the JSON output schema.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Envelope around every command payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput<T> {
    pub schema_version: String,
    pub run_id: String,
    pub generated_at: String,
    pub command: String,
    pub config: ConfigSnapshot,
    pub result: T,
}

/// Hurdle fit plus composite predictions for every row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HurdleRun {
    pub summary: HurdleSummary,
    #[serde(flatten)]
    pub batch: PredictionBatch,
}

/// Fitted mean of the Tweedie model for one row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TweediePrediction {
    pub index: usize,
    pub time_index: i64,
    pub observed: f64,
    pub expected: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweedieRun {
    pub summary: TweedieSummary,
    pub predictions: Vec<TweediePrediction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedRow>,
}

pub struct Pipeline {
    config: ResolvedConfig,
    engine: IrlsEngine,
    run_id: RunId,
    log: LogContext,
    timeout_seconds: Option<f64>,
}

impl Pipeline {
    pub fn new(config: ResolvedConfig) -> Self {
        let run_id = RunId::new();
        let log = LogContext::new(run_id.as_str());
        let engine = IrlsEngine::new(config.settings.engine.irls_options());
        let timeout_seconds = config.settings.engine.timeout_seconds;
        Pipeline {
            config,
            engine,
            run_id,
            log,
            timeout_seconds,
        }
    }

    /// Override the configured fit budget (e.g. from `--timeout`).
    pub fn with_timeout(mut self, seconds: Option<f64>) -> Self {
        if seconds.is_some() {
            self.timeout_seconds = seconds;
        }
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn log(&self) -> &LogContext {
        &self.log
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    fn budget(&self) -> FitBudget {
        FitBudget::from_seconds(self.timeout_seconds)
    }

    /// Read a CSV file and validate it into a series.
    pub fn load(&self, path: &Path) -> Result<ObservationSeries> {
        let observations = load_csv(path, &self.settings().data.columns())?;
        crate::log_event!(
            self.log,
            INFO,
            event_names::DATA_LOADED,
            Stage::Load,
            "data loaded",
            path = path.display().to_string().as_str(),
            rows = observations.len() as u64
        );
        let series = build_series(observations)?;
        crate::log_event!(
            self.log,
            INFO,
            event_names::DATA_VALIDATED,
            Stage::Validate,
            "series validated",
            rows = series.len() as u64,
            present = series.present_count() as u64
        );
        Ok(series)
    }

    /// Fit one hurdle variant and predict every row of `series`.
    pub fn run_hurdle(&self, series: &ObservationSeries, variant: HurdleVariant) -> Result<HurdleRun> {
        let spec = self.settings().hurdle_spec(variant)?;
        let model = HurdleModel::fit(&self.engine, series, &spec, self.budget(), &self.log)?;
        let batch = model
            .predictor(self.settings().run.on_prediction_error)
            .predict_rows(series.rows(), &self.log)?;
        Ok(HurdleRun {
            summary: model.summary(),
            batch,
        })
    }

    /// Fit the Tweedie model, with `power` overriding the configured power.
    pub fn run_tweedie(&self, series: &ObservationSeries, power: Option<f64>) -> Result<TweedieRun> {
        let formula = self.settings().tweedie_formula()?;
        let spec = match power {
            Some(p) => PowerSpec::Fixed(p),
            None => self.settings().tweedie.power_spec(),
        };
        let fit = TweedieFitter::new(&self.engine).fit(series, &formula, &spec, self.budget(), &self.log)?;

        let policy = self.settings().run.on_prediction_error;
        let mut predictions = Vec::with_capacity(series.len());
        let mut skipped = Vec::new();
        for (index, obs) in series.rows().iter().enumerate() {
            match fit.predict(&obs.covariates).map_err(|e| at_row(e, index)) {
                Ok(expected) => predictions.push(TweediePrediction {
                    index,
                    time_index: obs.time_index,
                    observed: obs.value,
                    expected,
                }),
                Err(e @ Error::Prediction { .. }) if policy == FailurePolicy::Skip => {
                    skipped.push(SkippedRow {
                        index,
                        time_index: obs.time_index,
                        error: StructuredError::from(&e),
                    })
                }
                Err(e) => return Err(e),
            }
        }
        Ok(TweedieRun {
            summary: fit.summary(),
            predictions,
            skipped,
        })
    }

    pub fn run_compare(&self, series: &ObservationSeries) -> Result<ComparisonReport> {
        Comparator::new(&self.engine, self.settings()).run(series, self.budget(), &self.log)
    }

    /// Wrap a payload with run metadata.
    pub fn envelope<T>(&self, command: &str, result: T) -> RunOutput<T> {
        RunOutput {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: self.run_id.to_string(),
            generated_at: Utc::now().to_rfc3339(),
            command: command.to_string(),
            config: self.config.snapshot(),
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn load_rejects_negative_values_with_row() {
        let pipeline = Pipeline::new(ResolvedConfig::defaults());
        let f = csv_file("time,value\n1,0\n2,-1.0\n");
        match pipeline.load(f.path()) {
            Err(Error::Validation { row, .. }) => assert_eq!(row, Some(1)),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn hurdle_run_predicts_every_row() {
        let pipeline = Pipeline::new(ResolvedConfig::defaults());
        let f = csv_file("time,value\n1,0\n2,0\n3,5.2\n4,0\n5,3.1\n6,2.0\n");
        let series = pipeline.load(f.path()).unwrap();
        let run = pipeline.run_hurdle(&series, HurdleVariant::Linear).unwrap();
        assert_eq!(run.batch.predictions.len(), 6);
        assert!(run.batch.predictions.iter().all(|p| p.expected >= 0.0));
        assert_eq!(run.summary.present_rows, 3);

        let out = pipeline.envelope("hurdle", &run);
        assert_eq!(out.schema_version, SCHEMA_VERSION);
        assert_eq!(out.run_id, pipeline.run_id().to_string());
        let json = serde_json::to_value(&out).unwrap();
        assert!(json["result"]["predictions"].is_array());
        assert_eq!(json["config"]["origin"], "defaults");
    }

    #[test]
    fn tweedie_run_with_fixed_power() {
        let pipeline = Pipeline::new(ResolvedConfig::defaults());
        let f = csv_file("time,value\n1,0\n2,1.5\n3,0\n4,2.5\n5,3.0\n6,0\n7,4.0\n");
        let series = pipeline.load(f.path()).unwrap();
        let run = pipeline.run_tweedie(&series, Some(1.5)).unwrap();
        assert_eq!(run.summary.power, 1.5);
        assert!(!run.summary.profiled);
        assert_eq!(run.predictions.len(), 7);
        assert!(run.predictions.iter().all(|p| p.expected > 0.0));
    }

    #[test]
    fn timeout_override_keeps_configured_value_when_absent() {
        let mut config = ResolvedConfig::defaults();
        config.settings.engine.timeout_seconds = Some(30.0);
        let pipeline = Pipeline::new(config).with_timeout(None);
        assert_eq!(pipeline.budget().seconds(), Some(30.0));
        let pipeline = pipeline.with_timeout(Some(2.0));
        assert_eq!(pipeline.budget().seconds(), Some(2.0));
    }
}
