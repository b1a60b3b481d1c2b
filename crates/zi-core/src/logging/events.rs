//! Structured event definitions for logging.
//!
//! Events follow a consistent schema for machine-parseable JSONL output.
//! Every event carries the run id and the pipeline stage it was emitted from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Log levels for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Stages of a modelling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Reading the input file.
    Load,
    /// Presence labelling and input validation.
    Validate,
    /// Sub-model and single-distribution fitting.
    Fit,
    /// Composite prediction.
    Predict,
    /// Variance-power profile likelihood.
    Profile,
    /// Candidate scoring.
    Compare,
    /// Rendering output.
    Report,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Load => "load",
            Stage::Validate => "validate",
            Stage::Fit => "fit",
            Stage::Predict => "predict",
            Stage::Profile => "profile",
            Stage::Compare => "compare",
            Stage::Report => "report",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Input
    pub const DATA_LOADED: &str = "data.loaded";
    pub const DATA_VALIDATED: &str = "data.validated";

    // Fitting
    pub const FIT_STARTED: &str = "fit.started";
    pub const FIT_ITERATION: &str = "fit.iteration";
    pub const FIT_SMOOTHING: &str = "fit.smoothing";
    pub const FIT_FINISHED: &str = "fit.finished";
    pub const FIT_FAILED: &str = "fit.failed";

    // Prediction
    pub const PREDICT_FINISHED: &str = "predict.finished";
    pub const PREDICT_ROW_SKIPPED: &str = "predict.row_skipped";

    // Tweedie power profile
    pub const PROFILE_CANDIDATE: &str = "profile.candidate";
    pub const PROFILE_SELECTED: &str = "profile.selected";
    pub const PROFILE_PHI_AT_BOUND: &str = "profile.phi_at_bound";

    // Comparison
    pub const COMPARE_CANDIDATE: &str = "compare.candidate";
    pub const COMPARE_SKIPPED: &str = "compare.skipped";
    pub const COMPARE_FINISHED: &str = "compare.finished";

    // Config/init events
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
    pub const CONFIG_ERROR: &str = "config.error";

    // Error events
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// A structured log event for JSONL output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    /// Log level.
    pub level: Level,

    /// Event name (e.g., "run.started", "fit.finished").
    pub event: String,

    /// Run id of this invocation.
    pub run_id: String,

    /// Current pipeline stage.
    pub stage: Stage,

    /// Model the event concerns, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Human-readable message.
    pub message: String,

    /// Additional structured fields (stable keys).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, serde_json::Value>,
}

impl LogEvent {
    /// Create a new log event with required fields.
    pub fn new(
        level: Level,
        event: impl Into<String>,
        run_id: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> Self {
        LogEvent {
            ts: Utc::now(),
            level,
            event: event.into(),
            run_id: run_id.into(),
            stage,
            model: None,
            message: message.into(),
            fields: HashMap::new(),
        }
    }

    /// Attach the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Add a field to the event.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
        self
    }

    /// Serialize to a single JSON line.
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","event":"{}"}}"#,
                self.event
            )
        })
    }
}

/// Correlation context threaded through a run.
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Run id of this invocation.
    pub run_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
        }
    }

    /// Context for library callers and tests that have no run id.
    pub fn detached() -> Self {
        LogContext::new("detached")
    }

    /// Create an event with this context.
    pub fn event(
        &self,
        level: Level,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        LogEvent::new(level, event, &self.run_id, stage, message)
    }

    /// Shortcut for info-level event.
    pub fn info(&self, event: impl Into<String>, stage: Stage, message: impl Into<String>) -> LogEvent {
        self.event(Level::Info, event, stage, message)
    }
}
