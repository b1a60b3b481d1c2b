//! Error types for zero-inflated series modelling.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for humans
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Input Validation Failed
//!   Reason: invalid observation at row 2: value must be non-negative, got -1
//!   Fix: Measurements must be finite and >= 0, and every covariate a formula reads must be filled in. Correct or drop the offending row.
//! ```
//!
//! # Machine-Facing Output
//!
//! ```json
//! {
//!   "code": 10,
//!   "category": "input",
//!   "message": "invalid observation at row 2: value must be non-negative, got -1",
//!   "recoverable": true,
//!   "suggested_action": "fix_input",
//!   "context": { "row": 2 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for modelling operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or out-of-domain input data.
    Input,
    /// Model fitting failures (non-convergence, empty training set, budget).
    Fit,
    /// Failures evaluating a fitted model.
    Prediction,
    /// Configuration and formula errors.
    Config,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Input => write!(f, "input"),
            ErrorCategory::Fit => write!(f, "fit"),
            ErrorCategory::Prediction => write!(f, "prediction"),
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Suggested follow-up for automation consuming structured errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Correct the input data and rerun.
    FixInput,
    /// Use a simpler model specification.
    SimplifyModel,
    /// Raise the fit time budget.
    ExtendBudget,
    /// Run configuration validation.
    RunCheck,
    /// Skip this item and continue.
    Skip,
    /// Retry the operation.
    Retry,
    /// Manual intervention required.
    ManualIntervention,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::FixInput => write!(f, "fix_input"),
            SuggestedAction::SimplifyModel => write!(f, "simplify_model"),
            SuggestedAction::ExtendBudget => write!(f, "extend_budget"),
            SuggestedAction::RunCheck => write!(f, "run_check"),
            SuggestedAction::Skip => write!(f, "skip"),
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::ManualIntervention => write!(f, "manual_intervention"),
        }
    }
}

fn row_suffix(row: &Option<usize>) -> String {
    match row {
        Some(r) => format!(" at row {}", r),
        None => String::new(),
    }
}

/// Unified error type for the modelling pipeline.
#[derive(Error, Debug)]
pub enum Error {
    // Input errors (10-19)
    #[error("invalid observation{}: {message}", row_suffix(.row))]
    Validation { row: Option<usize>, message: String },

    #[error("CSV error: {0}")]
    Csv(String),

    // Fit errors (20-29)
    #[error("{model} fit failed: {reason}")]
    FitFailure { model: String, reason: String },

    #[error("{model} fit exceeded its {seconds:.1}s budget")]
    FitTimeout { model: String, seconds: f64 },

    // Prediction errors (30-39)
    #[error("{model} prediction failed{}: {reason}", row_suffix(.row))]
    Prediction {
        model: String,
        row: Option<usize>,
        reason: String,
    },

    // Configuration errors (40-49)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid model formula: {0}")]
    Formula(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a row-scoped validation error.
    pub fn validation(row: Option<usize>, message: impl Into<String>) -> Self {
        Error::Validation {
            row,
            message: message.into(),
        }
    }

    /// Shorthand for a fit failure.
    pub fn fit_failure(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::FitFailure {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Input errors
    /// - 20-29: Fit errors
    /// - 30-39: Prediction errors
    /// - 40-49: Configuration errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Validation { .. } => 10,
            Error::Csv(_) => 11,
            Error::FitFailure { .. } => 20,
            Error::FitTimeout { .. } => 21,
            Error::Prediction { .. } => 30,
            Error::Config(_) => 40,
            Error::Formula(_) => 41,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation { .. } | Error::Csv(_) => ErrorCategory::Input,
            Error::FitFailure { .. } | Error::FitTimeout { .. } => ErrorCategory::Fit,
            Error::Prediction { .. } => ErrorCategory::Prediction,
            Error::Config(_) | Error::Formula(_) => ErrorCategory::Config,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable by the caller.
    ///
    /// Nothing is retried automatically; this is a hint only.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Validation { .. } => true,
            Error::Csv(_) => true,
            // A degenerate dataset stays degenerate for the same model.
            Error::FitFailure { .. } => false,
            Error::FitTimeout { .. } => true,
            Error::Prediction { .. } => true,
            Error::Config(_) => true,
            Error::Formula(_) => true,
            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Returns the suggested follow-up action.
    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::Validation { .. } | Error::Csv(_) => SuggestedAction::FixInput,
            Error::FitFailure { .. } => SuggestedAction::SimplifyModel,
            Error::FitTimeout { .. } => SuggestedAction::ExtendBudget,
            Error::Prediction { .. } => SuggestedAction::Skip,
            Error::Config(_) | Error::Formula(_) => SuggestedAction::RunCheck,
            Error::Io(_) => SuggestedAction::Retry,
            Error::Json(_) => SuggestedAction::ManualIntervention,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Validation { .. } => {
                "Measurements must be finite and >= 0, and every covariate a formula reads must be filled in. Correct or drop the offending row."
            }
            Error::Csv(_) => {
                "Check the file has a header row and that the time and value columns named in [data] exist."
            }
            Error::FitFailure { .. } => {
                "The data cannot support this model. Check that enough non-zero rows exist, or use a simpler variant."
            }
            Error::FitTimeout { .. } => {
                "Raise the budget with '--timeout' or 'engine.timeout_seconds', or reduce spline basis sizes."
            }
            Error::Prediction { .. } => {
                "A covariate level was not seen during fitting. Use '[run] on_prediction_error = \"skip\"' to continue past it."
            }
            Error::Config(_) => {
                "Run 'zi-core config validate' to check the configuration file."
            }
            Error::Formula(_) => {
                "Formulas are '+'-separated terms: x, factor(g), s(x), s(x, k=8), re(g)."
            }
            Error::Io(_) => "Check that the file exists and is readable. Retry the operation.",
            Error::Json(_) => "Internal serialization failure. Report it with the input file.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "Input Validation Failed",
            Error::Csv(_) => "CSV Parse Error",
            Error::FitFailure { .. } => "Model Fit Failed",
            Error::FitTimeout { .. } => "Model Fit Timed Out",
            Error::Prediction { .. } => "Prediction Failed",
            Error::Config(_) => "Configuration Error",
            Error::Formula(_) => "Invalid Model Formula",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Serialization Error",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Suggested follow-up action.
    pub suggested_action: SuggestedAction,

    /// Additional structured context (row, model name, budget).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::Validation { row: Some(row), .. } => {
                context.insert("row".to_string(), serde_json::json!(row));
            }
            Error::FitFailure { model, .. } => {
                context.insert("model".to_string(), serde_json::json!(model));
            }
            Error::FitTimeout { model, seconds } => {
                context.insert("model".to_string(), serde_json::json!(model));
                context.insert("timeout_seconds".to_string(), serde_json::json!(seconds));
            }
            Error::Prediction { model, row, .. } => {
                context.insert("model".to_string(), serde_json::json!(model));
                if let Some(row) = row {
                    context.insert("row".to_string(), serde_json::json!(row));
                }
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }

    /// Serialize to pretty JSON string.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.to_json())
    }
}

/// Format an error for human-readable stderr output.
///
/// Output format:
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        red = red,
        cyan = cyan,
        reset = reset,
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(Error::validation(Some(2), "negative").code(), 10);
        assert_eq!(Error::fit_failure("magnitude", "empty").code(), 20);
        assert_eq!(
            Error::FitTimeout {
                model: "tweedie".into(),
                seconds: 5.0
            }
            .code(),
            21
        );
        assert_eq!(Error::Formula("bad".into()).code(), 41);
    }

    #[test]
    fn test_error_category() {
        assert_eq!(Error::Csv("x".into()).category(), ErrorCategory::Input);
        assert_eq!(
            Error::fit_failure("presence", "singular").category(),
            ErrorCategory::Fit
        );
        assert_eq!(
            Error::Prediction {
                model: "magnitude".into(),
                row: None,
                reason: "out of range".into()
            }
            .category(),
            ErrorCategory::Prediction
        );
    }

    #[test]
    fn test_validation_message_names_row() {
        let err = Error::validation(Some(4), "value must be non-negative, got -1");
        assert_eq!(
            err.to_string(),
            "invalid observation at row 4: value must be non-negative, got -1"
        );
        let err = Error::validation(None, "no observations");
        assert_eq!(err.to_string(), "invalid observation: no observations");
    }

    #[test]
    fn test_recoverability() {
        assert!(!Error::fit_failure("magnitude", "no present rows").is_recoverable());
        assert!(Error::FitTimeout {
            model: "presence".into(),
            seconds: 1.0
        }
        .is_recoverable());
        assert_eq!(
            Error::fit_failure("magnitude", "x").suggested_action(),
            SuggestedAction::SimplifyModel
        );
    }

    #[test]
    fn test_structured_error_context() {
        let err = Error::Prediction {
            model: "hurdle-smooth/magnitude".into(),
            row: Some(7),
            reason: "year = 2030 outside fitted range".into(),
        };
        let structured = StructuredError::from(&err);
        assert_eq!(structured.code, 30);
        assert_eq!(structured.context.get("row"), Some(&serde_json::json!(7)));
        assert_eq!(
            structured.context.get("model"),
            Some(&serde_json::json!("hurdle-smooth/magnitude"))
        );
    }

    #[test]
    fn test_structured_error_json() {
        let err = Error::validation(Some(2), "negative");
        let json = StructuredError::from(&err).with_context("value", -1.0).to_json();
        assert!(json.contains(r#""code":10"#));
        assert!(json.contains(r#""category":"input""#));
        assert!(json.contains(r#""suggested_action":"fix_input""#));
        assert!(json.contains(r#""value":-1.0"#));
    }

    #[test]
    fn test_format_error_human() {
        let err = Error::fit_failure("magnitude", "no rows with value > 0");
        let formatted = format_error_human(&err, false);

        assert!(formatted.contains("Model Fit Failed"));
        assert!(formatted.contains("magnitude fit failed: no rows with value > 0"));
        assert!(formatted.contains("Fix:"));
        assert!(!formatted.contains("\x1b["));
    }

    #[test]
    fn test_display_impls() {
        assert_eq!(ErrorCategory::Fit.to_string(), "fit");
        assert_eq!(SuggestedAction::ExtendBudget.to_string(), "extend_budget");
    }
}
