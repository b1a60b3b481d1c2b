//! Exit codes for the zi-core CLI.
//!
//! Exit codes communicate the outcome without requiring output parsing.
//!
//! Exit code ranges:
//! - 0: Success
//! - 10-19: User/input errors (recoverable by changing data, flags or config)
//! - 20-29: Internal and environment errors

use zi_common::{Error, StructuredError};

/// Exit codes for zi-core operations.
///
/// These codes are a stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Clean = 0,

    // ========================================================================
    // User / Input Errors (10-19)
    // ========================================================================
    /// Invalid arguments
    ArgsError = 10,

    /// Input data failed validation (negative or non-finite value, bad CSV)
    ValidationError = 11,

    /// A model could not be fitted
    FitError = 12,

    /// A fitted model could not be evaluated
    PredictionError = 13,

    /// Configuration or formula invalid
    ConfigError = 14,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error
    IoError = 21,

    /// Fit budget exceeded
    TimeoutError = 22,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Clean
    }

    /// User/input error (codes 10-19), resolvable by the caller.
    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    /// Internal or environment error (codes 20-29).
    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Get the code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ValidationError => "ERR_VALIDATION",
            ExitCode::FitError => "ERR_FIT",
            ExitCode::PredictionError => "ERR_PREDICTION",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
            ExitCode::TimeoutError => "ERR_TIMEOUT",
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Validation { .. } | Error::Csv(_) => ExitCode::ValidationError,
            Error::FitFailure { .. } => ExitCode::FitError,
            Error::FitTimeout { .. } => ExitCode::TimeoutError,
            Error::Prediction { .. } => ExitCode::PredictionError,
            Error::Config(_) | Error::Formula(_) => ExitCode::ConfigError,
            Error::Io(_) => ExitCode::IoError,
            Error::Json(_) => ExitCode::InternalError,
        }
    }
}

impl From<&StructuredError> for ExitCode {
    /// Map a recorded error (e.g. a failed comparison candidate) by its stable code.
    fn from(err: &StructuredError) -> Self {
        match err.code {
            10 | 11 => ExitCode::ValidationError,
            20 => ExitCode::FitError,
            21 => ExitCode::TimeoutError,
            30..=39 => ExitCode::PredictionError,
            40..=49 => ExitCode::ConfigError,
            60 => ExitCode::IoError,
            _ => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
