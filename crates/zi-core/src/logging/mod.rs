//! Structured logging for zi-core.
//!
//! Provides dual-mode logging:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for batch and agent workflows
//!
//! # Usage
//!
//! ```ignore
//! use zi_core::logging::{init_logging, LogConfig, LogContext, Stage, event_names};
//!
//! let config = LogConfig::from_env(verbose, quiet, format.is_machine());
//! init_logging(&config);
//!
//! let ctx = LogContext::new(run_id.as_str());
//! zi_core::log_event!(ctx, INFO, event_names::RUN_STARTED, Stage::Init, "Starting run");
//! ```
//!
//! stdout is reserved for command payloads (JSON/MD output); all log output
//! goes to stderr.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat};
pub use events::{event_names, Level, LogContext, LogEvent, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::fmt;

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs. A second call
/// is ignored.
pub fn init_logging(config: &LogConfig) {
    let filter = config.filter();

    // try_init fails only when a global subscriber is already installed.
    let _ = match config.format {
        LogFormat::Human => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(std::io::stderr().is_terminal()),
            )
            .try_init(),
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(JsonlLayer::stderr())
            .try_init(),
    };
}

/// Structured event logging with run correlation.
///
/// Usage:
/// ```ignore
/// log_event!(ctx, INFO, event_names::FIT_STARTED, Stage::Fit, "Fitting presence model");
/// log_event!(ctx, DEBUG, event_names::FIT_ITERATION, Stage::Fit, "IRLS step",
///     model = "presence", deviance = 12.5);
/// ```
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, INFO, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::info!(
            target: $event,
            run_id = %$ctx.run_id,
            stage = %$stage,
            $($key = $val,)*
            message = $msg,
        )
    };
    ($ctx:expr, DEBUG, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::debug!(
            target: $event,
            run_id = %$ctx.run_id,
            stage = %$stage,
            $($key = $val,)*
            message = $msg,
        )
    };
    ($ctx:expr, WARN, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::warn!(
            target: $event,
            run_id = %$ctx.run_id,
            stage = %$stage,
            $($key = $val,)*
            message = $msg,
        )
    };
    ($ctx:expr, ERROR, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::error!(
            target: $event,
            run_id = %$ctx.run_id,
            stage = %$stage,
            $($key = $val,)*
            message = $msg,
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_logging(&LogConfig {
            level: tracing_subscriber::filter::LevelFilter::OFF,
            ..LogConfig::default()
        });
        init_logging(&LogConfig {
            format: LogFormat::Jsonl,
            ..LogConfig::default()
        });
    }

    #[test]
    fn test_macro_expands_for_every_level() {
        let ctx = LogContext::new("zi-test");
        crate::log_event!(ctx, INFO, event_names::RUN_STARTED, Stage::Init, "start");
        crate::log_event!(ctx, DEBUG, event_names::FIT_ITERATION, Stage::Fit, "step", iteration = 3u64);
        crate::log_event!(ctx, WARN, event_names::PREDICT_ROW_SKIPPED, Stage::Predict, "skip", row = 4u64);
        crate::log_event!(ctx, ERROR, event_names::INTERNAL_ERROR, Stage::Report, "boom");
    }

    #[test]
    fn test_level_from_tracing() {
        assert_eq!(Level::from(tracing::Level::INFO), Level::Info);
        assert_eq!(Level::from(tracing::Level::WARN), Level::Warn);
    }
}
