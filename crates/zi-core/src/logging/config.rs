//! Log level and format resolution.
//!
//! Precedence, highest first: CLI flags (`-q`, `-v`, `-vv`), `ZI_LOG`,
//! `RUST_LOG` directives, then `info`. JSON payload output always logs JSONL
//! so stderr stays machine-readable; otherwise `ZI_LOG_FORMAT` picks.

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Level variable read before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "ZI_LOG";

pub const LOG_FORMAT_ENV_VAR: &str = "ZI_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per event.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            _ => Err(format!("unknown log format: {} (expected human or jsonl)", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LevelFilter,
    /// `RUST_LOG` directives; only consulted when no flag or `ZI_LOG` set a level.
    pub directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LevelFilter::INFO,
            directives: None,
        }
    }
}

impl LogConfig {
    /// Resolve from CLI flags and the process environment.
    pub fn from_env(verbose: u8, quiet: bool, machine_output: bool) -> Self {
        Self::resolve(verbose, quiet, machine_output, |key| std::env::var(key).ok())
    }

    /// [`from_env`](Self::from_env) with an injectable environment lookup.
    pub fn resolve<F>(verbose: u8, quiet: bool, machine_output: bool, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag_level = match (quiet, verbose) {
            (true, _) => Some(LevelFilter::ERROR),
            (false, 0) => None,
            (false, 1) => Some(LevelFilter::DEBUG),
            (false, _) => Some(LevelFilter::TRACE),
        };
        let level = flag_level.or_else(|| env(LOG_ENV_VAR).and_then(|v| v.trim().parse().ok()));
        let directives = match level {
            Some(_) => None,
            None => env("RUST_LOG").filter(|v| !v.trim().is_empty()),
        };
        let format = if machine_output {
            LogFormat::Jsonl
        } else {
            env(LOG_FORMAT_ENV_VAR)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default()
        };

        LogConfig {
            format,
            level: level.unwrap_or(LevelFilter::INFO),
            directives,
        }
    }

    /// Subscriber filter for this configuration.
    pub fn filter(&self) -> EnvFilter {
        let builder = EnvFilter::builder().with_default_directive(self.level.into());
        match &self.directives {
            Some(directives) => builder.parse_lossy(directives),
            None => builder.parse_lossy(""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    }

    #[test]
    fn defaults_without_flags_or_env() {
        let config = LogConfig::resolve(0, false, false, env(&[]));
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn flags_beat_environment() {
        let vars = [(LOG_ENV_VAR, "warn"), ("RUST_LOG", "zi_core=trace")];
        assert_eq!(LogConfig::resolve(0, true, false, env(&vars)).level, LevelFilter::ERROR);
        assert_eq!(LogConfig::resolve(1, false, false, env(&vars)).level, LevelFilter::DEBUG);
        assert_eq!(LogConfig::resolve(3, false, false, env(&vars)).level, LevelFilter::TRACE);

        let config = LogConfig::resolve(0, false, false, env(&vars));
        assert_eq!(config.level, LevelFilter::WARN);
        assert_eq!(config.directives, None);
    }

    #[test]
    fn rust_log_directives_apply_without_zi_log() {
        let vars = [("RUST_LOG", "compare=debug")];
        let config = LogConfig::resolve(0, false, false, env(&vars));
        assert_eq!(config.level, LevelFilter::INFO);
        assert_eq!(config.directives.as_deref(), Some("compare=debug"));

        // Unparseable ZI_LOG falls through to RUST_LOG.
        let vars = [(LOG_ENV_VAR, "loud"), ("RUST_LOG", "error")];
        assert_eq!(
            LogConfig::resolve(0, false, false, env(&vars)).directives.as_deref(),
            Some("error")
        );
    }

    #[test]
    fn json_payloads_force_jsonl_logs() {
        let vars = [(LOG_FORMAT_ENV_VAR, "human")];
        assert_eq!(LogConfig::resolve(0, false, true, env(&vars)).format, LogFormat::Jsonl);
        assert_eq!(LogConfig::resolve(0, false, false, env(&vars)).format, LogFormat::Human);
        let vars = [(LOG_FORMAT_ENV_VAR, "JSON")];
        assert_eq!(LogConfig::resolve(0, false, false, env(&vars)).format, LogFormat::Jsonl);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
