//! Configuration loading and validation.
//!
//! This module handles:
//! - Resolving the config file (CLI > env > XDG > defaults)
//! - Shape checking via serde (unknown keys are errors)
//! - Semantic validation of the parsed settings
//! - Snapshot generation so run outputs record which config produced them

pub mod settings;

pub use settings::{
    CompareSettings, DataSettings, EngineSettings, MagnitudeSettings, PresenceSettings,
    RunSettings, Settings, TweedieSettings, VariantFormulas, VariantSettings,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "ZI_CONFIG";

/// Directory under the XDG config home.
const CONFIG_DIR_NAME: &str = "zero_inflated";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl From<ConfigError> for zi_common::Error {
    fn from(err: ConfigError) -> Self {
        zi_common::Error::Config(err.to_string())
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigOrigin {
    Cli,
    Env,
    Xdg,
    Defaults,
}

/// Resolved configuration with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub settings: Settings,
    pub origin: ConfigOrigin,
    /// Path to the config file (None when using defaults).
    pub path: Option<PathBuf>,
    /// SHA-256 of the file content (None when using defaults).
    pub file_hash: Option<String>,
}

impl ResolvedConfig {
    pub fn defaults() -> Self {
        ResolvedConfig {
            settings: Settings::default(),
            origin: ConfigOrigin::Defaults,
            path: None,
            file_hash: None,
        }
    }

    /// Create a config snapshot for run outputs.
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            origin: self.origin,
            path: self.path.clone(),
            file_hash: self.file_hash.clone(),
            settings_hash: settings_hash(&self.settings),
        }
    }
}

/// Config provenance recorded alongside results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub origin: ConfigOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    /// Hash of the effective settings, defaults included.
    pub settings_hash: String,
}

/// Configuration resolution options.
#[derive(Debug, Default)]
pub struct ConfigOptions {
    /// Explicit config file (highest priority).
    pub path: Option<PathBuf>,
}

/// Load configuration with the standard resolution order.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit CLI flag (via ConfigOptions)
/// 2. Environment variable (ZI_CONFIG)
/// 3. XDG config home (~/.config/zero_inflated/config.toml), if present
/// 4. Built-in defaults
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    load_config_with(options, |key| std::env::var(key).ok())
}

/// [`load_config`] with an injectable environment lookup.
pub fn load_config_with<F>(options: &ConfigOptions, env: F) -> Result<ResolvedConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match resolve_config_path(options, env)? {
        Some((path, origin)) => load_file(&path, origin),
        None => Ok(ResolvedConfig::defaults()),
    }
}

/// Pick the config file to read, or `None` for defaults.
///
/// Explicit paths (CLI or env) must exist; the XDG file is optional.
fn resolve_config_path<F>(
    options: &ConfigOptions,
    env: F,
) -> Result<Option<(PathBuf, ConfigOrigin)>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let explicit = match &options.path {
        Some(path) => Some((path.clone(), ConfigOrigin::Cli)),
        None => env(CONFIG_ENV_VAR)
            .filter(|v| !v.is_empty())
            .map(|v| (PathBuf::from(v), ConfigOrigin::Env)),
    };
    if let Some((path, origin)) = explicit {
        if !path.is_file() {
            return Err(ConfigError::NotFound { path });
        }
        return Ok(Some((path, origin)));
    }

    let xdg_home = env("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir);
    Ok(xdg_home
        .map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
        .map(|path| (path, ConfigOrigin::Xdg)))
}

/// Read, parse and validate one config file.
pub fn load_file(path: &Path, origin: ConfigOrigin) -> Result<ResolvedConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;
    let settings = parse_settings(&content, path)?;
    Ok(ResolvedConfig {
        settings,
        origin,
        path: Some(path.to_path_buf()),
        file_hash: Some(compute_hash(content.as_bytes())),
    })
}

/// Parse and validate TOML text; `path` is only used in error messages.
pub fn parse_settings(content: &str, path: &Path) -> Result<Settings, ConfigError> {
    let settings: Settings = toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Hex SHA-256 digest.
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn settings_hash(settings: &Settings) -> String {
    // Settings only hold strings, numbers and enums, so serialization cannot fail.
    let json = serde_json::to_vec(settings).unwrap_or_default();
    compute_hash(&json)
}
