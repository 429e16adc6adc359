//! Application configuration loaded from `costbook.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "costbook.toml";

/// Environment variable that overrides the configuration file path.
pub const CONFIG_ENV: &str = "COSTBOOK_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration value for key '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding one JSON file per project.
    pub projects_dir: PathBuf,
    /// Directory CSV exports are written to.
    pub exports_dir: PathBuf,
    pub log_file: PathBuf,
    /// Filter directive used when `RUST_LOG` is not set, e.g. `info`.
    pub log_level: String,
    /// Prefix shown before amounts in the UI.
    pub currency_symbol: String,
    pub decimal_places: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            projects_dir: PathBuf::from("projects"),
            exports_dir: PathBuf::from("exports"),
            log_file: PathBuf::from("costbook.log"),
            log_level: "info".to_string(),
            currency_symbol: String::new(),
            decimal_places: 2,
        }
    }
}

impl AppConfig {
    /// Formats an amount with the configured symbol and precision.
    pub fn format_amount(&self, amount: f64) -> String {
        format!("{}{:.*}", self.currency_symbol, self.decimal_places, amount)
    }

    fn check(&self) -> Result<()> {
        if self.decimal_places > 10 {
            return Err(ConfigError::InvalidValue {
                key: "decimal_places".to_string(),
                reason: "must be between 0 and 10".to_string(),
            });
        }
        if self.projects_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "projects_dir".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolves the config path: `COSTBOOK_CONFIG` if set, else `costbook.toml`.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Loads the configuration at `path`.
///
/// A missing or empty file yields the default configuration; keys that are
/// absent fall back to their defaults.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(AppConfig::default());
    }

    let config: AppConfig = toml::from_str(&content)?;
    config.check()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(load_config(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "projects_dir = \"data/projects\"\ncurrency_symbol = \"$\"\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.projects_dir, PathBuf::from("data/projects"));
        assert_eq!(config.currency_symbol, "$");
        assert_eq!(config.exports_dir, PathBuf::from("exports"));
        assert_eq!(config.decimal_places, 2);
    }

    #[test]
    fn test_invalid_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        std::fs::write(&path, "projects_dir = [").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::ParseError(_))));

        std::fs::write(&path, "decimal_places = 40").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_format_amount() {
        let mut config = AppConfig::default();
        assert_eq!(config.format_amount(8000.0), "8000.00");
        config.currency_symbol = "¥".to_string();
        config.decimal_places = 1;
        assert_eq!(config.format_amount(2.25), "¥2.2");
    }
}
