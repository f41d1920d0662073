//! Console configuration, read from a YAML file.
//!
//! ```yaml
//! database_url: sqlite://allotments.db
//! reference_year: 2025
//! log_level: debug
//! operator_id: admin-7
//! ```
//!
//! Every field is optional; missing ones take the defaults below.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://allotments.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub database_url: String,
    /// Fixed "current year"; the UTC year is used when absent
    pub reference_year: Option<i32>,
    pub log_level: String,
    /// User id attributed to overrides made from this console
    pub operator_id: Option<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            reference_year: None,
            log_level: "info".to_string(),
            operator_id: None,
        }
    }
}

impl ConsoleConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let yaml_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&yaml_content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn from_yaml(yaml_content: &str) -> Result<Self> {
        if yaml_content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: ConsoleConfig = serde_yaml::from_str(yaml_content)?;
        Ok(config)
    }

    pub fn level_filter(&self) -> Result<LevelFilter> {
        self.log_level
            .parse::<LevelFilter>()
            .with_context(|| format!("Unknown log level {:?}", self.log_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = ConsoleConfig::from_yaml("reference_year: 2031\n").unwrap();
        assert_eq!(config.reference_year, Some(2031));
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.log_level, "info");
        assert!(config.operator_id.is_none());

        assert_eq!(ConsoleConfig::from_yaml("").unwrap(), ConsoleConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "database_url: sqlite::memory:").unwrap();
        writeln!(file, "log_level: debug").unwrap();
        writeln!(file, "operator_id: admin-7").unwrap();

        let config = ConsoleConfig::load(file.path()).unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.operator_id.as_deref(), Some("admin-7"));
        assert_eq!(config.level_filter().unwrap(), LevelFilter::Debug);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConsoleConfig::load_or_default(&dir.path().join("console.yaml")).unwrap();
        assert_eq!(config, ConsoleConfig::default());
    }

    #[test]
    fn test_bad_log_level_is_rejected() {
        let config = ConsoleConfig::from_yaml("log_level: chatty").unwrap();
        assert!(config.level_filter().is_err());
    }
}
