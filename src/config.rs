//! Configuration management
//!
//! TOML files with serde defaults, plus environment variable overrides:
//!
//! | variable              | effect                                        |
//! |-----------------------|-----------------------------------------------|
//! | `SNAPAGG_LOG_LEVEL`   | `monitoring.log_level`                        |
//! | `RUST_LOG`            | `monitoring.log_level` (wins over the above)  |
//! | `SNAPAGG_KEY`         | `none`, `default`, or a comma-separated list  |
//! | `SNAPAGG_NESTED_ONLY` | `aggregation.key_policy.nested_only`          |
//!
//! ```toml
//! [aggregation.query]
//! key = { list = ["function"] }
//!
//! [[aggregation.query.ops]]
//! kernel = "inclusive_sum"
//! attributes = ["time"]
//!
//! [monitoring]
//! log_level = "debug"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregation::{Aggregator, KeyPolicy, KeySpec, QuerySpec};
use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Aggregation query and key policy
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Logging
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Aggregation configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AggregationConfig {
    /// Key selection and kernel ops
    #[serde(default = "default_query")]
    pub query: QuerySpec,

    /// Eligibility rules for the default key
    #[serde(default)]
    pub key_policy: KeyPolicy,
}

/// Monitoring configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level or filter directive (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Include the event target in log lines
    #[serde(default = "default_true")]
    pub log_targets: bool,

    /// Colored output
    #[serde(default)]
    pub ansi: bool,
}

fn default_query() -> QuerySpec {
    QuerySpec::builder().op("count", &[], &[]).build()
}
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            query: default_query(),
            key_policy: KeyPolicy::default(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_targets: true,
            ansi: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Aggregation
        if let Ok(key) = std::env::var("SNAPAGG_KEY") {
            self.aggregation.query.key = parse_key(&key);
        }
        if let Ok(flag) = std::env::var("SNAPAGG_NESTED_ONLY") {
            if let Ok(b) = flag.parse() {
                self.aggregation.key_policy.nested_only = b;
            }
        }

        // Monitoring
        if let Ok(level) = std::env::var("SNAPAGG_LOG_LEVEL") {
            self.monitoring.log_level = level;
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let query = &self.aggregation.query;
        if query.ops.is_empty() {
            return Err(Error::Configuration(
                "At least one aggregation op is required".to_string(),
            ));
        }
        if let Some(e) = query.validate().into_iter().next() {
            return Err(Error::Spec(e));
        }

        // Plain levels are checked here; filter directives are left to the
        // subscriber
        let level = self.monitoring.log_level.trim();
        if level.is_empty() {
            return Err(Error::Configuration("Log level cannot be empty".to_string()));
        }
        if !level.contains(|c: char| c == '=' || c == ',') && !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
            return Err(Error::Configuration(format!("Unknown log level: {}", level)));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}

impl AggregationConfig {
    /// Build an aggregator for this query and policy
    pub fn build_aggregator(&self) -> Aggregator {
        Aggregator::with_policy(&self.query, self.key_policy)
    }
}

fn parse_key(text: &str) -> KeySpec {
    match text.trim() {
        "" | "none" => KeySpec::None,
        "default" => KeySpec::Default,
        list => KeySpec::List(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.monitoring.log_level, "info");
        assert_eq!(config.aggregation.query.key, KeySpec::Default);
        assert_eq!(config.aggregation.query.ops.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_query_is_rejected() {
        let mut config = Config::default();
        config.aggregation.query = QuerySpec::builder().op("sum", &[], &[]).build();
        assert!(matches!(config.validate(), Err(Error::Spec(_))));

        config.aggregation.query.ops.clear();
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.monitoring.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        config.monitoring.log_level = "snapagg=debug,warn".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("none"), KeySpec::None);
        assert_eq!(parse_key("default"), KeySpec::Default);
        assert_eq!(parse_key("function, loop"), KeySpec::list(&["function", "loop"]));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapagg.toml");

        let mut config = Config::default();
        config.aggregation.query = QuerySpec::builder()
            .key(KeySpec::list(&["function"]))
            .op("inclusive_ratio", &["bytes", "time"], &[1000.0])
            .build();
        config.aggregation.key_policy.nested_only = true;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[monitoring]\nlog_level = \"debug\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.monitoring.log_level, "debug");
        assert_eq!(config.aggregation, AggregationConfig::default());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_file("/nonexistent/snapagg.toml"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("SNAPAGG_NESTED_ONLY", "true");
        let config = Config::from_env();
        assert!(config.aggregation.key_policy.nested_only);
        std::env::remove_var("SNAPAGG_NESTED_ONLY");
    }
}
