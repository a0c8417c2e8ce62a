// ============================================================================
// CONFIGURATION SYSTEM
// ============================================================================
// TOML file parsing with environment variable overrides (VANTAGE_ prefix),
// serde-backed defaults for every field, and validation before use.
// ============================================================================

use std::path::Path;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ConfigError;

// ----------------------------------------------------------------------------
// Root Configuration
// ----------------------------------------------------------------------------

/// Root configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// General engine settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Ingestion pipeline settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Aggregation engine settings
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Insight generator settings
    #[serde(default)]
    pub insight: InsightConfig,

    /// Predictive analytics settings
    #[serde(default)]
    pub prediction: PredictionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file with environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("VANTAGE_").split("__"));

        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML string (for testing).
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.buffer_capacity == 0 {
            return Err(ConfigError::invalid_value(
                "ingest.buffer_capacity",
                "buffer capacity must be at least 1",
            ));
        }

        if self.ingest.flush_interval_secs == 0 {
            return Err(ConfigError::invalid_value(
                "ingest.flush_interval_secs",
                "flush interval must be at least 1 second",
            ));
        }

        if self.insight.key_metrics.is_empty() {
            return Err(ConfigError::invalid_value(
                "insight.key_metrics",
                "at least one key metric is required",
            ));
        }

        if !(0.0..=1.0).contains(&self.prediction.min_accuracy) {
            return Err(ConfigError::invalid_value(
                "prediction.min_accuracy",
                "accuracy threshold must be within [0, 1]",
            ));
        }

        if self.prediction.training_lookback_days == 0 {
            return Err(ConfigError::invalid_value(
                "prediction.training_lookback_days",
                "training lookback must be at least 1 day",
            ));
        }

        Ok(())
    }

    /// Render the default configuration as TOML.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// General Settings
// ----------------------------------------------------------------------------

/// General engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Engine instance name (for identification)
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Environment name (prod, staging, dev)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Graceful shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            environment: default_environment(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

// ----------------------------------------------------------------------------
// Ingestion Settings
// ----------------------------------------------------------------------------

/// Ingestion pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Buffered observations that trigger an automatic flush
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Periodic flush interval in seconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Timeout applied to each store call, in seconds
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            flush_interval_secs: default_flush_interval(),
            store_timeout_secs: default_store_timeout(),
        }
    }
}

// ----------------------------------------------------------------------------
// Aggregation Settings
// ----------------------------------------------------------------------------

/// Aggregation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Run scheduled aggregation passes
    #[serde(default = "default_true")]
    pub scheduled: bool,

    /// Install the default rollup rules at startup
    #[serde(default = "default_true")]
    pub install_seed_rules: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            scheduled: true,
            install_seed_rules: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Insight Settings
// ----------------------------------------------------------------------------

/// Insight generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightConfig {
    /// Metrics examined by the scheduled analysis passes
    #[serde(default = "default_key_metrics")]
    pub key_metrics: Vec<String>,

    /// Interval between scheduled insight refreshes, in seconds
    #[serde(default = "default_insight_refresh")]
    pub refresh_interval_secs: u64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            key_metrics: default_key_metrics(),
            refresh_interval_secs: default_insight_refresh(),
        }
    }
}

// ----------------------------------------------------------------------------
// Prediction Settings
// ----------------------------------------------------------------------------

/// Predictive analytics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Days of history used to train a model
    #[serde(default = "default_training_lookback")]
    pub training_lookback_days: u32,

    /// Cached models older than this are retrained, in days
    #[serde(default = "default_model_max_age")]
    pub model_max_age_days: u32,

    /// Cached models below this accuracy are retrained
    #[serde(default = "default_min_accuracy")]
    pub min_accuracy: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            training_lookback_days: default_training_lookback(),
            model_max_age_days: default_model_max_age(),
            min_accuracy: default_min_accuracy(),
        }
    }
}

// ----------------------------------------------------------------------------
// Logging Settings
// ----------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: pretty, compact, json
    #[serde(default = "default_log_format")]
    pub format: String,

    /// ANSI colors for pretty/compact output
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include file and line number in log events
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
            source_location: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Defaults
// ----------------------------------------------------------------------------

fn default_instance_name() -> String {
    ENGINE_NAME.into()
}

fn default_environment() -> String {
    "production".into()
}

fn default_shutdown_timeout() -> u64 {
    SHUTDOWN_GRACE_PERIOD_SECS
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_flush_interval() -> u64 {
    DEFAULT_FLUSH_INTERVAL_SECS
}

fn default_store_timeout() -> u64 {
    DEFAULT_STORE_TIMEOUT_SECS
}

fn default_insight_refresh() -> u64 {
    INSIGHT_REFRESH_INTERVAL_SECS
}

fn default_key_metrics() -> Vec<String> {
    vec![
        "users.active".into(),
        "sessions.count".into(),
        "applications.submitted".into(),
        "applications.completed".into(),
        "response.time".into(),
        "bounce.rate".into(),
        "engagement.score".into(),
    ]
}

fn default_training_lookback() -> u32 {
    TRAINING_LOOKBACK_DAYS as u32
}

fn default_model_max_age() -> u32 {
    MODEL_MAX_AGE_DAYS as u32
}

fn default_min_accuracy() -> f64 {
    MODEL_MIN_ACCURACY
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ingest.buffer_capacity, 100);
        assert_eq!(config.ingest.flush_interval_secs, 30);
        assert_eq!(config.prediction.model_max_age_days, 7);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [ingest]
            buffer_capacity = 250

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.ingest.buffer_capacity, 250);
        assert_eq!(config.ingest.flush_interval_secs, 30);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.general.environment, "production");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = EngineConfig::from_toml("[ingest]\nbuffer_capacity = 0\n").unwrap_err();
        assert!(err.to_string().contains("buffer_capacity"));

        let err =
            EngineConfig::from_toml("[prediction]\nmin_accuracy = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("min_accuracy"));

        let err = EngineConfig::from_toml("[insight]\nkey_metrics = []\n").unwrap_err();
        assert!(err.to_string().contains("key_metrics"));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = EngineConfig::load("/nonexistent/vantage.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vantage.toml");
        std::fs::write(&path, "[general]\ninstance_name = \"test-node\"\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.general.instance_name, "test-node");
    }

    #[test]
    fn default_toml_round_trips() {
        let rendered = EngineConfig::default_toml();
        let parsed = EngineConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed.ingest.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
    }
}
