// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// Three-way taxonomy: validation failures are returned to the caller and
// never retried; store failures are logged and survived; a failing
// sub-computation is omitted from its parent's merged output. Insufficient
// data is not an error anywhere in this crate - those paths return
// None/empty instead.
// ============================================================================

use thiserror::Error;

use crate::types::TimeWindow;

/// The main error type for the engine. All subsystem errors convert into it.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl EngineError {
    /// Whether retrying the failed operation can ever succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Validation(_) => false,
            EngineError::Store(e) => e.is_recoverable(),
            EngineError::Compute(_) => true,
            EngineError::Config(_) => false,
            EngineError::Internal(_) => false,
            EngineError::ShuttingDown => false,
        }
    }

    /// Error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Store(_) => "store",
            EngineError::Compute(_) => "compute",
            EngineError::Config(_) => "config",
            EngineError::Internal(_) => "internal",
            EngineError::ShuttingDown => "shutdown",
        }
    }
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

// ----------------------------------------------------------------------------
// Validation Errors
// ----------------------------------------------------------------------------

/// Malformed input from a caller. Terminal; never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Metric name must not be empty")]
    EmptyMetricName,

    #[error("Metric name '{name}' exceeds {max} characters")]
    MetricNameTooLong { name: String, max: usize },

    #[error("Metric '{metric}' has non-finite value {value}")]
    NonFiniteValue { metric: String, value: f64 },

    #[error("Metric '{metric}' has invalid dimensions")]
    InvalidDimensions { metric: String },

    #[error("Aggregation rule '{rule}' has no source metrics")]
    EmptySourceMetrics { rule: String },

    #[error("Query limit {requested} exceeds maximum {max}")]
    LimitTooLarge { requested: usize, max: usize },

    #[error("Invalid time range: start {start} is after end {end}")]
    InvertedTimeRange { start: i64, end: i64 },

    #[error("Forecast horizon must be between 1 and {max} days, got {requested}")]
    InvalidHorizon { requested: usize, max: usize },

    #[error("Unknown rule: {rule_id}")]
    UnknownRule { rule_id: String },
}

// ----------------------------------------------------------------------------
// Store Errors
// ----------------------------------------------------------------------------

/// A failure at the persistence boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Bulk insert of {count} observations failed: {message}")]
    InsertFailed { count: usize, message: String },

    #[error("Query failed: {message}")]
    QueryFailed { message: String },

    #[error("Upsert failed for {entity}: {message}")]
    UpsertFailed { entity: String, message: String },

    #[error("Store call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            StoreError::InsertFailed { .. } => true,
            StoreError::QueryFailed { .. } => true,
            StoreError::UpsertFailed { .. } => true,
            StoreError::Timeout { .. } => true,
            StoreError::Unavailable { .. } => true,
        }
    }

    pub fn query_failed(message: impl Into<String>) -> Self {
        StoreError::QueryFailed {
            message: message.into(),
        }
    }

    pub fn upsert_failed(entity: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::UpsertFailed {
            entity: entity.into(),
            message: message.into(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// ----------------------------------------------------------------------------
// Compute Errors
// ----------------------------------------------------------------------------

/// One analysis pass, aggregation rule, or model fit failed. The failing
/// unit's contribution is dropped; its siblings are unaffected.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Aggregation rule '{rule}' ({window}) failed: {message}")]
    RuleFailed {
        rule: String,
        window: TimeWindow,
        message: String,
    },

    #[error("Insight pass '{pass}' failed: {message}")]
    PassFailed { pass: String, message: String },

    #[error("Model training for '{metric}' failed: {message}")]
    TrainingFailed { metric: String, message: String },

    #[error("Store error during {operation}: {source}")]
    StoreUnavailable {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ComputeError {
    pub fn pass_failed(pass: impl Into<String>, message: impl Into<String>) -> Self {
        ComputeError::PassFailed {
            pass: pass.into(),
            message: message.into(),
        }
    }

    pub fn training_failed(metric: impl Into<String>, message: impl Into<String>) -> Self {
        ComputeError::TrainingFailed {
            metric: metric.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: std::path::PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_follows_taxonomy() {
        let validation: EngineError = ValidationError::EmptyMetricName.into();
        assert!(!validation.is_recoverable());
        assert_eq!(validation.category(), "validation");

        let store: EngineError = StoreError::Timeout { timeout_ms: 5000 }.into();
        assert!(store.is_recoverable());

        let compute: EngineError =
            ComputeError::pass_failed("trend", "store went away").into();
        assert!(compute.is_recoverable());
        assert_eq!(compute.category(), "compute");
    }

    #[test]
    fn error_messages_name_the_unit() {
        let err = ComputeError::RuleFailed {
            rule: "hourly-user-activity".into(),
            window: TimeWindow::Hour,
            message: "query timed out".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("hourly-user-activity"));
        assert!(rendered.contains("hour"));
    }
}
