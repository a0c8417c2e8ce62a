// ============================================================================
// CONSTANTS
// ============================================================================
// Global constants that define the behavior and limits of the engine.
// ============================================================================

/// Engine version - follows semantic versioning
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENGINE_NAME: &str = "vantage-engine";

// ----------------------------------------------------------------------------
// Ingestion Buffer
// ----------------------------------------------------------------------------

/// Observations buffered before an automatic flush to the store
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Periodic flush interval for the ingestion buffer (seconds)
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;

/// Timeout applied to every store call (seconds)
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 10;

// ----------------------------------------------------------------------------
// Query Limits
// ----------------------------------------------------------------------------

/// Default number of observations returned by a query
pub const DEFAULT_QUERY_LIMIT: usize = 1000;

/// Hard cap on query result size
pub const MAX_QUERY_LIMIT: usize = 1000;

// ----------------------------------------------------------------------------
// Metric Shape Limits
// ----------------------------------------------------------------------------

/// Maximum metric name length
pub const MAX_METRIC_NAME_LENGTH: usize = 256;

/// Maximum number of dimensions per observation
pub const MAX_DIMENSIONS_PER_METRIC: usize = 32;

/// Maximum dimension key length
pub const MAX_DIMENSION_KEY_LENGTH: usize = 128;

/// Maximum dimension value length
pub const MAX_DIMENSION_VALUE_LENGTH: usize = 512;

// ----------------------------------------------------------------------------
// Statistical Thresholds
// ----------------------------------------------------------------------------

/// Minimum points for trend analysis
pub const MIN_TREND_POINTS: usize = 3;

/// Minimum timestamp-aligned points for a correlation pair
pub const MIN_CORRELATION_POINTS: usize = 5;

/// Minimum points for anomaly detection
pub const MIN_ANOMALY_POINTS: usize = 10;

/// Minimum daily points for model training
pub const MIN_TRAINING_POINTS: usize = 5;

/// Deviation threshold for anomaly flagging (standard deviations)
pub const ANOMALY_SIGMA_THRESHOLD: f64 = 2.0;

/// Slope magnitude below which a trend is considered stable
pub const STABLE_SLOPE_EPSILON: f64 = 0.01;

/// Coefficient of variation above which a metric is volatile
pub const VOLATILITY_CV_THRESHOLD: f64 = 0.3;

/// Mean window-to-window correlation above which a series is seasonal
pub const SEASONALITY_CORRELATION_THRESHOLD: f64 = 0.3;

/// Window length used for weekly seasonality detection
pub const SEASONALITY_WINDOW: usize = 7;

/// |r| boundary between unreported and weak correlation
pub const CORRELATION_WEAK_THRESHOLD: f64 = 0.3;

/// |r| boundary between moderate and strong correlation
pub const CORRELATION_STRONG_THRESHOLD: f64 = 0.7;

/// Two-sided 95% z-value used for forecast intervals
pub const Z_95: f64 = 1.96;

/// Fixed percentile level for percentile aggregation rules
pub const PERCENTILE_LEVEL: f64 = 0.95;

// ----------------------------------------------------------------------------
// Heuristic Pass Thresholds
// ----------------------------------------------------------------------------

/// Average response time above which a performance recommendation fires (ms)
pub const RESPONSE_TIME_THRESHOLD_MS: f64 = 1000.0;

/// Bounce rate above which a business recommendation fires
pub const BOUNCE_RATE_THRESHOLD: f64 = 0.6;

// ----------------------------------------------------------------------------
// Prediction Models
// ----------------------------------------------------------------------------

/// Maximum days of history used to train a model
pub const TRAINING_LOOKBACK_DAYS: i64 = 90;

/// A cached model older than this is retrained (days)
pub const MODEL_MAX_AGE_DAYS: i64 = 7;

/// A cached model below this accuracy is retrained
pub const MODEL_MIN_ACCURACY: f64 = 0.7;

/// Success composite at or above this is low risk
pub const RISK_LOW_THRESHOLD: f64 = 0.7;

/// Success composite at or above this is medium risk
pub const RISK_MEDIUM_THRESHOLD: f64 = 0.4;

// ----------------------------------------------------------------------------
// Insight Lifecycle
// ----------------------------------------------------------------------------

/// Anomaly insights expire this many hours after creation
pub const ANOMALY_INSIGHT_TTL_HOURS: i64 = 24;

/// Interval between scheduled insight refreshes (seconds)
pub const INSIGHT_REFRESH_INTERVAL_SECS: u64 = 3600;

/// Default limit for insight history queries
pub const DEFAULT_INSIGHT_HISTORY_LIMIT: usize = 50;

// ----------------------------------------------------------------------------
// Shutdown
// ----------------------------------------------------------------------------

/// Grace period for shutdown (seconds)
pub const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 30;
