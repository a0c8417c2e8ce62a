// ============================================================================
// CORE TYPE SYSTEM
// ============================================================================
// The fundamental data types that flow through the engine: timestamps,
// dimensions, observations, and the time windows everything rolls up into.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::constants::*;
use crate::error::ValidationError;

// ----------------------------------------------------------------------------
// Timestamps
// ----------------------------------------------------------------------------

/// High-precision timestamp in nanoseconds since Unix epoch.
/// Using i64 allows representing times from ~1677 to ~2262.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a new timestamp from nanoseconds since Unix epoch
    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Create a new timestamp from milliseconds since Unix epoch
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Create a new timestamp from seconds since Unix epoch
    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    /// Get the current wall-clock timestamp
    #[inline]
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_nanos() as i64)
    }

    /// Get nanoseconds value
    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Get milliseconds value
    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    /// Get seconds value
    #[inline]
    pub const fn as_secs(&self) -> i64 {
        self.0 / 1_000_000_000
    }

    /// Calculate duration between two timestamps
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let nanos = self.0.saturating_sub(earlier.0);
        Duration::from_nanos(nanos.max(0) as u64)
    }

    /// Add duration to timestamp
    #[inline]
    pub fn add_duration(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_nanos() as i64))
    }

    /// Subtract duration from timestamp
    #[inline]
    pub fn sub_duration(&self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_nanos() as i64))
    }

    /// Check if timestamp is within a time range (inclusive)
    #[inline]
    pub fn is_within(&self, start: Timestamp, end: Timestamp) -> bool {
        self.0 >= start.0 && self.0 <= end.0
    }

    /// Round down to the start of the hour
    pub fn floor_to_hour(&self) -> Self {
        const HOUR_NANOS: i64 = 3600 * 1_000_000_000;
        Self(self.0.div_euclid(HOUR_NANOS) * HOUR_NANOS)
    }

    /// Round down to midnight UTC
    pub fn floor_to_day(&self) -> Self {
        const DAY_NANOS: i64 = 86400 * 1_000_000_000;
        Self(self.0.div_euclid(DAY_NANOS) * DAY_NANOS)
    }

    /// Round down to the most recent ISO week start (Monday 00:00 UTC)
    pub fn floor_to_week(&self) -> Self {
        let dt = self.to_datetime();
        let days_back = dt.weekday().num_days_from_monday() as i64;
        let monday = dt.date_naive() - ChronoDuration::days(days_back);
        let start = monday.and_hms_opt(0, 0, 0).unwrap_or_default();
        Self::from_datetime(Utc.from_utc_datetime(&start))
    }

    /// Round down to the first of the month (00:00 UTC)
    pub fn floor_to_month(&self) -> Self {
        let dt = self.to_datetime();
        let start = Utc
            .with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or_default();
        Self::from_datetime(start)
    }

    /// Convert to chrono DateTime<Utc>
    #[inline]
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.0.div_euclid(1_000_000_000);
        let nanos = self.0.rem_euclid(1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    }

    /// Create from chrono DateTime<Utc>
    #[inline]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_nanos_opt().unwrap_or(0))
    }

    /// Zero timestamp (Unix epoch)
    pub const EPOCH: Timestamp = Timestamp(0);
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl From<i64> for Timestamp {
    #[inline]
    fn from(nanos: i64) -> Self {
        Self(nanos)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

/// Source of "now" for components that react to the passage of time.
/// Injected so tests can drive flush and staleness checks deterministically.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    #[inline]
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced time source for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    nanos: std::sync::atomic::AtomicI64,
}

impl ManualTimeSource {
    pub fn new(start: Timestamp) -> Self {
        Self {
            nanos: std::sync::atomic::AtomicI64::new(start.as_nanos()),
        }
    }

    pub fn set(&self, ts: Timestamp) {
        self.nanos
            .store(ts.as_nanos(), std::sync::atomic::Ordering::Release);
    }

    pub fn advance(&self, duration: Duration) {
        self.nanos.fetch_add(
            duration.as_nanos() as i64,
            std::sync::atomic::Ordering::AcqRel,
        );
    }
}

impl TimeSource for ManualTimeSource {
    #[inline]
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.nanos.load(std::sync::atomic::Ordering::Acquire))
    }
}

/// Shared handle to a time source.
pub type SharedTimeSource = Arc<dyn TimeSource>;

// ----------------------------------------------------------------------------
// Time Ranges & Windows
// ----------------------------------------------------------------------------

/// An inclusive time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// The trailing range of the given length ending at `end`.
    pub fn trailing(end: Timestamp, length: Duration) -> Self {
        Self {
            start: end.sub_duration(length),
            end,
        }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        ts.is_within(self.start, self.end)
    }

    pub fn duration(&self) -> Duration {
        self.end.duration_since(self.start)
    }
}

/// Bucket granularity for aggregation and trend analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Hour,
    Day,
    Week,
    Month,
}

impl TimeWindow {
    /// Nominal length of one window. Months use 30 days; bucket boundaries
    /// come from `bucket_start`, which is calendar-exact.
    pub fn length(&self) -> Duration {
        match self {
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86_400),
            TimeWindow::Week => Duration::from_secs(7 * 86_400),
            TimeWindow::Month => Duration::from_secs(30 * 86_400),
        }
    }

    /// Start of the window bucket containing `ts`.
    pub fn bucket_start(&self, ts: Timestamp) -> Timestamp {
        match self {
            TimeWindow::Hour => ts.floor_to_hour(),
            TimeWindow::Day => ts.floor_to_day(),
            TimeWindow::Week => ts.floor_to_week(),
            TimeWindow::Month => ts.floor_to_month(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
        }
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Dimensions - Key-Value Grouping Data
// ----------------------------------------------------------------------------

/// A single dimension (key-value pair) attached to an observation.
/// Uses CompactString for small string optimization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    /// Dimension key (e.g., "service", "region", "plan")
    pub key: CompactString,
    /// Dimension value (e.g., "checkout", "eu-west-1", "pro")
    pub value: CompactString,
}

impl Dimension {
    #[inline]
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<CompactString>,
        V: Into<CompactString>,
    {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Check the dimension against the engine's shape limits
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.key.is_empty()
            && self.key.len() <= MAX_DIMENSION_KEY_LENGTH
            && self.value.len() <= MAX_DIMENSION_VALUE_LENGTH
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl<K, V> From<(K, V)> for Dimension
where
    K: Into<CompactString>,
    V: Into<CompactString>,
{
    fn from((key, value): (K, V)) -> Self {
        Self::new(key, value)
    }
}

/// An ordered set of dimensions with stack allocation for small sets.
/// Most observations carry fewer than 8 dimensions.
pub type Dimensions = SmallVec<[Dimension; 8]>;

/// Extension trait for [`Dimensions`].
pub trait DimensionsExt {
    /// Get a dimension value by key
    fn get(&self, key: &str) -> Option<&str>;

    /// Check if a dimension exists
    fn contains_key(&self, key: &str) -> bool;

    /// Add or update a dimension, preserving insertion order
    fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<CompactString>,
        V: Into<CompactString>;

    /// A key-sorted copy of the pairs, for canonical grouping keys
    fn sorted_pairs(&self) -> Vec<(CompactString, CompactString)>;

    /// Check if all dimensions are valid
    fn is_valid(&self) -> bool;
}

impl DimensionsExt for Dimensions {
    fn get(&self, key: &str) -> Option<&str> {
        self.iter()
            .find(|d| d.key.as_str() == key)
            .map(|d| d.value.as_str())
    }

    fn contains_key(&self, key: &str) -> bool {
        self.iter().any(|d| d.key.as_str() == key)
    }

    fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<CompactString>,
        V: Into<CompactString>,
    {
        let key = key.into();
        let value = value.into();
        if let Some(dim) = self.iter_mut().find(|d| d.key == key) {
            dim.value = value;
        } else {
            self.push(Dimension { key, value });
        }
    }

    fn sorted_pairs(&self) -> Vec<(CompactString, CompactString)> {
        let mut pairs: Vec<_> = self
            .iter()
            .map(|d| (d.key.clone(), d.value.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    fn is_valid(&self) -> bool {
        self.len() <= MAX_DIMENSIONS_PER_METRIC && self.iter().all(|d| d.is_valid())
    }
}

/// Create a [`Dimensions`] collection from key-value pairs.
#[macro_export]
macro_rules! dimensions {
    () => {
        smallvec::smallvec![]
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        smallvec::smallvec![
            $($crate::types::Dimension::new($key, $value)),+
        ]
    };
}

// ----------------------------------------------------------------------------
// Metric Observations
// ----------------------------------------------------------------------------

/// The shape of a metric series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonically increasing count (e.g., requests served)
    Counter,
    /// Point-in-time level (e.g., active users)
    Gauge,
    /// Bucketed distribution sample
    Histogram,
    /// Pre-summarized distribution sample
    Summary,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable, timestamped numeric fact emitted by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    /// Metric name (e.g., "users.active")
    pub name: CompactString,
    /// Series shape
    pub kind: MetricKind,
    /// Observed value
    pub value: f64,
    /// Grouping dimensions, in emission order
    #[serde(default)]
    pub dimensions: Dimensions,
    /// When the fact was observed
    pub timestamp: Timestamp,
    /// Emitting component identifier
    pub source: CompactString,
    /// Subject this observation is about, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<CompactString>,
    /// Session this observation belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<CompactString>,
}

impl MetricObservation {
    pub fn new<N, S>(name: N, kind: MetricKind, value: f64, source: S) -> Self
    where
        N: Into<CompactString>,
        S: Into<CompactString>,
    {
        Self {
            name: name.into(),
            kind,
            value,
            dimensions: Dimensions::new(),
            timestamp: Timestamp::now(),
            source: source.into(),
            subject_id: None,
            session_id: None,
        }
    }

    /// Shorthand for a gauge observation
    pub fn gauge<N, S>(name: N, value: f64, source: S) -> Self
    where
        N: Into<CompactString>,
        S: Into<CompactString>,
    {
        Self::new(name, MetricKind::Gauge, value, source)
    }

    /// Shorthand for a counter observation
    pub fn counter<N, S>(name: N, value: f64, source: S) -> Self
    where
        N: Into<CompactString>,
        S: Into<CompactString>,
    {
        Self::new(name, MetricKind::Counter, value, source)
    }

    pub fn with_timestamp(mut self, ts: Timestamp) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn with_dimension<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<CompactString>,
        V: Into<CompactString>,
    {
        self.dimensions.set(key, value);
        self
    }

    pub fn with_subject<S: Into<CompactString>>(mut self, subject_id: S) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_session<S: Into<CompactString>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Validate the observation shape. Rejection here is terminal; the
    /// caller is never asked to retry a malformed observation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyMetricName);
        }
        if self.name.len() > MAX_METRIC_NAME_LENGTH {
            return Err(ValidationError::MetricNameTooLong {
                name: self.name.to_string(),
                max: MAX_METRIC_NAME_LENGTH,
            });
        }
        if !self.value.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                metric: self.name.to_string(),
                value: self.value,
            });
        }
        if !self.dimensions.is_valid() {
            return Err(ValidationError::InvalidDimensions {
                metric: self.name.to_string(),
            });
        }
        Ok(())
    }
}

/// A bare (timestamp, value) pair, the unit of all series math.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl SeriesPoint {
    #[inline]
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn timestamp_floors() {
        // 2024-03-15 14:37:21 UTC
        let ts = Timestamp::from_datetime(Utc.with_ymd_and_hms(2024, 3, 15, 14, 37, 21).unwrap());

        assert_eq!(
            ts.floor_to_hour().to_datetime(),
            Utc.with_ymd_and_hms(2024, 3, 15, 14, 0, 0).unwrap()
        );
        assert_eq!(
            ts.floor_to_day().to_datetime(),
            Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()
        );
        // 2024-03-15 is a Friday; the week starts Monday 2024-03-11
        assert_eq!(
            ts.floor_to_week().to_datetime(),
            Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
        );
        assert_eq!(
            ts.floor_to_month().to_datetime(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn manual_time_source_advances() {
        let clock = ManualTimeSource::new(Timestamp::from_secs(100));
        assert_eq!(clock.now(), Timestamp::from_secs(100));
        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.now(), Timestamp::from_secs(130));
    }

    #[test]
    fn dimensions_set_preserves_order_and_overwrites() {
        let mut dims: Dimensions = dimensions!["region" => "eu", "plan" => "pro"];
        dims.set("region", "us");
        dims.set("tier", "gold");

        assert_eq!(dims.get("region"), Some("us"));
        assert_eq!(dims[0].key, "region");
        assert_eq!(dims[2].key, "tier");
    }

    #[test]
    fn observation_validation_rejects_bad_shapes() {
        let ok = MetricObservation::gauge("users.active", 42.0, "web");
        assert!(ok.validate().is_ok());

        let nan = MetricObservation::gauge("users.active", f64::NAN, "web");
        assert!(matches!(
            nan.validate(),
            Err(ValidationError::NonFiniteValue { .. })
        ));

        let unnamed = MetricObservation::gauge("", 1.0, "web");
        assert!(matches!(
            unnamed.validate(),
            Err(ValidationError::EmptyMetricName)
        ));

        let mut oversized = MetricObservation::gauge("users.active", 1.0, "web");
        for i in 0..40 {
            oversized = oversized.with_dimension(format!("k{i}"), "v");
        }
        assert!(matches!(
            oversized.validate(),
            Err(ValidationError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn window_bucket_starts() {
        let ts = Timestamp::from_datetime(Utc.with_ymd_and_hms(2024, 6, 19, 9, 45, 0).unwrap());
        assert_eq!(
            TimeWindow::Hour.bucket_start(ts).to_datetime().hour(),
            9
        );
        assert_eq!(
            TimeWindow::Month.bucket_start(ts).to_datetime().day(),
            1
        );
    }
}
