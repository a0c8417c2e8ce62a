// ============================================================================
// INSIGHT GENERATOR
// ============================================================================
// Statistical findings over raw and aggregated metrics: trend analysis,
// anomaly detection, cross-metric correlation, and two fixed heuristic
// passes. A generate call fans the five passes out concurrently and merges
// whatever succeeded; a failing pass is logged and omitted, never fatal.
// Insufficient history is "no finding" (None/empty), not an error.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::json;
use smallvec::SmallVec;
use tracing::{debug, warn};
use xxhash_rust::xxh3::Xxh3;

use crate::constants::*;
use crate::error::{ComputeError, EngineResult};
use crate::ingest::{MetricPipeline, MetricQuery};
use crate::stats::{index_axis, Regression, SeriesStats};
use crate::store::MetricStore;
use crate::types::{SeriesPoint, Timestamp};

// ----------------------------------------------------------------------------
// Insight Model
// ----------------------------------------------------------------------------

/// The family of finding an insight represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Trend,
    Anomaly,
    Correlation,
    Prediction,
    Recommendation,
}

impl InsightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::Trend => "trend",
            InsightKind::Anomaly => "anomaly",
            InsightKind::Correlation => "correlation",
            InsightKind::Prediction => "prediction",
            InsightKind::Recommendation => "recommendation",
        }
    }
}

/// Finding severity, ordered so Critical > High > Medium > Low.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Direction of a finding's effect on the business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Positive,
    Negative,
    Neutral,
}

/// A derived, human-readable analytical finding. Immutable once created;
/// later runs supersede it by upserting the same deterministic id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: CompactString,
    pub kind: InsightKind,
    pub category: CompactString,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    /// 0 to 1
    pub confidence: f64,
    pub impact: Impact,
    pub source_metrics: SmallVec<[CompactString; 4]>,
    /// Algorithm-specific payload
    pub data: serde_json::Value,
    pub recommendations: Vec<String>,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

impl Insight {
    /// Deterministic id over (kind, category, title), length-prefixed so
    /// re-runs of the same finding upsert instead of duplicating.
    pub fn make_id(kind: InsightKind, category: &str, title: &str) -> CompactString {
        let mut hasher = Xxh3::new();
        for part in [kind.as_str(), category, title] {
            hasher.update(&(part.len() as u32).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        CompactString::from(format!("{:016x}", hasher.digest()))
    }

    /// Stale findings are filtered by consumers, not purged here.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(false, |exp| now > exp)
    }
}

/// Analysis timeframe for generation and trend lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Day,
    Week,
    Month,
}

impl Timeframe {
    pub fn lookback(&self) -> Duration {
        match self {
            Timeframe::Day => Duration::from_secs(86_400),
            Timeframe::Week => Duration::from_secs(7 * 86_400),
            Timeframe::Month => Duration::from_secs(30 * 86_400),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Day => "day",
            Timeframe::Week => "week",
            Timeframe::Month => "month",
        }
    }
}

// ----------------------------------------------------------------------------
// Analysis Results
// ----------------------------------------------------------------------------

/// Overall movement of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    Volatile,
}

/// One-step-ahead projection with a 95%-equivalent interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Result of trend analysis over one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub metric: CompactString,
    pub direction: TrendDirection,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub coefficient_of_variation: f64,
    pub seasonal: bool,
    pub sample_size: usize,
    pub forecast: ForecastPoint,
}

/// Whether an anomalous point sits above or below the mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyDirection {
    Spike,
    Drop,
}

/// One flagged observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub metric: CompactString,
    pub timestamp: Timestamp,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// Absolute deviation from the mean, in standard deviations
    pub deviation_sigma: f64,
    pub severity: Severity,
    pub direction: AnomalyDirection,
}

/// Strength classification for a reported correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationStrength {
    Weak,
    Moderate,
    Strong,
}

/// One reported metric pair. Symmetric: (a, b) and (b, a) carry the same
/// coefficient magnitude and classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub metric_a: CompactString,
    pub metric_b: CompactString,
    pub coefficient: f64,
    pub sample_size: usize,
    /// Sample-size-based proxy in [0, 1), from the t-statistic
    pub significance: f64,
    pub strength: CorrelationStrength,
}

// ----------------------------------------------------------------------------
// Generator
// ----------------------------------------------------------------------------

/// Runs the analysis passes and persists their findings.
pub struct InsightGenerator {
    pipeline: Arc<MetricPipeline>,
    store: Arc<dyn MetricStore>,
    key_metrics: Vec<CompactString>,
}

impl InsightGenerator {
    pub fn new(
        pipeline: Arc<MetricPipeline>,
        store: Arc<dyn MetricStore>,
        key_metrics: Vec<String>,
    ) -> Self {
        Self {
            pipeline,
            store,
            key_metrics: key_metrics.into_iter().map(CompactString::from).collect(),
        }
    }

    /// Fetch one metric's series over the trailing period, oldest first.
    async fn series(
        &self,
        metric: &str,
        lookback: Duration,
    ) -> EngineResult<Vec<SeriesPoint>> {
        let now = self.pipeline.now();
        let query = MetricQuery::new()
            .metric(metric)
            .between(now.sub_duration(lookback), now)
            .limit(MAX_QUERY_LIMIT);
        let mut observations = self.pipeline.query_observations(&query).await?;
        observations.reverse();
        Ok(observations
            .iter()
            .map(|o| SeriesPoint::new(o.timestamp, o.value))
            .collect())
    }

    // ------------------------------------------------------------------
    // Trend Analysis
    // ------------------------------------------------------------------

    /// Least-squares trend over the metric's recent observations.
    /// Fewer than 3 points is insufficient data, reported as `None`.
    pub async fn trend(
        &self,
        metric: &str,
        period: Timeframe,
    ) -> EngineResult<Option<TrendAnalysis>> {
        let points = self.series(metric, period.lookback()).await?;
        Ok(Self::trend_of_points(metric, &points))
    }

    fn trend_of_points(metric: &str, points: &[SeriesPoint]) -> Option<TrendAnalysis> {
        if points.len() < MIN_TREND_POINTS {
            return None;
        }

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let x = index_axis(values.len());
        let fit = Regression::linear(&x, &values)?;

        let cv = SeriesStats::coefficient_of_variation(&values);
        let direction = if cv > VOLATILITY_CV_THRESHOLD {
            TrendDirection::Volatile
        } else if fit.slope.abs() < STABLE_SLOPE_EPSILON {
            TrendDirection::Stable
        } else if fit.slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };

        let next = fit.predict(values.len() as f64);
        let margin = Z_95 * fit.residual_std;

        Some(TrendAnalysis {
            metric: metric.into(),
            direction,
            slope: fit.slope,
            intercept: fit.intercept,
            r_squared: fit.r_squared,
            coefficient_of_variation: cv,
            seasonal: Self::detect_seasonality(&values),
            sample_size: values.len(),
            forecast: ForecastPoint {
                value: next,
                lower: next - margin,
                upper: next + margin,
            },
        })
    }

    /// Weekly seasonality: mean correlation of successive 7-point windows.
    fn detect_seasonality(values: &[f64]) -> bool {
        let window = SEASONALITY_WINDOW;
        if values.len() < window * 2 {
            return false;
        }

        let mut correlations = Vec::new();
        let mut start = 0;
        while start + 2 * window <= values.len() {
            let current = &values[start..start + window];
            let next = &values[start + window..start + 2 * window];
            correlations.push(SeriesStats::correlation(current, next));
            start += window;
        }

        !correlations.is_empty()
            && SeriesStats::mean(&correlations) > SEASONALITY_CORRELATION_THRESHOLD
    }

    // ------------------------------------------------------------------
    // Anomaly Detection
    // ------------------------------------------------------------------

    /// Deviation-threshold anomaly scan over the trailing lookback.
    /// Fewer than 10 points yields no findings.
    pub async fn anomalies(
        &self,
        metric: &str,
        lookback_days: u32,
    ) -> EngineResult<Vec<Anomaly>> {
        let lookback = Duration::from_secs(u64::from(lookback_days) * 86_400);
        let points = self.series(metric, lookback).await?;
        Ok(Self::anomalies_of_points(metric, &points))
    }

    fn anomalies_of_points(metric: &str, points: &[SeriesPoint]) -> Vec<Anomaly> {
        if points.len() < MIN_ANOMALY_POINTS {
            return Vec::new();
        }

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let mean = SeriesStats::mean(&values);
        let std_dev = SeriesStats::std_dev(&values);
        if std_dev == 0.0 {
            return Vec::new();
        }

        points
            .iter()
            .filter_map(|p| {
                let sigma = (p.value - mean).abs() / std_dev;
                if sigma <= ANOMALY_SIGMA_THRESHOLD {
                    return None;
                }
                let severity = if sigma > 3.0 {
                    Severity::High
                } else if sigma > 2.5 {
                    Severity::Medium
                } else {
                    Severity::Low
                };
                Some(Anomaly {
                    metric: metric.into(),
                    timestamp: p.timestamp,
                    value: p.value,
                    mean,
                    std_dev,
                    deviation_sigma: sigma,
                    severity,
                    direction: if p.value > mean {
                        AnomalyDirection::Spike
                    } else {
                        AnomalyDirection::Drop
                    },
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Correlation Analysis
    // ------------------------------------------------------------------

    /// Pairwise Pearson correlation across the metric set. Series are
    /// aligned on hour buckets; pairs with fewer than 5 shared buckets or
    /// |r| at or below 0.3 are not reported.
    pub async fn correlate(
        &self,
        metrics: &[CompactString],
        period: Timeframe,
    ) -> EngineResult<Vec<Correlation>> {
        let mut bucketed: Vec<(CompactString, ahash::AHashMap<i64, f64>)> = Vec::new();
        for metric in metrics {
            let points = self.series(metric, period.lookback()).await?;
            bucketed.push((metric.clone(), hour_buckets(&points)));
        }

        let mut findings = Vec::new();
        for i in 0..bucketed.len() {
            for j in (i + 1)..bucketed.len() {
                let (name_a, series_a) = &bucketed[i];
                let (name_b, series_b) = &bucketed[j];

                let mut shared: Vec<i64> = series_a
                    .keys()
                    .filter(|k| series_b.contains_key(k))
                    .copied()
                    .collect();
                if shared.len() < MIN_CORRELATION_POINTS {
                    continue;
                }
                shared.sort_unstable();

                let x: Vec<f64> = shared.iter().map(|k| series_a[k]).collect();
                let y: Vec<f64> = shared.iter().map(|k| series_b[k]).collect();
                let r = SeriesStats::correlation(&x, &y);

                if r.abs() <= CORRELATION_WEAK_THRESHOLD {
                    continue;
                }

                let strength = if r.abs() > CORRELATION_STRONG_THRESHOLD {
                    CorrelationStrength::Strong
                } else {
                    CorrelationStrength::Moderate
                };

                findings.push(Correlation {
                    metric_a: name_a.clone(),
                    metric_b: name_b.clone(),
                    coefficient: r,
                    sample_size: shared.len(),
                    significance: significance_proxy(r, shared.len()),
                    strength,
                });
            }
        }
        Ok(findings)
    }

    // ------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------

    /// Run all five analysis passes concurrently over the key-metric
    /// catalog, merge and deduplicate the findings, persist them, and
    /// return them sorted by severity then confidence, both descending.
    pub async fn generate(&self, timeframe: Timeframe) -> EngineResult<Vec<Insight>> {
        let now = self.pipeline.now();

        let (trends, anomalies, correlations, performance, business) = tokio::join!(
            self.trend_pass(timeframe, now),
            self.anomaly_pass(timeframe, now),
            self.correlation_pass(timeframe, now),
            self.performance_pass(timeframe, now),
            self.business_pass(timeframe, now),
        );

        let mut insights: Vec<Insight> = Vec::new();
        for (pass, outcome) in [
            ("trend", trends),
            ("anomaly", anomalies),
            ("correlation", correlations),
            ("performance", performance),
            ("business", business),
        ] {
            match outcome {
                Ok(found) => insights.extend(found),
                Err(e) => warn!(
                    target: "vantage::insight",
                    pass,
                    error = %e,
                    "Analysis pass failed, omitting its findings"
                ),
            }
        }

        // Later passes never produce the same id twice in one run, but a
        // metric can appear in several passes' catalogs; keep the first.
        let mut seen = ahash::AHashSet::new();
        insights.retain(|i| seen.insert(i.id.clone()));

        insights.sort_by(|a, b| {
            b.severity.cmp(&a.severity).then(
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });

        for insight in &insights {
            if let Err(e) = self.store.upsert_insight(insight).await {
                warn!(
                    target: "vantage::insight",
                    id = %insight.id,
                    error = %e,
                    "Failed to persist insight"
                );
            }
        }

        debug!(
            target: "vantage::insight",
            timeframe = timeframe.as_str(),
            count = insights.len(),
            "Insight generation complete"
        );
        Ok(insights)
    }

    /// Persisted findings, newest first.
    pub async fn insight_history(
        &self,
        category: Option<&str>,
        limit: usize,
    ) -> EngineResult<Vec<Insight>> {
        Ok(self.store.query_insights(category, limit).await?)
    }

    async fn trend_pass(
        &self,
        timeframe: Timeframe,
        now: Timestamp,
    ) -> Result<Vec<Insight>, ComputeError> {
        let mut insights = Vec::new();
        for metric in &self.key_metrics {
            let analysis = self
                .trend(metric, timeframe)
                .await
                .map_err(|e| ComputeError::pass_failed("trend", e.to_string()))?;
            if let Some(trend) = analysis {
                if let Some(insight) = trend_insight(&trend, now) {
                    insights.push(insight);
                }
            }
        }
        Ok(insights)
    }

    async fn anomaly_pass(
        &self,
        timeframe: Timeframe,
        now: Timestamp,
    ) -> Result<Vec<Insight>, ComputeError> {
        let lookback_days = (timeframe.lookback().as_secs() / 86_400).max(1) as u32;
        let mut insights = Vec::new();
        for metric in &self.key_metrics {
            let found = self
                .anomalies(metric, lookback_days)
                .await
                .map_err(|e| ComputeError::pass_failed("anomaly", e.to_string()))?;
            insights.extend(found.iter().map(|a| anomaly_insight(a, now)));
        }
        Ok(insights)
    }

    async fn correlation_pass(
        &self,
        timeframe: Timeframe,
        now: Timestamp,
    ) -> Result<Vec<Insight>, ComputeError> {
        let found = self
            .correlate(&self.key_metrics, timeframe)
            .await
            .map_err(|e| ComputeError::pass_failed("correlation", e.to_string()))?;
        Ok(found.iter().map(|c| correlation_insight(c, now)).collect())
    }

    async fn performance_pass(
        &self,
        timeframe: Timeframe,
        now: Timestamp,
    ) -> Result<Vec<Insight>, ComputeError> {
        let points = self
            .series("response.time", timeframe.lookback())
            .await
            .map_err(|e| ComputeError::pass_failed("performance", e.to_string()))?;
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let avg = SeriesStats::mean(&values);
        if avg <= RESPONSE_TIME_THRESHOLD_MS {
            return Ok(Vec::new());
        }

        let severity = if avg > 2.0 * RESPONSE_TIME_THRESHOLD_MS {
            Severity::High
        } else {
            Severity::Medium
        };
        let title = "Average response time above threshold".to_string();
        Ok(vec![Insight {
            id: Insight::make_id(InsightKind::Recommendation, "performance", &title),
            kind: InsightKind::Recommendation,
            category: "performance".into(),
            description: format!(
                "Average response time over the last {} was {avg:.0}ms, above the {RESPONSE_TIME_THRESHOLD_MS:.0}ms target.",
                timeframe.as_str()
            ),
            title,
            severity,
            confidence: 0.9,
            impact: Impact::Negative,
            source_metrics: smallvec::smallvec!["response.time".into()],
            data: json!({ "average_ms": avg, "threshold_ms": RESPONSE_TIME_THRESHOLD_MS }),
            recommendations: vec![
                "Profile the slowest endpoints and add caching where reads dominate".into(),
                "Check store query plans for missing indexes".into(),
            ],
            created_at: now,
            expires_at: None,
        }])
    }

    async fn business_pass(
        &self,
        timeframe: Timeframe,
        now: Timestamp,
    ) -> Result<Vec<Insight>, ComputeError> {
        let points = self
            .series("bounce.rate", timeframe.lookback())
            .await
            .map_err(|e| ComputeError::pass_failed("business", e.to_string()))?;
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let avg = SeriesStats::mean(&values);
        if avg <= BOUNCE_RATE_THRESHOLD {
            return Ok(Vec::new());
        }

        let title = "Bounce rate above threshold".to_string();
        Ok(vec![Insight {
            id: Insight::make_id(InsightKind::Recommendation, "business", &title),
            kind: InsightKind::Recommendation,
            category: "business".into(),
            description: format!(
                "Average bounce rate over the last {} was {:.0}%, above the {:.0}% target.",
                timeframe.as_str(),
                avg * 100.0,
                BOUNCE_RATE_THRESHOLD * 100.0
            ),
            title,
            severity: Severity::Medium,
            confidence: 0.85,
            impact: Impact::Negative,
            source_metrics: smallvec::smallvec!["bounce.rate".into()],
            data: json!({ "average": avg, "threshold": BOUNCE_RATE_THRESHOLD }),
            recommendations: vec![
                "Review landing page load times and first-screen content".into(),
                "Compare bounce rates per acquisition channel to find the outlier".into(),
            ],
            created_at: now,
            expires_at: None,
        }])
    }
}

// ----------------------------------------------------------------------------
// Finding -> Insight Conversion
// ----------------------------------------------------------------------------

/// Stable metrics yield no insight; movement and volatility do.
fn trend_insight(trend: &TrendAnalysis, now: Timestamp) -> Option<Insight> {
    let (title, severity, impact) = match trend.direction {
        TrendDirection::Stable => return None,
        TrendDirection::Increasing => (
            format!("{} is trending up", trend.metric),
            Severity::Low,
            Impact::Positive,
        ),
        TrendDirection::Decreasing => (
            format!("{} is trending down", trend.metric),
            Severity::Medium,
            Impact::Negative,
        ),
        TrendDirection::Volatile => (
            format!("{} is volatile", trend.metric),
            Severity::Medium,
            Impact::Neutral,
        ),
    };

    let mut recommendations = Vec::new();
    if trend.direction == TrendDirection::Volatile {
        recommendations
            .push("Investigate recent releases or traffic shifts driving the variance".into());
    }
    if trend.seasonal {
        recommendations.push("Weekly pattern detected; compare against the same weekday".into());
    }

    Some(Insight {
        id: Insight::make_id(InsightKind::Trend, "trend", &title),
        kind: InsightKind::Trend,
        category: "trend".into(),
        description: format!(
            "{} over {} points: slope {:.4}, next value projected at {:.2} (95% interval {:.2}..{:.2}).",
            trend.metric,
            trend.sample_size,
            trend.slope,
            trend.forecast.value,
            trend.forecast.lower,
            trend.forecast.upper
        ),
        title,
        severity,
        confidence: trend.r_squared.clamp(0.0, 1.0),
        impact,
        source_metrics: smallvec::smallvec![trend.metric.clone()],
        data: serde_json::to_value(trend).unwrap_or_default(),
        recommendations,
        created_at: now,
        expires_at: None,
    })
}

fn anomaly_insight(anomaly: &Anomaly, now: Timestamp) -> Insight {
    let direction = match anomaly.direction {
        AnomalyDirection::Spike => "spike",
        AnomalyDirection::Drop => "drop",
    };
    let title = format!(
        "{} {} at {}",
        anomaly.metric, direction, anomaly.timestamp
    );
    Insight {
        id: Insight::make_id(InsightKind::Anomaly, "anomaly", &title),
        kind: InsightKind::Anomaly,
        category: "anomaly".into(),
        description: format!(
            "{} deviated {:.1} standard deviations from its mean ({:.2} vs {:.2}).",
            anomaly.metric, anomaly.deviation_sigma, anomaly.value, anomaly.mean
        ),
        title,
        severity: anomaly.severity,
        confidence: (anomaly.deviation_sigma / 4.0).clamp(0.5, 0.99),
        impact: match anomaly.direction {
            AnomalyDirection::Spike => Impact::Neutral,
            AnomalyDirection::Drop => Impact::Negative,
        },
        source_metrics: smallvec::smallvec![anomaly.metric.clone()],
        data: serde_json::to_value(anomaly).unwrap_or_default(),
        recommendations: vec![format!(
            "Check events around {} for the cause of the {direction}",
            anomaly.timestamp
        )],
        created_at: now,
        expires_at: Some(now.add_duration(Duration::from_secs(
            ANOMALY_INSIGHT_TTL_HOURS as u64 * 3600,
        ))),
    }
}

fn correlation_insight(correlation: &Correlation, now: Timestamp) -> Insight {
    let relation = if correlation.coefficient > 0.0 {
        "moves with"
    } else {
        "moves against"
    };
    let title = format!(
        "{} {} {}",
        correlation.metric_a, relation, correlation.metric_b
    );
    Insight {
        id: Insight::make_id(InsightKind::Correlation, "correlation", &title),
        kind: InsightKind::Correlation,
        category: "correlation".into(),
        description: format!(
            "Pearson r = {:.2} over {} aligned points ({:?}).",
            correlation.coefficient, correlation.sample_size, correlation.strength
        ),
        title,
        severity: match correlation.strength {
            CorrelationStrength::Strong => Severity::Medium,
            _ => Severity::Low,
        },
        confidence: (correlation.coefficient.abs() * correlation.significance).clamp(0.0, 1.0),
        impact: Impact::Neutral,
        source_metrics: smallvec::smallvec![
            correlation.metric_a.clone(),
            correlation.metric_b.clone()
        ],
        data: serde_json::to_value(correlation).unwrap_or_default(),
        recommendations: Vec::new(),
        created_at: now,
        expires_at: None,
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Average value per hour bucket, keyed by bucket start seconds.
fn hour_buckets(points: &[SeriesPoint]) -> ahash::AHashMap<i64, f64> {
    let mut sums: ahash::AHashMap<i64, (f64, usize)> = ahash::AHashMap::new();
    for p in points {
        let entry = sums
            .entry(p.timestamp.floor_to_hour().as_secs())
            .or_insert((0.0, 0));
        entry.0 += p.value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(k, (sum, n))| (k, sum / n as f64))
        .collect()
}

/// Significance proxy in [0, 1): the pair's t-statistic squashed through
/// t / (t + 2), so it grows with both |r| and sample size.
fn significance_proxy(r: f64, n: usize) -> f64 {
    if n < 3 || r.abs() >= 1.0 {
        return if r.abs() >= 1.0 { 0.99 } else { 0.0 };
    }
    let t = r.abs() * ((n as f64 - 2.0) / (1.0 - r * r)).sqrt();
    (t / (t + 2.0)).clamp(0.0, 0.99)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::store::{FailingStore, MemoryStore};
    use crate::types::{ManualTimeSource, MetricObservation};

    const HOUR: Duration = Duration::from_secs(3600);

    fn fixture(
        now: Timestamp,
        key_metrics: &[&str],
    ) -> (Arc<MetricPipeline>, InsightGenerator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualTimeSource::new(now));
        let pipeline = Arc::new(MetricPipeline::with_clock(
            Arc::clone(&store) as Arc<dyn MetricStore>,
            &IngestConfig::default(),
            clock,
        ));
        let generator = InsightGenerator::new(
            Arc::clone(&pipeline),
            Arc::clone(&store) as Arc<dyn MetricStore>,
            key_metrics.iter().map(|s| s.to_string()).collect(),
        );
        (pipeline, generator, store)
    }

    async fn seed_hourly(
        pipeline: &MetricPipeline,
        metric: &str,
        now: Timestamp,
        values: &[f64],
    ) {
        let batch: Vec<MetricObservation> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                MetricObservation::gauge(metric, *v, "test").with_timestamp(
                    now.sub_duration(HOUR * (values.len() - i) as u32),
                )
            })
            .collect();
        pipeline.submit_batch(batch).await.unwrap();
        pipeline.flush_now().await;
    }

    #[tokio::test]
    async fn increasing_series_reports_upward_trend() {
        let now = Timestamp::from_secs(100 * 3600);
        let (pipeline, generator, _store) = fixture(now, &["m"]);
        let values: Vec<f64> = (1..=15).map(|i| i as f64).collect();
        seed_hourly(&pipeline, "m", now, &values).await;

        let trend = generator.trend("m", Timeframe::Day).await.unwrap().unwrap();
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert!(trend.slope > 0.0);
        assert!(trend.forecast.value > *values.last().unwrap());
        assert!(trend.forecast.lower <= trend.forecast.value);
        assert!(trend.forecast.upper >= trend.forecast.value);
    }

    #[tokio::test]
    async fn flat_series_is_stable_and_spiky_series_is_volatile() {
        let now = Timestamp::from_secs(100 * 3600);
        let (pipeline, generator, _store) = fixture(now, &["flat", "spiky"]);
        seed_hourly(&pipeline, "flat", now, &[5.0; 12]).await;
        seed_hourly(
            &pipeline,
            "spiky",
            now,
            &[1.0, 9.0, 1.0, 12.0, 2.0, 8.0, 1.0, 11.0, 2.0, 9.0],
        )
        .await;

        let flat = generator
            .trend("flat", Timeframe::Day)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(flat.direction, TrendDirection::Stable);

        let spiky = generator
            .trend("spiky", Timeframe::Day)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spiky.direction, TrendDirection::Volatile);
        assert!(spiky.coefficient_of_variation > VOLATILITY_CV_THRESHOLD);
    }

    #[tokio::test]
    async fn too_few_points_is_no_finding_not_an_error() {
        let now = Timestamp::from_secs(100 * 3600);
        let (pipeline, generator, _store) = fixture(now, &["m"]);
        seed_hourly(&pipeline, "m", now, &[1.0, 2.0]).await;

        assert!(generator.trend("m", Timeframe::Day).await.unwrap().is_none());
        assert!(generator.anomalies("m", 7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_outlier_is_flagged_high_spike() {
        let now = Timestamp::from_secs(200 * 3600);
        let (pipeline, generator, _store) = fixture(now, &["m"]);

        // 20 quiet points around zero plus one injected at 10
        let mut values = vec![
            0.1, -0.2, 0.3, -0.1, 0.2, -0.3, 0.15, -0.25, 0.05, -0.15, 0.2, -0.1, 0.3, -0.2, 0.1,
            -0.05, 0.25, -0.3, 0.12, -0.18,
        ];
        values.push(10.0);
        seed_hourly(&pipeline, "m", now, &values).await;

        let anomalies = generator.anomalies("m", 7).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].value, 10.0);
        assert_eq!(anomalies[0].severity, Severity::High);
        assert_eq!(anomalies[0].direction, AnomalyDirection::Spike);
        assert!(anomalies[0].deviation_sigma > 3.0);
    }

    #[tokio::test]
    async fn correlation_is_symmetric_under_reordering() {
        let now = Timestamp::from_secs(300 * 3600);
        let (pipeline, generator, _store) = fixture(now, &[]);

        let a: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let b: Vec<f64> = a.iter().map(|v| 2.0 * v + 3.0).collect();
        seed_hourly(&pipeline, "a", now, &a).await;
        seed_hourly(&pipeline, "b", now, &b).await;

        let forward = generator
            .correlate(&["a".into(), "b".into()], Timeframe::Day)
            .await
            .unwrap();
        let backward = generator
            .correlate(&["b".into(), "a".into()], Timeframe::Day)
            .await
            .unwrap();

        assert_eq!(forward.len(), 1);
        assert_eq!(backward.len(), 1);
        assert!(
            (forward[0].coefficient.abs() - backward[0].coefficient.abs()).abs() < 1e-9
        );
        assert_eq!(forward[0].strength, backward[0].strength);
        assert_eq!(forward[0].strength, CorrelationStrength::Strong);
    }

    #[tokio::test]
    async fn uncorrelated_pairs_are_not_reported() {
        let now = Timestamp::from_secs(300 * 3600);
        let (pipeline, generator, _store) = fixture(now, &[]);

        seed_hourly(
            &pipeline,
            "a",
            now,
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        )
        .await;
        seed_hourly(
            &pipeline,
            "noise",
            now,
            &[4.0, -1.0, 3.5, 0.2, 4.1, -0.8, 3.2, 0.5],
        )
        .await;

        let found = generator
            .correlate(&["a".into(), "noise".into()], Timeframe::Day)
            .await
            .unwrap();
        assert!(found.iter().all(|c| c.coefficient.abs() > 0.3));
    }

    #[tokio::test]
    async fn generate_sorts_by_severity_then_confidence_and_persists() {
        let now = Timestamp::from_secs(500 * 3600);
        let (pipeline, generator, store) =
            fixture(now, &["users.active", "response.time"]);

        // A decreasing key metric and a response time well over threshold
        let declining: Vec<f64> = (0..12).map(|i| 100.0 - 3.0 * i as f64).collect();
        seed_hourly(&pipeline, "users.active", now, &declining).await;
        seed_hourly(&pipeline, "response.time", now, &[2500.0; 8]).await;

        let insights = generator.generate(Timeframe::Day).await.unwrap();
        assert!(!insights.is_empty());

        for pair in insights.windows(2) {
            let ordered = pair[0].severity > pair[1].severity
                || (pair[0].severity == pair[1].severity
                    && pair[0].confidence >= pair[1].confidence);
            assert!(ordered, "insights not sorted: {pair:?}");
        }

        assert!(insights
            .iter()
            .any(|i| i.kind == InsightKind::Recommendation && i.category == "performance"));

        let history = generator.insight_history(None, 50).await.unwrap();
        assert_eq!(history.len(), insights.len());

        // Second run supersedes, not duplicates
        generator.generate(Timeframe::Day).await.unwrap();
        let history = generator.insight_history(None, 50).await.unwrap();
        assert_eq!(history.len(), insights.len());
        assert_eq!(store.observation_count(), 20);
    }

    #[tokio::test]
    async fn generate_survives_an_unreachable_store() {
        let failing: Arc<dyn MetricStore> = Arc::new(FailingStore);
        let pipeline = Arc::new(MetricPipeline::new(
            Arc::clone(&failing),
            &IngestConfig::default(),
        ));
        let generator =
            InsightGenerator::new(pipeline, failing, vec!["users.active".to_string()]);

        // Every pass fails; the call still returns an empty merged result
        let insights = generator.generate(Timeframe::Day).await.unwrap();
        assert!(insights.is_empty());
    }

    #[tokio::test]
    async fn anomaly_insights_expire_after_a_day() {
        let now = Timestamp::from_secs(1000);
        let anomaly = Anomaly {
            metric: "m".into(),
            timestamp: now,
            value: 10.0,
            mean: 0.0,
            std_dev: 1.0,
            deviation_sigma: 10.0,
            severity: Severity::High,
            direction: AnomalyDirection::Spike,
        };
        let insight = anomaly_insight(&anomaly, now);

        assert!(!insight.is_expired(now.add_duration(Duration::from_secs(23 * 3600))));
        assert!(insight.is_expired(now.add_duration(Duration::from_secs(25 * 3600))));
    }

    #[test]
    fn insight_ids_are_deterministic_and_distinct() {
        let a = Insight::make_id(InsightKind::Trend, "trend", "users.active is trending up");
        let b = Insight::make_id(InsightKind::Trend, "trend", "users.active is trending up");
        let c = Insight::make_id(InsightKind::Anomaly, "trend", "users.active is trending up");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
