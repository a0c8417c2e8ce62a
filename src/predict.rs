// ============================================================================
// PREDICTIVE ANALYTICS
// ============================================================================
// Lightweight per-metric forecasting on daily-bucketed history, a cached
// model per metric, and a weighted composite success score per subject.
// Model selection is a closed enum dispatch: adding a model kind is a
// compile-time exhaustive-match change, not a string comparison.
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use compact_str::CompactString;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::*;
use crate::error::{EngineResult, ValidationError};
use crate::ingest::{MetricPipeline, MetricQuery};
use crate::stats::{index_axis, Regression, SeriesStats};
use crate::store::MetricStore;
use crate::types::{TimeRange, TimeWindow, Timestamp};

const DAY_SECS: u64 = 86_400;

// ----------------------------------------------------------------------------
// Model Kinds & Parameters
// ----------------------------------------------------------------------------

/// The closed set of forecasting models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Linear,
    Polynomial,
    Seasonal,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Linear, ModelKind::Polynomial, ModelKind::Seasonal];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::Polynomial => "polynomial",
            ModelKind::Seasonal => "seasonal",
        }
    }
}

/// What the caller asked for: a specific model, or the best of all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelChoice {
    #[default]
    Auto,
    Kind(ModelKind),
}

/// Fitted coefficients, one variant per model kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelParams {
    Linear {
        slope: f64,
        intercept: f64,
        residual_std: f64,
    },
    Polynomial {
        coefficients: [f64; 3],
        residual_std: f64,
    },
    Seasonal {
        slope: f64,
        intercept: f64,
        /// Multiplicative factor per weekday, Monday first
        weekday_factors: [f64; 7],
        residual_std: f64,
    },
}

impl ModelParams {
    fn kind(&self) -> ModelKind {
        match self {
            ModelParams::Linear { .. } => ModelKind::Linear,
            ModelParams::Polynomial { .. } => ModelKind::Polynomial,
            ModelParams::Seasonal { .. } => ModelKind::Seasonal,
        }
    }

    fn residual_std(&self) -> f64 {
        match self {
            ModelParams::Linear { residual_std, .. }
            | ModelParams::Polynomial { residual_std, .. }
            | ModelParams::Seasonal { residual_std, .. } => *residual_std,
        }
    }

    /// Model value at training index `x`, for the day starting at `day`.
    fn value_at(&self, x: f64, day: Timestamp) -> f64 {
        match self {
            ModelParams::Linear { slope, intercept, .. } => slope * x + intercept,
            ModelParams::Polynomial { coefficients, .. } => {
                coefficients[0] + coefficients[1] * x + coefficients[2] * x * x
            }
            ModelParams::Seasonal {
                slope,
                intercept,
                weekday_factors,
                ..
            } => {
                let weekday = day.to_datetime().weekday().num_days_from_monday() as usize;
                (slope * x + intercept) * weekday_factors[weekday % 7]
            }
        }
    }
}

/// A cached fitted model for one target metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub id: Uuid,
    pub target_metric: CompactString,
    pub kind: ModelKind,
    /// 1 - normalized mean squared error against the training fit, in [0, 1]
    pub accuracy: f64,
    pub trained_at: Timestamp,
    pub sample_size: usize,
    pub params: ModelParams,
    /// Timestamp of the last training day; forecasts start the day after
    pub last_day: Timestamp,
}

impl FittedModel {
    /// A model is reused until it goes stale or proves inaccurate.
    fn is_usable(&self, now: Timestamp, max_age: Duration, min_accuracy: f64) -> bool {
        now.duration_since(self.trained_at) <= max_age && self.accuracy >= min_accuracy
    }
}

// ----------------------------------------------------------------------------
// Forecast Output
// ----------------------------------------------------------------------------

/// One projected future day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub timestamp: Timestamp,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

/// A metric forecast: one prediction per requested day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricForecast {
    pub metric: CompactString,
    pub model: ModelKind,
    pub accuracy: f64,
    pub points: Vec<Prediction>,
}

// ----------------------------------------------------------------------------
// Subject Success
// ----------------------------------------------------------------------------

/// The fixed composite factors, with their weights and positive thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessFactor {
    Academic,
    Engagement,
    SubmissionQuality,
    TimelineAdherence,
}

impl SuccessFactor {
    pub const ALL: [SuccessFactor; 4] = [
        SuccessFactor::Academic,
        SuccessFactor::Engagement,
        SuccessFactor::SubmissionQuality,
        SuccessFactor::TimelineAdherence,
    ];

    pub fn weight(&self) -> f64 {
        match self {
            SuccessFactor::Academic => 0.30,
            SuccessFactor::Engagement => 0.25,
            SuccessFactor::SubmissionQuality => 0.25,
            SuccessFactor::TimelineAdherence => 0.20,
        }
    }

    /// Score below which the factor earns a targeted recommendation.
    pub fn positive_threshold(&self) -> f64 {
        match self {
            SuccessFactor::Academic => 0.75,
            SuccessFactor::Engagement => 0.6,
            SuccessFactor::SubmissionQuality => 0.7,
            SuccessFactor::TimelineAdherence => 0.65,
        }
    }

    /// The 0-100 scaled metric backing this factor.
    pub fn metric(&self) -> &'static str {
        match self {
            SuccessFactor::Academic => "subject.academic.score",
            SuccessFactor::Engagement => "engagement.score",
            SuccessFactor::SubmissionQuality => "submissions.quality",
            SuccessFactor::TimelineAdherence => "timeline.adherence",
        }
    }

    fn recommendation(&self) -> &'static str {
        match self {
            SuccessFactor::Academic => {
                "Schedule a review of recent assessment results and close the weakest topics first"
            }
            SuccessFactor::Engagement => {
                "Re-engage with shorter, more frequent sessions rather than long infrequent ones"
            }
            SuccessFactor::SubmissionQuality => {
                "Request feedback on the last submissions and iterate before the next deadline"
            }
            SuccessFactor::TimelineAdherence => {
                "Break remaining work into smaller tasks with earlier internal deadlines"
            }
        }
    }
}

/// Risk banding for the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One factor's contribution to the composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    pub factor: SuccessFactor,
    /// Normalized to [0, 1]
    pub score: f64,
    pub weight: f64,
    /// True when no observations backed this factor and the neutral
    /// default was used
    pub estimated: bool,
}

/// Composite success prediction for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessPrediction {
    pub subject_id: CompactString,
    /// Weighted composite in [0, 1]
    pub score: f64,
    pub risk: RiskLevel,
    pub factors: Vec<FactorScore>,
    pub recommendations: Vec<String>,
}

/// A subject's standing against peer aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    pub subject_id: CompactString,
    pub composite: f64,
    pub peer_composite: f64,
    pub factors: Vec<FactorStanding>,
}

/// Per-factor comparison against the peer average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorStanding {
    pub factor: SuccessFactor,
    pub subject_score: f64,
    pub peer_average: f64,
    pub delta: f64,
}

/// One remaining unit of work for timeline optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEstimate {
    pub name: String,
    pub estimated_hours: f64,
    pub deadline: Option<Timestamp>,
}

/// Suggested ordering of remaining tasks for a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePlan {
    pub subject_id: CompactString,
    pub total_hours: f64,
    /// Sustainable hours per day, scaled by the success composite
    pub daily_capacity_hours: f64,
    pub days_required: f64,
    pub feasible: bool,
    pub ordered_tasks: Vec<String>,
    pub data: serde_json::Value,
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

/// Trains, caches, and serves forecasting models and composite scores.
pub struct PredictiveEngine {
    pipeline: Arc<MetricPipeline>,
    store: Arc<dyn MetricStore>,
    models: DashMap<CompactString, FittedModel>,
    lookback: Duration,
    max_model_age: Duration,
    min_accuracy: f64,
}

impl PredictiveEngine {
    pub fn new(
        pipeline: Arc<MetricPipeline>,
        store: Arc<dyn MetricStore>,
        config: &crate::config::PredictionConfig,
    ) -> Self {
        Self {
            pipeline,
            store,
            models: DashMap::new(),
            lookback: Duration::from_secs(u64::from(config.training_lookback_days) * DAY_SECS),
            max_model_age: Duration::from_secs(u64::from(config.model_max_age_days) * DAY_SECS),
            min_accuracy: config.min_accuracy,
        }
    }

    // ------------------------------------------------------------------
    // Metric Forecasting
    // ------------------------------------------------------------------

    /// Forecast one point per future day. Returns `None` when the metric
    /// has too little history to fit any model.
    pub async fn predict_metric(
        &self,
        metric: &str,
        days_ahead: usize,
        choice: ModelChoice,
    ) -> EngineResult<Option<MetricForecast>> {
        if days_ahead == 0 || days_ahead as i64 > TRAINING_LOOKBACK_DAYS {
            return Err(ValidationError::InvalidHorizon {
                requested: days_ahead,
                max: TRAINING_LOOKBACK_DAYS as usize,
            }
            .into());
        }

        let Some(model) = self.model_for(metric, choice).await? else {
            return Ok(None);
        };

        let n = model.sample_size as f64;
        let residual_std = model.params.residual_std();
        let points = (1..=days_ahead)
            .map(|h| {
                let day = model
                    .last_day
                    .add_duration(Duration::from_secs(h as u64 * DAY_SECS));
                let value = model.params.value_at(n - 1.0 + h as f64, day);
                // Interval widens with the horizon
                let margin = Z_95 * residual_std * (h as f64).sqrt();
                Prediction {
                    timestamp: day,
                    value,
                    lower: value - margin,
                    upper: value + margin,
                }
            })
            .collect();

        Ok(Some(MetricForecast {
            metric: metric.into(),
            model: model.kind,
            accuracy: model.accuracy,
            points,
        }))
    }

    /// Return a usable cached model or train a fresh one.
    async fn model_for(
        &self,
        metric: &str,
        choice: ModelChoice,
    ) -> EngineResult<Option<FittedModel>> {
        let now = self.pipeline.now();

        if let Some(cached) = self.models.get(metric) {
            let kind_matches = match choice {
                ModelChoice::Auto => true,
                ModelChoice::Kind(kind) => cached.kind == kind,
            };
            if kind_matches && cached.is_usable(now, self.max_model_age, self.min_accuracy) {
                return Ok(Some(cached.clone()));
            }
        }

        let Some(series) = self.daily_series(metric, now).await? else {
            return Ok(None);
        };

        let trained = match choice {
            ModelChoice::Kind(kind) => train_model(kind, &series),
            ModelChoice::Auto => {
                // Train all three concurrently; a failed fit is dropped and
                // the best surviving accuracy wins.
                let fits = join_all(
                    ModelKind::ALL
                        .iter()
                        .map(|kind| async { train_model(*kind, &series) }),
                )
                .await;
                fits.into_iter()
                    .flatten()
                    .max_by(|(_, a), (_, b)| {
                        a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                    })
            }
        };

        let Some((params, accuracy)) = trained else {
            warn!(
                target: "vantage::predict",
                metric,
                "No model could be fitted"
            );
            return Ok(None);
        };

        let model = FittedModel {
            id: Uuid::new_v4(),
            target_metric: metric.into(),
            kind: params.kind(),
            accuracy,
            trained_at: now,
            sample_size: series.len(),
            last_day: series.last().map(|(day, _)| *day).unwrap_or(now),
            params,
        };
        debug!(
            target: "vantage::predict",
            metric,
            kind = model.kind.as_str(),
            accuracy = model.accuracy,
            samples = model.sample_size,
            "Trained forecasting model"
        );
        self.models.insert(metric.into(), model.clone());
        Ok(Some(model))
    }

    /// Daily-averaged history, oldest first. `None` below the training
    /// minimum.
    async fn daily_series(
        &self,
        metric: &str,
        now: Timestamp,
    ) -> EngineResult<Option<Vec<(Timestamp, f64)>>> {
        let query = MetricQuery::new()
            .metric(metric)
            .between(now.sub_duration(self.lookback), now)
            .limit(MAX_QUERY_LIMIT);
        let observations = self.pipeline.query_observations(&query).await?;

        let mut buckets: ahash::AHashMap<i64, (f64, usize)> = ahash::AHashMap::new();
        for obs in &observations {
            let entry = buckets
                .entry(obs.timestamp.floor_to_day().as_secs())
                .or_insert((0.0, 0));
            entry.0 += obs.value;
            entry.1 += 1;
        }

        if buckets.len() < MIN_TRAINING_POINTS {
            return Ok(None);
        }

        let mut series: Vec<(Timestamp, f64)> = buckets
            .into_iter()
            .map(|(day, (sum, n))| (Timestamp::from_secs(day), sum / n as f64))
            .collect();
        series.sort_by_key(|(day, _)| *day);
        Ok(Some(series))
    }

    /// Drop a cached model (mainly for operational tooling).
    pub fn invalidate_model(&self, metric: &str) -> bool {
        self.models.remove(metric).is_some()
    }

    // ------------------------------------------------------------------
    // Subject Success
    // ------------------------------------------------------------------

    /// Weighted composite of the four success factors, with risk banding
    /// and targeted recommendations for weak factors.
    pub async fn predict_subject_success(
        &self,
        subject_id: &str,
    ) -> EngineResult<SuccessPrediction> {
        let mut factors = Vec::with_capacity(SuccessFactor::ALL.len());
        for factor in SuccessFactor::ALL {
            factors.push(self.factor_score(subject_id, factor).await);
        }

        let score: f64 = factors.iter().map(|f| f.score * f.weight).sum();
        let risk = if score >= RISK_LOW_THRESHOLD {
            RiskLevel::Low
        } else if score >= RISK_MEDIUM_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        };

        let recommendations = factors
            .iter()
            .filter(|f| f.score < f.factor.positive_threshold())
            .map(|f| f.factor.recommendation().to_string())
            .collect();

        Ok(SuccessPrediction {
            subject_id: subject_id.into(),
            score,
            risk,
            factors,
            recommendations,
        })
    }

    /// One factor's normalized score over the trailing 30 days. A store
    /// failure or missing history degrades to the neutral default.
    async fn factor_score(&self, subject_id: &str, factor: SuccessFactor) -> FactorScore {
        let now = self.pipeline.now();
        let query = MetricQuery::new()
            .metric(factor.metric())
            .subject(subject_id)
            .between(now.sub_duration(Duration::from_secs(30 * DAY_SECS)), now)
            .limit(MAX_QUERY_LIMIT);

        let observations = match self.pipeline.query_observations(&query).await {
            Ok(obs) => obs,
            Err(e) => {
                warn!(
                    target: "vantage::predict",
                    subject = subject_id,
                    factor = ?factor,
                    error = %e,
                    "Factor query failed, using neutral default"
                );
                Vec::new()
            }
        };

        if observations.is_empty() {
            return FactorScore {
                factor,
                score: 0.5,
                weight: factor.weight(),
                estimated: true,
            };
        }

        let values: Vec<f64> = observations.iter().map(|o| o.value).collect();
        // Factor metrics are emitted on a 0-100 scale
        let score = (SeriesStats::mean(&values) / 100.0).clamp(0.0, 1.0);
        FactorScore {
            factor,
            score,
            weight: factor.weight(),
            estimated: false,
        }
    }

    // ------------------------------------------------------------------
    // Benchmark & Timeline
    // ------------------------------------------------------------------

    /// Compare a subject's factor scores against peer averages drawn from
    /// weekly engagement aggregates, falling back to the raw peer mean.
    pub async fn benchmark(&self, subject_id: &str) -> EngineResult<Benchmark> {
        let prediction = self.predict_subject_success(subject_id).await?;
        let now = self.pipeline.now();
        let range = TimeRange::new(now.sub_duration(Duration::from_secs(30 * DAY_SECS)), now);

        let mut standings = Vec::with_capacity(prediction.factors.len());
        let mut peer_total = 0.0;
        for factor_score in &prediction.factors {
            let factor = factor_score.factor;
            let peer_average = self
                .peer_average(factor, range)
                .await
                .unwrap_or_else(|e| {
                    warn!(
                        target: "vantage::predict",
                        factor = ?factor,
                        error = %e,
                        "Peer aggregate unavailable, using neutral default"
                    );
                    0.5
                });
            peer_total += peer_average * factor.weight();
            standings.push(FactorStanding {
                factor,
                subject_score: factor_score.score,
                peer_average,
                delta: factor_score.score - peer_average,
            });
        }

        Ok(Benchmark {
            subject_id: subject_id.into(),
            composite: prediction.score,
            peer_composite: peer_total,
            factors: standings,
        })
    }

    /// Peer mean for one factor, preferring weekly aggregates over a raw
    /// scan of everyone's observations.
    async fn peer_average(
        &self,
        factor: SuccessFactor,
        range: TimeRange,
    ) -> EngineResult<f64> {
        let aggregates = self
            .store
            .query_aggregates(factor.metric(), TimeWindow::Week, range, None)
            .await?;
        if !aggregates.is_empty() {
            let values: Vec<f64> = aggregates.iter().map(|r| r.stats.avg).collect();
            return Ok((SeriesStats::mean(&values) / 100.0).clamp(0.0, 1.0));
        }

        let query = MetricQuery::new()
            .metric(factor.metric())
            .between(range.start, range.end)
            .limit(MAX_QUERY_LIMIT);
        let observations = self.pipeline.query_observations(&query).await?;
        if observations.is_empty() {
            return Ok(0.5);
        }
        let values: Vec<f64> = observations.iter().map(|o| o.value).collect();
        Ok((SeriesStats::mean(&values) / 100.0).clamp(0.0, 1.0))
    }

    /// Order remaining tasks by deadline then size, and judge feasibility
    /// against a capacity scaled by the subject's success composite.
    pub async fn optimize_timeline(
        &self,
        subject_id: &str,
        tasks: Vec<TaskEstimate>,
    ) -> EngineResult<TimelinePlan> {
        let prediction = self.predict_subject_success(subject_id).await?;

        let mut ordered = tasks;
        ordered.sort_by(|a, b| {
            match (a.deadline, b.deadline) {
                (Some(da), Some(db)) => da.cmp(&db),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then(
                b.estimated_hours
                    .partial_cmp(&a.estimated_hours)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });

        let total_hours: f64 = ordered.iter().map(|t| t.estimated_hours).sum();
        // 6h/day at a perfect composite, 3h/day at zero
        let daily_capacity_hours = 3.0 + 3.0 * prediction.score;
        let days_required = if daily_capacity_hours > 0.0 {
            total_hours / daily_capacity_hours
        } else {
            f64::INFINITY
        };

        let now = self.pipeline.now();
        let feasible = ordered
            .iter()
            .scan(0.0_f64, |spent, task| {
                *spent += task.estimated_hours;
                let finish =
                    now.add_duration(Duration::from_secs_f64(*spent / daily_capacity_hours * DAY_SECS as f64));
                Some(task.deadline.map_or(true, |d| finish <= d))
            })
            .all(|ok| ok);

        Ok(TimelinePlan {
            subject_id: subject_id.into(),
            total_hours,
            daily_capacity_hours,
            days_required,
            feasible,
            ordered_tasks: ordered.into_iter().map(|t| t.name).collect(),
            data: json!({
                "composite": prediction.score,
                "risk": prediction.risk,
            }),
        })
    }
}

// ----------------------------------------------------------------------------
// Training
// ----------------------------------------------------------------------------

/// Fit one model kind to a daily series. Returns the parameters and their
/// training accuracy (1 - MSE / variance, clamped to [0, 1]).
fn train_model(
    kind: ModelKind,
    series: &[(Timestamp, f64)],
) -> Option<(ModelParams, f64)> {
    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    let x = index_axis(values.len());

    let params = match kind {
        ModelKind::Linear => {
            let fit = Regression::linear(&x, &values)?;
            ModelParams::Linear {
                slope: fit.slope,
                intercept: fit.intercept,
                residual_std: fit.residual_std,
            }
        }
        ModelKind::Polynomial => {
            let fit = Regression::quadratic(&x, &values)?;
            ModelParams::Polynomial {
                coefficients: fit.coefficients,
                residual_std: fit.residual_std,
            }
        }
        ModelKind::Seasonal => seasonal_params(series, &x, &values)?,
    };

    // Accuracy against the training fit
    let mse = {
        let sq_err: f64 = series
            .iter()
            .enumerate()
            .map(|(i, (day, v))| (v - params.value_at(i as f64, *day)).powi(2))
            .sum();
        sq_err / values.len() as f64
    };
    let variance = SeriesStats::variance(&values);
    let accuracy = if variance.abs() < f64::EPSILON {
        if mse < f64::EPSILON {
            1.0
        } else {
            0.0
        }
    } else {
        (1.0 - mse / variance).clamp(0.0, 1.0)
    };

    Some((params, accuracy))
}

/// Linear trend with multiplicative weekday factors. Needs two full weeks;
/// weekdays without enough contrast keep a neutral factor of 1.
fn seasonal_params(
    series: &[(Timestamp, f64)],
    x: &[f64],
    values: &[f64],
) -> Option<ModelParams> {
    if series.len() < 2 * 7 {
        return None;
    }
    let fit = Regression::linear(x, values)?;
    let overall_mean = SeriesStats::mean(values);
    if overall_mean.abs() < f64::EPSILON {
        return None;
    }

    let mut sums = [0.0_f64; 7];
    let mut counts = [0_usize; 7];
    for (day, value) in series {
        let weekday = day.to_datetime().weekday().num_days_from_monday() as usize;
        sums[weekday % 7] += value;
        counts[weekday % 7] += 1;
    }

    let mut weekday_factors = [1.0_f64; 7];
    for i in 0..7 {
        if counts[i] > 0 {
            weekday_factors[i] = (sums[i] / counts[i] as f64) / overall_mean;
        }
    }

    // Residuals of the seasonal fit itself
    let sq_err: f64 = series
        .iter()
        .enumerate()
        .map(|(i, (day, v))| {
            let weekday = day.to_datetime().weekday().num_days_from_monday() as usize;
            let predicted = fit.predict(i as f64) * weekday_factors[weekday % 7];
            (v - predicted).powi(2)
        })
        .sum();

    Some(ModelParams::Seasonal {
        slope: fit.slope,
        intercept: fit.intercept,
        weekday_factors,
        residual_std: (sq_err / series.len() as f64).sqrt(),
    })
}
