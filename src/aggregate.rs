// ============================================================================
// AGGREGATION ENGINE
// ============================================================================
// Declarative rollup rules evaluated over the ingestion pipeline's query
// interface. Each run partitions raw observations into groups keyed by the
// rule's group-by dimensions, reduces each group to a five-number summary,
// and upserts one aggregated record per group. Re-running a rule for the
// same period overwrites the same keys.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use compact_str::CompactString;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, info, warn};
use uuid::Uuid;
use xxhash_rust::xxh3::Xxh3;

use crate::constants::MAX_QUERY_LIMIT;
use crate::error::{ComputeError, EngineResult, StoreError, ValidationError};
use crate::ingest::{MetricPipeline, MetricQuery};
use crate::stats::{AggregateFunction, SummaryStats};
use crate::store::MetricStore;
use crate::types::{Dimension, Dimensions, DimensionsExt, TimeWindow, Timestamp};

/// Group-by entry that buckets observations by hour instead of matching a
/// real dimension key.
pub const TIMESTAMP_PSEUDO_DIMENSION: &str = "timestamp";

// ----------------------------------------------------------------------------
// Rules
// ----------------------------------------------------------------------------

/// Identifier of a persisted aggregation rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct RuleId(Uuid);

impl RuleId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RuleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A declarative rollup definition. Rules are soft-disabled via `active`,
/// never deleted, so historical aggregates stay attributable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationRule {
    pub id: RuleId,
    pub name: CompactString,
    /// Raw metric names this rule rolls up
    pub source_metrics: SmallVec<[CompactString; 4]>,
    /// Statistic reducing each group
    pub function: AggregateFunction,
    /// Dimension keys to group by; may include the `timestamp` pseudo-dimension
    pub group_by: SmallVec<[CompactString; 4]>,
    /// Bucket granularity
    pub window: TimeWindow,
    pub active: bool,
}

impl AggregationRule {
    pub fn new<N>(
        name: N,
        source_metrics: impl IntoIterator<Item = impl Into<CompactString>>,
        function: AggregateFunction,
        group_by: impl IntoIterator<Item = impl Into<CompactString>>,
        window: TimeWindow,
    ) -> Self
    where
        N: Into<CompactString>,
    {
        Self {
            id: RuleId::generate(),
            name: name.into(),
            source_metrics: source_metrics.into_iter().map(Into::into).collect(),
            function,
            group_by: group_by.into_iter().map(Into::into).collect(),
            window,
            active: true,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.source_metrics.is_empty() {
            return Err(ValidationError::EmptySourceMetrics {
                rule: self.name.to_string(),
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Aggregated Records
// ----------------------------------------------------------------------------

/// Composite key of one aggregated record.
///
/// An explicit struct rather than a joined string: the persisted id hashes
/// a length-prefixed encoding, so dimension values containing any
/// separator character cannot collide with a differently-split set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
    pub metric: CompactString,
    pub window: TimeWindow,
    pub period_start: Timestamp,
    /// Key-sorted grouping pairs
    pub dimensions: Vec<(CompactString, CompactString)>,
}

impl AggregateKey {
    /// Stable 64-bit id for persistence, from a length-prefixed encoding.
    pub fn record_id(&self) -> u64 {
        let mut hasher = Xxh3::new();
        let feed = |hasher: &mut Xxh3, bytes: &[u8]| {
            hasher.update(&(bytes.len() as u32).to_le_bytes());
            hasher.update(bytes);
        };
        feed(&mut hasher, self.metric.as_bytes());
        feed(&mut hasher, self.window.as_str().as_bytes());
        hasher.update(&self.period_start.as_nanos().to_le_bytes());
        for (key, value) in &self.dimensions {
            feed(&mut hasher, key.as_bytes());
            feed(&mut hasher, value.as_bytes());
        }
        hasher.digest()
    }
}

/// Provenance of one aggregated record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordProvenance {
    pub rule_id: RuleId,
    pub rule_name: CompactString,
    pub function: AggregateFunction,
}

/// One per-period rollup row, upserted by its composite key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    pub key: AggregateKey,
    /// The rule's chosen representative value for the bucket
    pub value: f64,
    /// Full five-number summary of the bucket
    pub stats: SummaryStats,
    /// Grouping dimensions in group-by order
    pub dimensions: Dimensions,
    /// Which rule produced this record
    pub provenance: RecordProvenance,
}

// ----------------------------------------------------------------------------
// Run Reports
// ----------------------------------------------------------------------------

/// Outcome of one `run_aggregation` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationReport {
    pub rules_run: usize,
    pub rules_failed: usize,
    pub records_written: usize,
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

/// Evaluates aggregation rules against the ingestion pipeline.
pub struct AggregationEngine {
    pipeline: Arc<MetricPipeline>,
    store: Arc<dyn MetricStore>,
    rules: DashMap<RuleId, AggregationRule>,
}

impl AggregationEngine {
    pub fn new(pipeline: Arc<MetricPipeline>, store: Arc<dyn MetricStore>) -> Self {
        Self {
            pipeline,
            store,
            rules: DashMap::new(),
        }
    }

    /// Register and persist a rule. Returns its id.
    pub async fn create_rule(&self, rule: AggregationRule) -> EngineResult<RuleId> {
        rule.validate()?;
        self.store.upsert_rule(&rule).await?;
        let id = rule.id;
        info!(
            target: "vantage::aggregate",
            rule = %rule.name,
            window = %rule.window,
            "Registered aggregation rule"
        );
        self.rules.insert(id, rule);
        Ok(id)
    }

    /// Soft-enable or soft-disable a rule.
    pub async fn set_rule_active(&self, rule_id: RuleId, active: bool) -> EngineResult<()> {
        let updated = {
            let mut entry =
                self.rules
                    .get_mut(&rule_id)
                    .ok_or_else(|| ValidationError::UnknownRule {
                        rule_id: rule_id.to_string(),
                    })?;
            entry.active = active;
            entry.clone()
        };
        self.store.upsert_rule(&updated).await?;
        Ok(())
    }

    /// Load previously persisted rules into the registry.
    pub async fn load_persisted_rules(&self) -> Result<usize, StoreError> {
        let rules = self.store.load_rules().await?;
        let count = rules.len();
        for rule in rules {
            self.rules.insert(rule.id, rule);
        }
        Ok(count)
    }

    /// Install the default rollup set. Seed data only: rules that already
    /// exist by name are left alone.
    pub async fn install_seed_rules(&self) -> EngineResult<usize> {
        let seeds = [
            AggregationRule::new(
                "hourly-user-activity",
                ["users.active", "sessions.count"],
                AggregateFunction::Avg,
                [TIMESTAMP_PSEUDO_DIMENSION],
                TimeWindow::Hour,
            ),
            AggregationRule::new(
                "daily-application-funnel",
                ["applications.submitted", "applications.completed"],
                AggregateFunction::Count,
                [TIMESTAMP_PSEUDO_DIMENSION, "stage"],
                TimeWindow::Day,
            ),
            AggregationRule::new(
                "weekly-engagement",
                ["engagement.score"],
                AggregateFunction::Avg,
                ["cohort"],
                TimeWindow::Week,
            ),
        ];

        let mut installed = 0;
        for seed in seeds {
            let exists = self.rules.iter().any(|r| r.name == seed.name);
            if !exists {
                self.create_rule(seed).await?;
                installed += 1;
            }
        }
        Ok(installed)
    }

    /// Rules currently registered, active or not.
    pub fn rules(&self) -> Vec<AggregationRule> {
        self.rules.iter().map(|r| r.value().clone()).collect()
    }

    /// Run one rule, or every active rule matching the window filter.
    /// Rules run concurrently and independently: a failing rule is logged
    /// and counted, never aborting its siblings.
    pub async fn run_aggregation(
        &self,
        rule_id: Option<RuleId>,
        window: Option<TimeWindow>,
    ) -> EngineResult<AggregationReport> {
        let selected: Vec<AggregationRule> = match rule_id {
            Some(id) => {
                let rule = self
                    .rules
                    .get(&id)
                    .ok_or_else(|| ValidationError::UnknownRule {
                        rule_id: id.to_string(),
                    })?
                    .clone();
                vec![rule]
            }
            None => self
                .rules
                .iter()
                .filter(|r| r.active && window.map_or(true, |w| r.window == w))
                .map(|r| r.value().clone())
                .collect(),
        };

        let now = self.pipeline.now();
        let outcomes = join_all(selected.iter().map(|rule| self.run_rule(rule, now))).await;

        let mut report = AggregationReport {
            rules_run: selected.len(),
            ..Default::default()
        };
        for (rule, outcome) in selected.iter().zip(outcomes) {
            match outcome {
                Ok(written) => report.records_written += written,
                Err(e) => {
                    report.rules_failed += 1;
                    warn!(
                        target: "vantage::aggregate",
                        rule = %rule.name,
                        error = %e,
                        "Aggregation rule failed"
                    );
                }
            }
        }

        debug!(
            target: "vantage::aggregate",
            rules = report.rules_run,
            failed = report.rules_failed,
            records = report.records_written,
            "Aggregation pass complete"
        );
        Ok(report)
    }

    /// Evaluate one rule over its trailing window ending at `now`.
    async fn run_rule(&self, rule: &AggregationRule, now: Timestamp) -> Result<usize, ComputeError> {
        let window_start = now.sub_duration(rule.window.length());
        let mut query = MetricQuery::new()
            .between(window_start, now)
            .limit(MAX_QUERY_LIMIT);
        for metric in &rule.source_metrics {
            query = query.metric(metric.clone());
        }

        let observations = self
            .pipeline
            .query_observations(&query)
            .await
            .map_err(|e| ComputeError::RuleFailed {
                rule: rule.name.to_string(),
                window: rule.window,
                message: e.to_string(),
            })?;

        if observations.is_empty() {
            return Ok(0);
        }

        // Partition into (metric, group dimensions) buckets. The record's
        // metric name always comes from a real observation, never the rule.
        let period_start = rule.window.bucket_start(now);
        let mut groups: ahash::AHashMap<(CompactString, Vec<(CompactString, CompactString)>), Vec<f64>> =
            ahash::AHashMap::new();

        for obs in &observations {
            let mut group_dims: Vec<(CompactString, CompactString)> = Vec::new();
            for key in &rule.group_by {
                let value = if *key == TIMESTAMP_PSEUDO_DIMENSION {
                    hour_bucket_value(obs.timestamp)
                } else {
                    CompactString::from(obs.dimensions.get(key).unwrap_or(""))
                };
                group_dims.push((key.clone(), value));
            }
            groups
                .entry((obs.name.clone(), group_dims))
                .or_default()
                .push(obs.value);
        }

        let mut written = 0;
        for ((metric, group_dims), values) in groups {
            let stats = SummaryStats::from_values(&values);
            let value = rule.function.from_summary(&stats, &values);

            let mut sorted_dims = group_dims.clone();
            sorted_dims.sort();

            let record = AggregatedRecord {
                key: AggregateKey {
                    metric,
                    window: rule.window,
                    period_start,
                    dimensions: sorted_dims,
                },
                value,
                stats,
                dimensions: group_dims
                    .into_iter()
                    .map(|(k, v)| Dimension::new(k, v))
                    .collect(),
                provenance: RecordProvenance {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    function: rule.function,
                },
            };

            self.store
                .upsert_aggregate(&record)
                .await
                .map_err(|e| ComputeError::RuleFailed {
                    rule: rule.name.to_string(),
                    window: rule.window,
                    message: e.to_string(),
                })?;
            written += 1;
        }

        Ok(written)
    }

    /// Read back aggregated records for one metric and window.
    pub async fn get_aggregated_data(
        &self,
        metric: &str,
        window: TimeWindow,
        range: crate::types::TimeRange,
        dimensions: Option<&Dimensions>,
    ) -> EngineResult<Vec<AggregatedRecord>> {
        Ok(self
            .store
            .query_aggregates(metric, window, range, dimensions)
            .await?)
    }
}

/// Hour-bucket value for the `timestamp` pseudo-dimension.
fn hour_bucket_value(ts: Timestamp) -> CompactString {
    CompactString::from(
        ts.floor_to_hour()
            .to_datetime()
            .format("%Y-%m-%dT%H:00:00Z")
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::store::{FailingStore, MemoryStore};
    use crate::types::{ManualTimeSource, MetricObservation, TimeRange};
    use std::time::Duration;

    /// Pipeline + engine over a shared in-memory store with a fixed clock.
    async fn fixture(now: Timestamp) -> (Arc<MetricPipeline>, AggregationEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualTimeSource::new(now));
        let pipeline = Arc::new(MetricPipeline::with_clock(
            Arc::clone(&store) as Arc<dyn MetricStore>,
            &IngestConfig::default(),
            clock,
        ));
        let engine = AggregationEngine::new(
            Arc::clone(&pipeline),
            Arc::clone(&store) as Arc<dyn MetricStore>,
        );
        (pipeline, engine, store)
    }

    #[tokio::test]
    async fn hourly_rule_averages_the_window() {
        let now = Timestamp::from_secs(3_600_000);
        let (pipeline, engine, store) = fixture(now).await;

        // 15 observations inside the trailing hour: 10,12,11,13,14,...,24
        let values = [
            10.0, 12.0, 11.0, 13.0, 14.0, 15.0, 16.0, 17.0, 18.0, 19.0, 20.0, 21.0, 22.0, 23.0,
            24.0,
        ];
        let batch: Vec<MetricObservation> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                MetricObservation::gauge("users.active", *v, "web").with_timestamp(
                    now.sub_duration(Duration::from_secs(60 * (15 - i as u64))),
                )
            })
            .collect();
        pipeline.submit_batch(batch).await.unwrap();
        pipeline.flush_now().await;

        let rule_id = engine
            .create_rule(AggregationRule::new(
                "hourly-user-activity",
                ["users.active"],
                AggregateFunction::Avg,
                Vec::<&str>::new(),
                TimeWindow::Hour,
            ))
            .await
            .unwrap();

        engine.run_aggregation(Some(rule_id), None).await.unwrap();

        let records = engine
            .get_aggregated_data(
                "users.active",
                TimeWindow::Hour,
                TimeRange::new(Timestamp::EPOCH, now),
                None,
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        let expected = values.iter().sum::<f64>() / values.len() as f64;
        assert!((records[0].stats.avg - expected).abs() < 1e-9);
        assert!((records[0].value - expected).abs() < 1e-9);
        assert_eq!(records[0].stats.count, 15);

        // Re-running is idempotent: same key, same statistics, no duplicate
        engine.run_aggregation(Some(rule_id), None).await.unwrap();
        assert_eq!(store.aggregate_count(), 1);
    }

    #[tokio::test]
    async fn groups_partition_by_dimension_values() {
        let now = Timestamp::from_secs(7200);
        let (pipeline, engine, _store) = fixture(now).await;

        pipeline
            .submit_batch(vec![
                MetricObservation::gauge("latency", 100.0, "api")
                    .with_timestamp(now.sub_duration(Duration::from_secs(60)))
                    .with_dimension("region", "eu"),
                MetricObservation::gauge("latency", 300.0, "api")
                    .with_timestamp(now.sub_duration(Duration::from_secs(120)))
                    .with_dimension("region", "us"),
            ])
            .await
            .unwrap();
        pipeline.flush_now().await;

        let rule_id = engine
            .create_rule(AggregationRule::new(
                "hourly-latency-by-region",
                ["latency"],
                AggregateFunction::Max,
                ["region"],
                TimeWindow::Hour,
            ))
            .await
            .unwrap();
        engine.run_aggregation(Some(rule_id), None).await.unwrap();

        let records = engine
            .get_aggregated_data(
                "latency",
                TimeWindow::Hour,
                TimeRange::new(Timestamp::EPOCH, now),
                None,
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        let eu = records
            .iter()
            .find(|r| r.dimensions.get("region") == Some("eu"))
            .unwrap();
        assert_eq!(eu.value, 100.0);
    }

    #[tokio::test]
    async fn timestamp_pseudo_dimension_buckets_by_hour() {
        let now = Timestamp::from_secs(10 * 86_400);
        let (pipeline, engine, _store) = fixture(now).await;

        // Two observations in different hours of the trailing day
        pipeline
            .submit_batch(vec![
                MetricObservation::counter("applications.submitted", 1.0, "api")
                    .with_timestamp(now.sub_duration(Duration::from_secs(3 * 3600))),
                MetricObservation::counter("applications.submitted", 1.0, "api")
                    .with_timestamp(now.sub_duration(Duration::from_secs(7 * 3600))),
            ])
            .await
            .unwrap();
        pipeline.flush_now().await;

        let rule_id = engine
            .create_rule(AggregationRule::new(
                "daily-funnel",
                ["applications.submitted"],
                AggregateFunction::Count,
                [TIMESTAMP_PSEUDO_DIMENSION],
                TimeWindow::Day,
            ))
            .await
            .unwrap();
        engine.run_aggregation(Some(rule_id), None).await.unwrap();

        let records = engine
            .get_aggregated_data(
                "applications.submitted",
                TimeWindow::Day,
                TimeRange::new(Timestamp::EPOCH, now),
                None,
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.value == 1.0));
        assert!(records
            .iter()
            .all(|r| r.dimensions.get(TIMESTAMP_PSEUDO_DIMENSION).is_some()));
    }

    #[tokio::test]
    async fn aggregate_key_ids_resist_delimiter_collisions() {
        let base = AggregateKey {
            metric: "m".into(),
            window: TimeWindow::Hour,
            period_start: Timestamp::from_secs(0),
            dimensions: vec![("a".into(), "x|y".into())],
        };
        let shifted = AggregateKey {
            metric: "m".into(),
            window: TimeWindow::Hour,
            period_start: Timestamp::from_secs(0),
            dimensions: vec![("a|x".into(), "y".into())],
        };
        let split = AggregateKey {
            metric: "m".into(),
            window: TimeWindow::Hour,
            period_start: Timestamp::from_secs(0),
            dimensions: vec![("a".into(), "x".into()), ("y".into(), "".into())],
        };

        assert_ne!(base.record_id(), shifted.record_id());
        assert_ne!(base.record_id(), split.record_id());
        assert_ne!(shifted.record_id(), split.record_id());
    }

    #[tokio::test]
    async fn unknown_rule_is_a_validation_error() {
        let (_pipeline, engine, _store) = fixture(Timestamp::from_secs(1000)).await;
        let err = engine
            .run_aggregation(Some(RuleId::generate()), None)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[tokio::test]
    async fn window_filter_selects_matching_rules() {
        let now = Timestamp::from_secs(100_000);
        let (_pipeline, engine, _store) = fixture(now).await;
        engine.install_seed_rules().await.unwrap();

        let report = engine
            .run_aggregation(None, Some(TimeWindow::Hour))
            .await
            .unwrap();
        assert_eq!(report.rules_run, 1);
        assert_eq!(report.rules_failed, 0);
    }

    #[tokio::test]
    async fn failing_store_degrades_without_panicking() {
        let failing: Arc<dyn MetricStore> = Arc::new(FailingStore);
        let pipeline = Arc::new(MetricPipeline::new(
            Arc::clone(&failing),
            &IngestConfig::default(),
        ));
        let engine = AggregationEngine::new(pipeline, failing);

        // Registry is in-memory even though persistence failed upstream,
        // so exercise the run path with a local rule.
        let rule = AggregationRule::new(
            "doomed",
            ["m"],
            AggregateFunction::Sum,
            Vec::<&str>::new(),
            TimeWindow::Hour,
        );
        engine.rules.insert(rule.id, rule);

        let report = engine.run_aggregation(None, None).await.unwrap();
        assert_eq!(report.rules_run, 1);
        assert_eq!(report.rules_failed, 1);
        assert_eq!(report.records_written, 0);
    }

    #[tokio::test]
    async fn seed_rules_install_once() {
        let (_pipeline, engine, _store) = fixture(Timestamp::from_secs(0)).await;
        assert_eq!(engine.install_seed_rules().await.unwrap(), 3);
        assert_eq!(engine.install_seed_rules().await.unwrap(), 0);
        assert_eq!(engine.rules().len(), 3);
    }
}
