// ============================================================================
// PERSISTENCE BOUNDARY
// ============================================================================
// The engine is store-agnostic: everything above this module talks to a
// `MetricStore` trait object. Implementations are expected to enforce their
// own client-side timeout on every call; nothing in the engine waits on a
// store longer than the implementation allows.
// ============================================================================

use async_trait::async_trait;
use compact_str::CompactString;
use dashmap::DashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::aggregate::{AggregateKey, AggregatedRecord, AggregationRule, RuleId};
use crate::error::StoreResult;
use crate::insight::Insight;
use crate::types::{Dimensions, DimensionsExt, MetricObservation, TimeRange, TimeWindow};

// ----------------------------------------------------------------------------
// Observation Filters
// ----------------------------------------------------------------------------

/// Filter for raw observation queries at the store boundary.
#[derive(Debug, Clone, Default)]
pub struct ObservationFilter {
    /// Metric names to match; empty matches all
    pub names: SmallVec<[CompactString; 4]>,
    /// Inclusive time range
    pub range: Option<TimeRange>,
    /// Dimension equality constraints; all must match
    pub dimensions: Dimensions,
    /// Restrict to one subject's observations
    pub subject_id: Option<CompactString>,
    /// Maximum rows returned (newest first)
    pub limit: Option<usize>,
}

impl ObservationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metric<N: Into<CompactString>>(mut self, name: N) -> Self {
        self.names.push(name.into());
        self
    }

    pub fn metrics<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<CompactString>,
    {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn range(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn dimension<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<CompactString>,
        V: Into<CompactString>,
    {
        self.dimensions.set(key, value);
        self
    }

    pub fn subject<S: Into<CompactString>>(mut self, subject_id: S) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether one observation satisfies every constraint.
    pub fn matches(&self, obs: &MetricObservation) -> bool {
        if !self.names.is_empty() && !self.names.iter().any(|n| *n == obs.name) {
            return false;
        }
        if let Some(range) = &self.range {
            if !range.contains(obs.timestamp) {
                return false;
            }
        }
        if let Some(subject) = &self.subject_id {
            if obs.subject_id.as_ref() != Some(subject) {
                return false;
            }
        }
        self.dimensions
            .iter()
            .all(|d| obs.dimensions.get(&d.key) == Some(d.value.as_str()))
    }
}

// ----------------------------------------------------------------------------
// Store Trait
// ----------------------------------------------------------------------------

/// Generic query/insert interface to the persistent store.
///
/// Every record family is queryable by time range and equality filters,
/// and every derived record upserts by its composite key, so re-running a
/// computation for the same period overwrites rather than duplicates.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Bulk-insert a flushed batch of observations.
    async fn insert_observations(&self, batch: Vec<MetricObservation>) -> StoreResult<()>;

    /// Fetch observations matching the filter, newest first.
    async fn query_observations(
        &self,
        filter: &ObservationFilter,
    ) -> StoreResult<Vec<MetricObservation>>;

    /// Persist an aggregation rule definition (insert or overwrite by id).
    async fn upsert_rule(&self, rule: &AggregationRule) -> StoreResult<()>;

    /// Load all persisted rule definitions, active or not.
    async fn load_rules(&self) -> StoreResult<Vec<AggregationRule>>;

    /// Upsert one aggregated record by its composite key.
    async fn upsert_aggregate(&self, record: &AggregatedRecord) -> StoreResult<()>;

    /// Fetch aggregated records for one metric and window over a range.
    async fn query_aggregates(
        &self,
        metric: &str,
        window: TimeWindow,
        range: TimeRange,
        dimensions: Option<&Dimensions>,
    ) -> StoreResult<Vec<AggregatedRecord>>;

    /// Upsert one insight by its deterministic id.
    async fn upsert_insight(&self, insight: &Insight) -> StoreResult<()>;

    /// Fetch persisted insights, newest first, optionally by category.
    async fn query_insights(
        &self,
        category: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Insight>>;
}

// ----------------------------------------------------------------------------
// In-Memory Store
// ----------------------------------------------------------------------------

/// Concurrent in-memory implementation of [`MetricStore`].
///
/// The reference store for tests and single-node deployments. Derived
/// records key on the same composite keys a relational adapter would use
/// as unique indexes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    observations: RwLock<Vec<MetricObservation>>,
    rules: DashMap<RuleId, AggregationRule>,
    aggregates: DashMap<AggregateKey, AggregatedRecord>,
    insights: DashMap<CompactString, Insight>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored raw observations.
    pub fn observation_count(&self) -> usize {
        self.observations.read().len()
    }

    /// Number of stored aggregated records.
    pub fn aggregate_count(&self) -> usize {
        self.aggregates.len()
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn insert_observations(&self, mut batch: Vec<MetricObservation>) -> StoreResult<()> {
        self.observations.write().append(&mut batch);
        Ok(())
    }

    async fn query_observations(
        &self,
        filter: &ObservationFilter,
    ) -> StoreResult<Vec<MetricObservation>> {
        let mut matched: Vec<MetricObservation> = self
            .observations
            .read()
            .iter()
            .filter(|obs| filter.matches(obs))
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn upsert_rule(&self, rule: &AggregationRule) -> StoreResult<()> {
        self.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn load_rules(&self) -> StoreResult<Vec<AggregationRule>> {
        Ok(self.rules.iter().map(|r| r.value().clone()).collect())
    }

    async fn upsert_aggregate(&self, record: &AggregatedRecord) -> StoreResult<()> {
        self.aggregates.insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn query_aggregates(
        &self,
        metric: &str,
        window: TimeWindow,
        range: TimeRange,
        dimensions: Option<&Dimensions>,
    ) -> StoreResult<Vec<AggregatedRecord>> {
        let mut matched: Vec<AggregatedRecord> = self
            .aggregates
            .iter()
            .filter(|entry| {
                let record = entry.value();
                record.key.metric == metric
                    && record.key.window == window
                    && range.contains(record.key.period_start)
                    && dimensions.map_or(true, |dims| {
                        dims.iter()
                            .all(|d| record.dimensions.get(&d.key) == Some(d.value.as_str()))
                    })
            })
            .map(|entry| entry.value().clone())
            .collect();

        matched.sort_by(|a, b| b.key.period_start.cmp(&a.key.period_start));
        Ok(matched)
    }

    async fn upsert_insight(&self, insight: &Insight) -> StoreResult<()> {
        self.insights.insert(insight.id.clone(), insight.clone());
        Ok(())
    }

    async fn query_insights(
        &self,
        category: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Insight>> {
        let mut matched: Vec<Insight> = self
            .insights
            .iter()
            .filter(|entry| category.map_or(true, |c| entry.value().category == c))
            .map(|entry| entry.value().clone())
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(limit);
        Ok(matched)
    }
}

// ----------------------------------------------------------------------------
// Failing Store (test support)
// ----------------------------------------------------------------------------

/// Store that fails every call. Exercises the degraded paths.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FailingStore;

#[cfg(test)]
#[async_trait]
impl MetricStore for FailingStore {
    async fn insert_observations(&self, batch: Vec<MetricObservation>) -> StoreResult<()> {
        Err(crate::error::StoreError::InsertFailed {
            count: batch.len(),
            message: "store unreachable".into(),
        })
    }

    async fn query_observations(
        &self,
        _filter: &ObservationFilter,
    ) -> StoreResult<Vec<MetricObservation>> {
        Err(crate::error::StoreError::query_failed("store unreachable"))
    }

    async fn upsert_rule(&self, rule: &AggregationRule) -> StoreResult<()> {
        Err(crate::error::StoreError::upsert_failed(
            format!("rule {}", rule.name),
            "store unreachable",
        ))
    }

    async fn load_rules(&self) -> StoreResult<Vec<AggregationRule>> {
        Err(crate::error::StoreError::query_failed("store unreachable"))
    }

    async fn upsert_aggregate(&self, _record: &AggregatedRecord) -> StoreResult<()> {
        Err(crate::error::StoreError::upsert_failed(
            "aggregate",
            "store unreachable",
        ))
    }

    async fn query_aggregates(
        &self,
        _metric: &str,
        _window: TimeWindow,
        _range: TimeRange,
        _dimensions: Option<&Dimensions>,
    ) -> StoreResult<Vec<AggregatedRecord>> {
        Err(crate::error::StoreError::query_failed("store unreachable"))
    }

    async fn upsert_insight(&self, _insight: &Insight) -> StoreResult<()> {
        Err(crate::error::StoreError::upsert_failed(
            "insight",
            "store unreachable",
        ))
    }

    async fn query_insights(
        &self,
        _category: Option<&str>,
        _limit: usize,
    ) -> StoreResult<Vec<Insight>> {
        Err(crate::error::StoreError::query_failed("store unreachable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetricObservation, Timestamp};

    fn obs(name: &str, value: f64, secs: i64) -> MetricObservation {
        MetricObservation::gauge(name, value, "test")
            .with_timestamp(Timestamp::from_secs(secs))
    }

    #[tokio::test]
    async fn filter_matches_names_range_and_dimensions() {
        let store = MemoryStore::new();
        store
            .insert_observations(vec![
                obs("users.active", 10.0, 100).with_dimension("region", "eu"),
                obs("users.active", 20.0, 200).with_dimension("region", "us"),
                obs("sessions.count", 5.0, 150),
            ])
            .await
            .unwrap();

        let filter = ObservationFilter::new()
            .metric("users.active")
            .range(TimeRange::new(
                Timestamp::from_secs(0),
                Timestamp::from_secs(300),
            ))
            .dimension("region", "eu");

        let rows = store.query_observations(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 10.0);
    }

    #[tokio::test]
    async fn query_orders_newest_first_and_limits() {
        let store = MemoryStore::new();
        store
            .insert_observations((0..10).map(|i| obs("m", i as f64, i)).collect())
            .await
            .unwrap();

        let filter = ObservationFilter::new().metric("m").limit(3);
        let rows = store.query_observations(&filter).await.unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].value, 9.0);
        assert_eq!(rows[2].value, 7.0);
    }
}
