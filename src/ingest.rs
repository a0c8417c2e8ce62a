// ============================================================================
// METRIC INGESTION & STORE
// ============================================================================
// Producers submit observations into an owned in-memory buffer; the buffer
// flushes to the persistent store as one bulk insert when it reaches
// capacity or when the periodic flush task fires. Observations are not
// queryable until their batch has flushed - an accepted trade-off for
// write throughput. A failed flush drops its batch: availability over
// durability at this boundary.
// ============================================================================

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::constants::{DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};
use crate::error::{EngineResult, StoreError, ValidationError};
use crate::stats::{AggregateFunction, SummaryStats};
use crate::store::{MetricStore, ObservationFilter};
use crate::types::{
    Dimensions, DimensionsExt, MetricObservation, SharedTimeSource, SystemTimeSource, TimeRange,
    Timestamp,
};

// ----------------------------------------------------------------------------
// Query Types
// ----------------------------------------------------------------------------

/// A read against ingested observations, optionally grouped client-side.
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    /// Metric names to match; empty matches all
    pub names: SmallVec<[CompactString; 4]>,
    /// Inclusive lower time bound
    pub start_time: Option<Timestamp>,
    /// Inclusive upper time bound
    pub end_time: Option<Timestamp>,
    /// Dimension equality constraints
    pub dimensions: Dimensions,
    /// Restrict to one subject
    pub subject_id: Option<CompactString>,
    /// Dimension keys to group by; empty returns raw observations
    pub group_by: SmallVec<[CompactString; 4]>,
    /// Statistic per group; defaults to Avg when grouping
    pub aggregate: Option<AggregateFunction>,
    /// Result cap, at most 1000 (the default)
    pub limit: Option<usize>,
}

impl MetricQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metric<N: Into<CompactString>>(mut self, name: N) -> Self {
        self.names.push(name.into());
        self
    }

    pub fn between(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
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

    pub fn group_by<K: Into<CompactString>>(mut self, key: K) -> Self {
        self.group_by.push(key.into());
        self
    }

    pub fn aggregate(mut self, function: AggregateFunction) -> Self {
        self.aggregate = Some(function);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn validate(&self) -> Result<usize, ValidationError> {
        let limit = self.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        if limit > MAX_QUERY_LIMIT {
            return Err(ValidationError::LimitTooLarge {
                requested: limit,
                max: MAX_QUERY_LIMIT,
            });
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(ValidationError::InvertedTimeRange {
                    start: start.as_nanos(),
                    end: end.as_nanos(),
                });
            }
        }
        Ok(limit)
    }

    fn to_filter(&self, limit: usize) -> ObservationFilter {
        let range = match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(TimeRange::new(start, end)),
            (Some(start), None) => Some(TimeRange::new(start, Timestamp::from_nanos(i64::MAX))),
            (None, Some(end)) => Some(TimeRange::new(Timestamp::EPOCH, end)),
            (None, None) => None,
        };
        ObservationFilter {
            names: self.names.clone(),
            range,
            dimensions: self.dimensions.clone(),
            subject_id: self.subject_id.clone(),
            // Grouping consumes the full match set; the cap applies to output rows
            limit: if self.group_by.is_empty() {
                Some(limit)
            } else {
                None
            },
        }
    }
}

/// One group row from a grouped query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    /// The grouping key values, in group-by order
    pub group: Vec<(CompactString, CompactString)>,
    /// Five-number summary of the group
    pub summary: SummaryStats,
    /// The requested statistic for the group
    pub value: f64,
}

/// Result of [`MetricPipeline::query`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// Raw observations, newest first
    Observations(Vec<MetricObservation>),
    /// Client-side grouped summaries
    Groups(Vec<GroupSummary>),
}

impl QueryOutput {
    /// Raw observations, or empty when the output is grouped.
    pub fn into_observations(self) -> Vec<MetricObservation> {
        match self {
            QueryOutput::Observations(obs) => obs,
            QueryOutput::Groups(_) => Vec::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Pipeline Counters
// ----------------------------------------------------------------------------

/// Monotonic counters exposed for self-monitoring.
#[derive(Debug, Default)]
struct PipelineCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    flushed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time snapshot of the pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub submitted: u64,
    pub rejected: u64,
    pub flushed: u64,
    pub dropped: u64,
}

// ----------------------------------------------------------------------------
// Metric Pipeline
// ----------------------------------------------------------------------------

/// The ingestion component: buffered writes and filtered reads.
pub struct MetricPipeline {
    store: Arc<dyn MetricStore>,
    clock: SharedTimeSource,
    buffer: Mutex<Vec<MetricObservation>>,
    capacity: usize,
    flush_interval: Duration,
    store_timeout: Duration,
    counters: PipelineCounters,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricPipeline {
    pub fn new(store: Arc<dyn MetricStore>, config: &IngestConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemTimeSource))
    }

    pub fn with_clock(
        store: Arc<dyn MetricStore>,
        config: &IngestConfig,
        clock: SharedTimeSource,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            store,
            clock,
            buffer: Mutex::new(Vec::with_capacity(config.buffer_capacity)),
            capacity: config.buffer_capacity,
            flush_interval: Duration::from_secs(config.flush_interval_secs),
            store_timeout: Duration::from_secs(config.store_timeout_secs),
            counters: PipelineCounters::default(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// The clock this pipeline observes.
    pub fn clock(&self) -> &SharedTimeSource {
        &self.clock
    }

    /// Submit one observation. Returns as soon as the observation is
    /// buffered; a capacity-triggered flush runs inline but its outcome
    /// never fails the submission.
    pub async fn submit(&self, observation: MetricObservation) -> EngineResult<()> {
        observation.validate().map_err(|e| {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            e
        })?;

        let full_batch = {
            let mut buffer = self.buffer.lock();
            buffer.push(observation);
            self.counters.submitted.fetch_add(1, Ordering::Relaxed);
            if buffer.len() >= self.capacity {
                Some(mem::take(&mut *buffer))
            } else {
                None
            }
        };

        if let Some(batch) = full_batch {
            self.flush_batch(batch).await;
        }
        Ok(())
    }

    /// Submit a batch of observations. The whole batch is validated before
    /// any of it is buffered, so a malformed batch leaves no partial state.
    pub async fn submit_batch(&self, observations: Vec<MetricObservation>) -> EngineResult<()> {
        for observation in &observations {
            observation.validate().map_err(|e| {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                e
            })?;
        }

        let count = observations.len() as u64;
        let full_batch = {
            let mut buffer = self.buffer.lock();
            buffer.extend(observations);
            self.counters.submitted.fetch_add(count, Ordering::Relaxed);
            if buffer.len() >= self.capacity {
                Some(mem::take(&mut *buffer))
            } else {
                None
            }
        };

        if let Some(batch) = full_batch {
            self.flush_batch(batch).await;
        }
        Ok(())
    }

    /// Drain the buffer and flush it immediately. Returns the number of
    /// observations handed to the store (even if the store then fails).
    pub async fn flush_now(&self) -> usize {
        let batch = mem::take(&mut *self.buffer.lock());
        if batch.is_empty() {
            return 0;
        }
        let count = batch.len();
        self.flush_batch(batch).await;
        count
    }

    /// One bulk insert, outside any lock and bounded by the store
    /// timeout. Failures are logged and the batch is dropped; nothing
    /// upstream is retried or blocked.
    async fn flush_batch(&self, batch: Vec<MetricObservation>) {
        let count = batch.len() as u64;
        let outcome = tokio::time::timeout(
            self.store_timeout,
            self.store.insert_observations(batch),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout {
            timeout_ms: self.store_timeout.as_millis() as u64,
        }));

        match outcome {
            Ok(()) => {
                self.counters.flushed.fetch_add(count, Ordering::Relaxed);
                debug!(target: "vantage::ingest", count, "Flushed observation batch");
            }
            Err(e) => {
                self.counters.dropped.fetch_add(count, Ordering::Relaxed);
                warn!(
                    target: "vantage::ingest",
                    count,
                    error = %e,
                    "Flush failed, dropping batch"
                );
            }
        }
    }

    /// Spawn the periodic flush task. The task drains the buffer one last
    /// time when shutdown is signalled.
    pub fn start_flush_task(self: &Arc<Self>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pipeline.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the task
            // waits one full interval before its first flush.
            ticker.tick().await;
            loop {
                // Checked before waiting so a signal sent before this task
                // first ran is not lost.
                if *shutdown_rx.borrow() {
                    let drained = pipeline.flush_now().await;
                    info!(target: "vantage::ingest", drained, "Flush task stopped");
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        pipeline.flush_now().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Signal the flush task to drain and stop.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Query flushed observations. With `group_by` set, matching rows are
    /// grouped client-side and reduced with the requested aggregate
    /// (Avg when unspecified).
    pub async fn query(&self, query: &MetricQuery) -> EngineResult<QueryOutput> {
        let limit = query.validate()?;
        let filter = query.to_filter(limit);
        let observations = tokio::time::timeout(
            self.store_timeout,
            self.store.query_observations(&filter),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout {
            timeout_ms: self.store_timeout.as_millis() as u64,
        }))?;

        if query.group_by.is_empty() {
            return Ok(QueryOutput::Observations(observations));
        }

        let function = query.aggregate.unwrap_or(AggregateFunction::Avg);
        let mut groups: ahash::AHashMap<Vec<CompactString>, Vec<f64>> = ahash::AHashMap::new();
        for obs in &observations {
            let key: Vec<CompactString> = query
                .group_by
                .iter()
                .map(|k| CompactString::from(obs.dimensions.get(k).unwrap_or("")))
                .collect();
            groups.entry(key).or_default().push(obs.value);
        }

        let mut rows: Vec<GroupSummary> = groups
            .into_iter()
            .map(|(key, values)| {
                let summary = SummaryStats::from_values(&values);
                let value = function.from_summary(&summary, &values);
                GroupSummary {
                    group: query.group_by.iter().cloned().zip(key).collect(),
                    summary,
                    value,
                }
            })
            .collect();

        rows.sort_by(|a, b| a.group.cmp(&b.group));
        rows.truncate(limit);
        Ok(QueryOutput::Groups(rows))
    }

    /// Convenience: the plain observation list for a query.
    pub async fn query_observations(
        &self,
        query: &MetricQuery,
    ) -> EngineResult<Vec<MetricObservation>> {
        Ok(self.query(query).await?.into_observations())
    }

    /// Number of observations currently buffered (not yet queryable).
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Timestamp from the injected clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FailingStore, MemoryStore};
    use crate::types::MetricKind;

    fn test_config(capacity: usize, flush_secs: u64) -> IngestConfig {
        IngestConfig {
            buffer_capacity: capacity,
            flush_interval_secs: flush_secs,
            store_timeout_secs: 5,
        }
    }

    fn pipeline_with(
        store: Arc<MemoryStore>,
        capacity: usize,
    ) -> Arc<MetricPipeline> {
        Arc::new(MetricPipeline::new(store, &test_config(capacity, 30)))
    }

    #[tokio::test]
    async fn buffer_flushes_at_capacity_and_not_before() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(Arc::clone(&store), 5);

        for i in 0..4 {
            pipeline
                .submit(MetricObservation::gauge("users.active", i as f64, "web"))
                .await
                .unwrap();
        }
        // Buffered but not yet flushed: nothing is queryable
        assert_eq!(store.observation_count(), 0);
        assert_eq!(pipeline.buffered(), 4);

        pipeline
            .submit(MetricObservation::gauge("users.active", 4.0, "web"))
            .await
            .unwrap();

        assert_eq!(store.observation_count(), 5);
        assert_eq!(pipeline.buffered(), 0);

        let out = pipeline
            .query_observations(&MetricQuery::new().metric("users.active"))
            .await
            .unwrap();
        assert_eq!(out.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flush_makes_observations_queryable() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(Arc::clone(&store), 1000);
        let task = pipeline.start_flush_task();

        pipeline
            .submit(MetricObservation::gauge("sessions.count", 1.0, "web"))
            .await
            .unwrap();
        assert_eq!(store.observation_count(), 0);

        // Paused clock auto-advances past the 30s interval tick
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.observation_count(), 1);

        pipeline.signal_shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_drains_the_buffer() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(Arc::clone(&store), 1000);
        let task = pipeline.start_flush_task();

        pipeline
            .submit_batch(vec![
                MetricObservation::gauge("a", 1.0, "web"),
                MetricObservation::gauge("b", 2.0, "web"),
            ])
            .await
            .unwrap();

        pipeline.signal_shutdown();
        task.await.unwrap();
        assert_eq!(store.observation_count(), 2);
    }

    #[tokio::test]
    async fn validation_failures_reject_without_buffering() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(store, 10);

        let err = pipeline
            .submit(MetricObservation::new(
                "users.active",
                MetricKind::Gauge,
                f64::INFINITY,
                "web",
            ))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "validation");
        assert_eq!(pipeline.buffered(), 0);
        assert_eq!(pipeline.stats().rejected, 1);

        // A batch with one bad observation buffers nothing
        let err = pipeline
            .submit_batch(vec![
                MetricObservation::gauge("ok", 1.0, "web"),
                MetricObservation::gauge("", 2.0, "web"),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.category(), "validation");
        assert_eq!(pipeline.buffered(), 0);
    }

    #[tokio::test]
    async fn unreachable_store_still_accepts_submissions() {
        let pipeline = Arc::new(MetricPipeline::new(
            Arc::new(FailingStore),
            &test_config(2, 30),
        ));

        // Second submit triggers a flush that fails; both submissions succeed
        pipeline
            .submit(MetricObservation::gauge("m", 1.0, "web"))
            .await
            .unwrap();
        pipeline
            .submit(MetricObservation::gauge("m", 2.0, "web"))
            .await
            .unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.flushed, 0);

        // And the pipeline keeps accepting afterwards
        pipeline
            .submit(MetricObservation::gauge("m", 3.0, "web"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn grouped_query_summarizes_per_dimension_value() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(Arc::clone(&store), 10);

        pipeline
            .submit_batch(vec![
                MetricObservation::gauge("latency", 100.0, "api").with_dimension("region", "eu"),
                MetricObservation::gauge("latency", 200.0, "api").with_dimension("region", "eu"),
                MetricObservation::gauge("latency", 50.0, "api").with_dimension("region", "us"),
            ])
            .await
            .unwrap();
        pipeline.flush_now().await;

        let out = pipeline
            .query(
                &MetricQuery::new()
                    .metric("latency")
                    .group_by("region")
                    .aggregate(AggregateFunction::Avg),
            )
            .await
            .unwrap();

        let QueryOutput::Groups(rows) = out else {
            panic!("expected grouped output");
        };
        assert_eq!(rows.len(), 2);
        let eu = rows.iter().find(|r| r.group[0].1 == "eu").unwrap();
        assert!((eu.value - 150.0).abs() < 1e-9);
        assert_eq!(eu.summary.count, 2);
    }

    #[tokio::test]
    async fn oversized_limit_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(store, 10);

        let err = pipeline
            .query(&MetricQuery::new().limit(5000))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "validation");
    }
}
