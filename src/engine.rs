// ============================================================================
// ENGINE FACADE
// ============================================================================
// Wires the four components over one store and owns their background
// tasks. Collaborating services hold this facade and use the component
// handles it exposes.
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::aggregate::AggregationEngine;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::ingest::MetricPipeline;
use crate::insight::InsightGenerator;
use crate::predict::PredictiveEngine;
use crate::scheduler::Scheduler;
use crate::store::MetricStore;
use crate::types::SharedTimeSource;

/// The assembled analytics engine.
pub struct AnalyticsEngine {
    config: EngineConfig,
    pipeline: Arc<MetricPipeline>,
    aggregation: Arc<AggregationEngine>,
    insights: Arc<InsightGenerator>,
    prediction: Arc<PredictiveEngine>,
    scheduler: Arc<Scheduler>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AnalyticsEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn MetricStore>) -> Self {
        let pipeline = Arc::new(MetricPipeline::new(Arc::clone(&store), &config.ingest));
        Self::assemble(config, store, pipeline)
    }

    /// Build with an injected clock, for tests and simulations.
    pub fn with_clock(
        config: EngineConfig,
        store: Arc<dyn MetricStore>,
        clock: SharedTimeSource,
    ) -> Self {
        let pipeline = Arc::new(MetricPipeline::with_clock(
            Arc::clone(&store),
            &config.ingest,
            clock,
        ));
        Self::assemble(config, store, pipeline)
    }

    fn assemble(
        config: EngineConfig,
        store: Arc<dyn MetricStore>,
        pipeline: Arc<MetricPipeline>,
    ) -> Self {
        let aggregation = Arc::new(AggregationEngine::new(
            Arc::clone(&pipeline),
            Arc::clone(&store),
        ));
        let insights = Arc::new(InsightGenerator::new(
            Arc::clone(&pipeline),
            Arc::clone(&store),
            config.insight.key_metrics.clone(),
        ));
        let prediction = Arc::new(PredictiveEngine::new(
            Arc::clone(&pipeline),
            Arc::clone(&store),
            &config.prediction,
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&aggregation),
            Arc::clone(&insights),
            Duration::from_secs(config.insight.refresh_interval_secs),
        ));

        Self {
            config,
            pipeline,
            aggregation,
            insights,
            prediction,
            scheduler,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Load persisted rules and install the seed rollups, then spawn the
    /// flush and scheduler tasks.
    pub async fn start(&self) -> EngineResult<()> {
        match self.aggregation.load_persisted_rules().await {
            Ok(count) => info!(target: "vantage::engine", count, "Loaded persisted rules"),
            Err(e) => warn!(
                target: "vantage::engine",
                error = %e,
                "Could not load persisted rules, starting with an empty registry"
            ),
        }

        if self.config.aggregation.install_seed_rules {
            let installed = self.aggregation.install_seed_rules().await?;
            if installed > 0 {
                info!(target: "vantage::engine", installed, "Installed seed rules");
            }
        }

        let mut tasks = self.tasks.lock();
        tasks.push(self.pipeline.start_flush_task());
        if self.config.aggregation.scheduled {
            tasks.extend(self.scheduler.start());
        }
        info!(
            target: "vantage::engine",
            instance = %self.config.general.instance_name,
            "Engine started"
        );
        Ok(())
    }

    /// Stop the background tasks, draining the ingestion buffer.
    pub async fn shutdown(&self) {
        self.scheduler.signal_shutdown();
        self.pipeline.signal_shutdown();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let grace = Duration::from_secs(self.config.general.shutdown_timeout_secs);
        for mut task in tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!(target: "vantage::engine", "Background task did not stop in time, aborting");
                task.abort();
            }
        }
        info!(target: "vantage::engine", "Engine stopped");
    }

    pub fn pipeline(&self) -> &Arc<MetricPipeline> {
        &self.pipeline
    }

    pub fn aggregation(&self) -> &Arc<AggregationEngine> {
        &self.aggregation
    }

    pub fn insights(&self) -> &Arc<InsightGenerator> {
        &self.insights
    }

    pub fn prediction(&self) -> &Arc<PredictiveEngine> {
        &self.prediction
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::RuleId;
    use crate::insight::Timeframe;
    use crate::predict::{ModelChoice, ModelKind};
    use crate::store::MemoryStore;
    use crate::types::{ManualTimeSource, MetricObservation, TimeRange, TimeWindow, Timestamp};

    const DAY: Duration = Duration::from_secs(86_400);

    #[tokio::test]
    async fn end_to_end_ingest_aggregate_insight_predict() {
        let now = Timestamp::from_secs(1_000 * 86_400);
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualTimeSource::new(now));
        let mut config = EngineConfig::default();
        config.aggregation.scheduled = false;

        let engine = AnalyticsEngine::with_clock(
            config,
            Arc::clone(&store) as Arc<dyn MetricStore>,
            clock,
        );
        engine.start().await.unwrap();
        assert_eq!(engine.aggregation().rules().len(), 3);

        // Ten days of growing activity
        let batch: Vec<MetricObservation> = (0..10)
            .map(|d| {
                MetricObservation::gauge("users.active", 100.0 + 10.0 * d as f64, "web")
                    .with_timestamp(now.sub_duration(DAY * (10 - d) as u32))
            })
            .collect();
        engine.pipeline().submit_batch(batch).await.unwrap();
        engine.pipeline().flush_now().await;

        // Rule for the daily window over the same metric
        let rule_id: RuleId = engine
            .aggregation()
            .create_rule(crate::aggregate::AggregationRule::new(
                "daily-users",
                ["users.active"],
                crate::stats::AggregateFunction::Avg,
                Vec::<&str>::new(),
                TimeWindow::Day,
            ))
            .await
            .unwrap();
        engine
            .aggregation()
            .run_aggregation(Some(rule_id), None)
            .await
            .unwrap();

        let records = engine
            .aggregation()
            .get_aggregated_data(
                "users.active",
                TimeWindow::Day,
                TimeRange::new(Timestamp::EPOCH, now),
                None,
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 1);

        let insights = engine.insights().generate(Timeframe::Month).await.unwrap();
        assert!(insights
            .iter()
            .any(|i| i.source_metrics.iter().any(|m| *m == "users.active")));

        let forecast = engine
            .prediction()
            .predict_metric("users.active", 3, ModelChoice::Kind(ModelKind::Linear))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forecast.points.len(), 3);
        assert!(forecast.points[0].value > 190.0);

        engine.shutdown().await;
    }
}
