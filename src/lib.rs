//! # Vantage Engine
//!
//! Telemetry ingestion, aggregation, and analytics core for the Vantage
//! platform. Four components, each depending on the one below it:
//!
//! - [`ingest::MetricPipeline`] buffers and flushes raw observations and
//!   answers filtered queries.
//! - [`aggregate::AggregationEngine`] evaluates declarative rollup rules
//!   into per-period aggregated records.
//! - [`insight::InsightGenerator`] derives trends, anomalies,
//!   correlations, and threshold recommendations.
//! - [`predict::PredictiveEngine`] fits lightweight forecasting models and
//!   scores subject success.
//!
//! Everything runs inside one process on cooperative timers; the
//! persistent store sits behind the [`store::MetricStore`] trait.

#![warn(rust_2018_idioms)]

pub mod aggregate;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod insight;
pub mod logging;
pub mod predict;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod types;

pub use aggregate::{AggregatedRecord, AggregationEngine, AggregationRule, RuleId};
pub use config::EngineConfig;
pub use engine::AnalyticsEngine;
pub use error::{EngineError, EngineResult};
pub use ingest::{MetricPipeline, MetricQuery, QueryOutput};
pub use insight::{Insight, InsightGenerator, Timeframe};
pub use predict::{ModelChoice, ModelKind, PredictiveEngine, SuccessPrediction};
pub use stats::AggregateFunction;
pub use store::{MemoryStore, MetricStore};
pub use types::{MetricKind, MetricObservation, TimeWindow, Timestamp};
