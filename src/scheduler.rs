// ============================================================================
// SCHEDULER
// ============================================================================
// Cooperative periodic triggers inside the one service process: each
// aggregation window fires at its natural UTC boundary (top of hour,
// midnight, Monday, first of month) and insight generation refreshes on a
// fixed interval. No cross-process coordination; a boundary missed while
// the process was down is not backfilled.
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, TimeZone, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregate::AggregationEngine;
use crate::insight::{InsightGenerator, Timeframe};
use crate::types::{TimeWindow, Timestamp};

/// The next natural boundary for a window, strictly after `now`.
pub fn next_boundary(window: TimeWindow, now: Timestamp) -> Timestamp {
    match window {
        TimeWindow::Hour => now.floor_to_hour().add_duration(Duration::from_secs(3600)),
        TimeWindow::Day => now.floor_to_day().add_duration(Duration::from_secs(86_400)),
        TimeWindow::Week => now
            .floor_to_week()
            .add_duration(Duration::from_secs(7 * 86_400)),
        TimeWindow::Month => {
            let dt = now.to_datetime();
            let (year, month) = if dt.month() == 12 {
                (dt.year() + 1, 1)
            } else {
                (dt.year(), dt.month() + 1)
            };
            Timestamp::from_datetime(
                Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
                    .single()
                    .unwrap_or_default(),
            )
        }
    }
}

/// Spawns and owns the periodic trigger tasks.
pub struct Scheduler {
    aggregation: Arc<AggregationEngine>,
    insights: Arc<InsightGenerator>,
    insight_refresh: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        aggregation: Arc<AggregationEngine>,
        insights: Arc<InsightGenerator>,
        insight_refresh: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            aggregation,
            insights,
            insight_refresh,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawn all trigger tasks: one per aggregation window plus the
    /// insight refresh loop.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(5);
        for window in [
            TimeWindow::Hour,
            TimeWindow::Day,
            TimeWindow::Week,
            TimeWindow::Month,
        ] {
            handles.push(self.spawn_aggregation_trigger(window));
        }
        handles.push(self.spawn_insight_trigger());
        info!(target: "vantage::scheduler", "Scheduler started");
        handles
    }

    fn spawn_aggregation_trigger(self: &Arc<Self>, window: TimeWindow) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                let now = Timestamp::now();
                let boundary = next_boundary(window, now);
                let delay = boundary.duration_since(now);
                debug!(
                    target: "vantage::scheduler",
                    window = %window,
                    delay_secs = delay.as_secs(),
                    "Waiting for next aggregation boundary"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        match scheduler.aggregation.run_aggregation(None, Some(window)).await {
                            Ok(report) => debug!(
                                target: "vantage::scheduler",
                                window = %window,
                                records = report.records_written,
                                failed = report.rules_failed,
                                "Scheduled aggregation complete"
                            ),
                            Err(e) => warn!(
                                target: "vantage::scheduler",
                                window = %window,
                                error = %e,
                                "Scheduled aggregation failed"
                            ),
                        }
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

    fn spawn_insight_trigger(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.insight_refresh);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        match scheduler.insights.generate(Timeframe::Day).await {
                            Ok(insights) => debug!(
                                target: "vantage::scheduler",
                                count = insights.len(),
                                "Scheduled insight refresh complete"
                            ),
                            Err(e) => warn!(
                                target: "vantage::scheduler",
                                error = %e,
                                "Scheduled insight refresh failed"
                            ),
                        }
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

    /// Signal every trigger task to stop after its current iteration.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Timestamp {
        Timestamp::from_datetime(Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap())
    }

    #[test]
    fn hourly_boundary_is_top_of_next_hour() {
        let now = ts(2024, 3, 15, 14, 37);
        assert_eq!(next_boundary(TimeWindow::Hour, now), ts(2024, 3, 15, 15, 0));
    }

    #[test]
    fn daily_boundary_is_next_midnight() {
        let now = ts(2024, 3, 15, 14, 37);
        assert_eq!(next_boundary(TimeWindow::Day, now), ts(2024, 3, 16, 0, 0));
    }

    #[test]
    fn weekly_boundary_is_next_monday() {
        // Friday 2024-03-15 -> Monday 2024-03-18
        let now = ts(2024, 3, 15, 14, 37);
        assert_eq!(next_boundary(TimeWindow::Week, now), ts(2024, 3, 18, 0, 0));
    }

    #[test]
    fn monthly_boundary_rolls_over_the_year() {
        let now = ts(2024, 12, 20, 8, 0);
        assert_eq!(next_boundary(TimeWindow::Month, now), ts(2025, 1, 1, 0, 0));

        let mid_year = ts(2024, 3, 15, 0, 0);
        assert_eq!(
            next_boundary(TimeWindow::Month, mid_year),
            ts(2024, 4, 1, 0, 0)
        );
    }

    #[test]
    fn boundaries_are_strictly_in_the_future() {
        // Exactly on a boundary advances to the next one
        let on_the_hour = ts(2024, 3, 15, 14, 0);
        assert_eq!(
            next_boundary(TimeWindow::Hour, on_the_hour),
            ts(2024, 3, 15, 15, 0)
        );
    }
}
