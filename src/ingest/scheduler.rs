use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{error, info};

use super::IngestionOrchestrator;
use crate::models::iso_millis;

/// Background task that runs an ingestion cycle every `period`.
///
/// Ticks land on multiples of `period` since the Unix epoch, so an hourly
/// period fires at the top of each UTC hour. When `run_immediately` is set an
/// extra cycle runs at startup. Failures are logged and the next tick retries.
pub fn spawn_ingestion_scheduler(
    orchestrator: Arc<IngestionOrchestrator>,
    period: Duration,
    run_immediately: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let wall_now = Utc::now();
        let first_delay = delay_until_boundary(wall_now, period);
        let mut tick = interval_at(Instant::now() + first_delay, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let first_tick = wall_now + chrono::Duration::milliseconds(first_delay.as_millis() as i64);
        info!(
            period_secs = period.as_secs(),
            run_immediately,
            first_tick = %iso_millis::format(&first_tick),
            "⏰ Ingestion scheduler started"
        );

        if run_immediately {
            run_cycle(&orchestrator).await;
        }

        loop {
            tick.tick().await;
            run_cycle(&orchestrator).await;
        }
    })
}

async fn run_cycle(orchestrator: &IngestionOrchestrator) {
    match orchestrator.run_ingestion_cycle().await {
        Ok(report) => info!(
            snapshot_id = %report.snapshot_id,
            captured_at = %iso_millis::format(&report.captured_at),
            coins_processed = report.coins_processed,
            "Scheduled ingestion completed"
        ),
        Err(e) => error!(error = %e, "Scheduled ingestion failed"),
    }
}

/// Time from `now` until the next multiple of `period` since the epoch.
/// Returns `period` when `now` sits exactly on a boundary.
fn delay_until_boundary(now: DateTime<Utc>, period: Duration) -> Duration {
    let period_ms = period.as_millis() as i64;
    if period_ms <= 0 {
        return period;
    }
    let into_period = now.timestamp_millis().rem_euclid(period_ms);
    Duration::from_millis((period_ms - into_period) as u64)
}
