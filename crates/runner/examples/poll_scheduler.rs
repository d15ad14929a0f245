//! Poll scheduler driven by the runner
//!
//! This example demonstrates:
//! - A scheduled job that sometimes runs longer than its period (ticks are skipped, not queued)
//! - Graceful shutdown on SIGTERM/SIGINT (Ctrl+C) draining the in-flight cycle
//! - Cleanup with closers
//!
//! Run with: cargo run --example poll_scheduler

use async_trait::async_trait;
use creditos_runner::{PollScheduler, Runner, ScheduledJob};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Every third cycle takes longer than the schedule period.
struct UnevenJob {
    cycle: AtomicU64,
}

#[async_trait]
impl ScheduledJob for UnevenJob {
    async fn run_once(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        let cycle = self.cycle.fetch_add(1, Ordering::Relaxed) + 1;
        let work = if cycle % 3 == 0 {
            Duration::from_millis(2500)
        } else {
            Duration::from_millis(300)
        };

        tracing::info!(cycle, work_ms = work.as_millis() as u64, "cycle started");
        tokio::select! {
            _ = ctx.cancelled() => tracing::info!(cycle, "cycle cancelled"),
            _ = tokio::time::sleep(work) => tracing::info!(cycle, "cycle finished"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    let scheduler = PollScheduler::new(
        "uneven",
        Duration::from_secs(1),
        Arc::new(UnevenJob {
            cycle: AtomicU64::new(0),
        }),
    );
    let stats = scheduler.stats();

    let runner = Runner::new()
        .with_app_process(move |ctx| scheduler.run(ctx))
        .with_closer(move || async move {
            tracing::info!(
                ticks = stats.ticks(),
                cycles = stats.cycles_started(),
                skipped = stats.ticks_skipped(),
                "scheduler summary"
            );
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(5));

    tracing::info!("Press Ctrl+C to trigger graceful shutdown");
    runner.run().await
}
