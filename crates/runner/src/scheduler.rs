use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A unit of work executed once per scheduler tick.
///
/// Implementations must observe `ctx` and unwind promptly when it is cancelled.
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    async fn run_once(&self, ctx: CancellationToken) -> anyhow::Result<()>;
}

/// Counters describing what a [`PollScheduler`] has done so far.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    ticks: AtomicU64,
    cycles_started: AtomicU64,
    cycles_failed: AtomicU64,
    ticks_skipped: AtomicU64,
}

impl SchedulerStats {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn cycles_started(&self) -> u64 {
        self.cycles_started.load(Ordering::Relaxed)
    }

    /// Cycles that returned an error or panicked.
    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    /// Ticks that fired while the previous cycle was still running.
    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped.load(Ordering::Relaxed)
    }
}

/// Drives a [`ScheduledJob`] on a fixed interval.
///
/// At most one cycle is in flight at any time: a tick that fires while a cycle is still
/// running is counted and dropped, never queued. Errors and panics from a cycle are logged
/// and the schedule keeps going. On cancellation the in-flight cycle is cancelled through a
/// child token and awaited before [`PollScheduler::run`] returns.
pub struct PollScheduler {
    name: String,
    period: Duration,
    job: Arc<dyn ScheduledJob>,
    stats: Arc<SchedulerStats>,
}

impl PollScheduler {
    pub fn new(name: impl Into<String>, period: Duration, job: Arc<dyn ScheduledJob>) -> Self {
        Self {
            name: name.into(),
            period,
            job,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!(job = %self.name, period_ms = self.period.as_millis() as u64, "starting poll scheduler");

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                _ = interval.tick() => {}
            }

            self.stats.ticks.fetch_add(1, Ordering::Relaxed);

            if let Some(handle) = in_flight.take() {
                if !handle.is_finished() {
                    self.stats.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(job = %self.name, "previous cycle still running, skipping tick");
                    in_flight = Some(handle);
                    continue;
                }
                self.reap(handle).await;
            }

            in_flight = Some(self.spawn_cycle(ctx.child_token()));
        }

        if let Some(handle) = in_flight {
            debug!(job = %self.name, "waiting for in-flight cycle to finish");
            self.reap(handle).await;
        }

        info!(
            job = %self.name,
            cycles = self.stats.cycles_started(),
            skipped = self.stats.ticks_skipped(),
            "poll scheduler stopped"
        );
        Ok(())
    }

    fn spawn_cycle(&self, ctx: CancellationToken) -> JoinHandle<()> {
        self.stats.cycles_started.fetch_add(1, Ordering::Relaxed);

        let job = self.job.clone();
        let stats = self.stats.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            if let Err(err) = job.run_once(ctx).await {
                stats.cycles_failed.fetch_add(1, Ordering::Relaxed);
                warn!(job = %name, error = %format!("{err:#}"), "scheduled cycle failed");
            }
        })
    }

    async fn reap(&self, handle: JoinHandle<()>) {
        if let Err(err) = handle.await {
            self.stats.cycles_failed.fetch_add(1, Ordering::Relaxed);
            error!(job = %self.name, error = %err, "scheduled cycle panicked");
        }
    }
}
