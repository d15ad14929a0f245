//! Process orchestration for the credit ingestion service.
//!
//! Two building blocks live here:
//! - [`Runner`] runs long-lived app processes concurrently, translates
//!   SIGTERM/SIGINT into cancellation and runs closers once everything stopped.
//! - [`PollScheduler`] drives a [`ScheduledJob`] on a fixed cadence, never
//!   letting two cycles of the same job overlap.
//!
//! # Example
//!
//! ```no_run
//! use creditos_runner::{PollScheduler, Runner, ScheduledJob};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Heartbeat;
//!
//! #[async_trait::async_trait]
//! impl ScheduledJob for Heartbeat {
//!     async fn run_once(&self, _ctx: CancellationToken) -> anyhow::Result<()> {
//!         tracing::info!("still alive");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let scheduler = PollScheduler::new("heartbeat", Duration::from_secs(5), Arc::new(Heartbeat));
//!
//!     Runner::new()
//!         .with_app_process(move |ctx| scheduler.run(ctx))
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await
//! }
//! ```

mod runner;
mod scheduler;

pub use runner::*;
pub use scheduler::*;
