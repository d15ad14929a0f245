use crate::domain::{decode_batch, BatchError, BatchOutcome, BatchProcessor};
use crate::nats::CommitCursor;
use anyhow::Context;
use async_trait::async_trait;
use common::nats::{QueueMessage, QueueSubscription};
use creditos_runner::ScheduledJob;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Polling,
    Processing,
    Committing,
}

/// Result of a single poll step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The poll timed out without a message.
    NoMessage,
    /// The batch was processed and its offset committed.
    Committed {
        partition: String,
        offset: u64,
        outcome: BatchOutcome,
    },
    /// The message was released without committing; the broker redelivers it later.
    Withheld {
        partition: String,
        offset: u64,
        reason: String,
    },
    /// Shutdown was requested before the step finished.
    Cancelled,
}

/// Pulls credit batches off the queue and commits each message only after every record in
/// it has been handled.
pub struct CreditConsumer {
    subscription: Arc<dyn QueueSubscription>,
    processor: BatchProcessor,
    poll_timeout: Duration,
    max_messages_per_cycle: usize,
    cursor: Mutex<CommitCursor>,
    state: Mutex<ConsumerState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Puts the consumer back to idle however the poll step ends.
struct IdleOnDrop<'a>(&'a Mutex<ConsumerState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *lock(self.0) = ConsumerState::Idle;
    }
}

impl CreditConsumer {
    pub fn new(
        subscription: Arc<dyn QueueSubscription>,
        processor: BatchProcessor,
        poll_timeout: Duration,
        max_messages_per_cycle: usize,
    ) -> Self {
        Self {
            subscription,
            processor,
            poll_timeout,
            max_messages_per_cycle: max_messages_per_cycle.max(1),
            cursor: Mutex::new(CommitCursor::new()),
            state: Mutex::new(ConsumerState::Idle),
        }
    }

    pub fn state(&self) -> ConsumerState {
        *lock(&self.state)
    }

    /// Snapshot of the committed offsets.
    pub fn cursor(&self) -> CommitCursor {
        lock(&self.cursor).clone()
    }

    fn set_state(&self, state: ConsumerState) {
        *lock(&self.state) = state;
    }

    /// Poll for one message, process its batch and commit it.
    ///
    /// Errors are reserved for the queue itself failing (poll or commit). Decode failures and
    /// unavailable storage release the message and report [`PollOutcome::Withheld`].
    pub async fn poll_once(&self, ctx: &CancellationToken) -> anyhow::Result<PollOutcome> {
        if ctx.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }

        self.set_state(ConsumerState::Polling);
        let _idle = IdleOnDrop(&self.state);

        let polled = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Ok(PollOutcome::Cancelled),
            polled = self.subscription.poll(self.poll_timeout) => polled,
        };

        match polled.context("Failed to poll credit queue")? {
            Some(message) => self.handle_message(message, ctx).await,
            None => {
                debug!("No credit message available");
                Ok(PollOutcome::NoMessage)
            }
        }
    }

    #[instrument(
        skip(self, message, ctx),
        fields(
            partition = %message.partition,
            offset = message.offset,
            delivered = message.delivered
        )
    )]
    async fn handle_message(
        &self,
        message: QueueMessage,
        ctx: &CancellationToken,
    ) -> anyhow::Result<PollOutcome> {
        self.set_state(ConsumerState::Processing);
        debug!(
            key = message.key.as_deref().unwrap_or_default(),
            "Received credit message"
        );

        let batch = match decode_batch(&message.payload) {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Failed to decode credit message, withholding cursor");
                return Ok(self.withhold(message, e.to_string()).await);
            }
        };

        if batch.is_empty() {
            warn!("Credit message contains no credits");
        }

        let outcome = match self.processor.process(&batch, ctx).await {
            Ok(outcome) => outcome,
            Err(e @ BatchError::Cancelled { .. }) => {
                warn!(error = %e, "Shutdown during batch, message left uncommitted");
                self.release(&message).await;
                return Ok(PollOutcome::Cancelled);
            }
            Err(e @ BatchError::StorageUnavailable(_)) => {
                error!(error = %e, "Storage unavailable, withholding cursor");
                return Ok(self.withhold(message, e.to_string()).await);
            }
        };

        self.set_state(ConsumerState::Committing);
        self.subscription.commit(&message).await.with_context(|| {
            format!(
                "Failed to commit credit message {}@{}",
                message.partition, message.offset
            )
        })?;
        lock(&self.cursor).advance(&message.partition, message.offset);

        info!(
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            rejected = outcome.rejected.len(),
            failed = outcome.failed.len(),
            "Committed credit message"
        );

        Ok(PollOutcome::Committed {
            partition: message.partition,
            offset: message.offset,
            outcome,
        })
    }

    async fn withhold(&self, message: QueueMessage, reason: String) -> PollOutcome {
        self.release(&message).await;
        PollOutcome::Withheld {
            partition: message.partition,
            offset: message.offset,
            reason,
        }
    }

    async fn release(&self, message: &QueueMessage) {
        if let Err(e) = self.subscription.release(message).await {
            warn!(
                error = %e,
                "Failed to release credit message, broker will redeliver after ack wait"
            );
        }
    }
}

#[async_trait]
impl ScheduledJob for CreditConsumer {
    /// Drains the queue until it is empty, a message is withheld, or the per-cycle cap is hit.
    async fn run_once(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        for _ in 0..self.max_messages_per_cycle {
            match self.poll_once(&ctx).await? {
                PollOutcome::Committed { .. } => continue,
                PollOutcome::NoMessage | PollOutcome::Withheld { .. } | PollOutcome::Cancelled => {
                    break
                }
            }
        }
        Ok(())
    }
}
