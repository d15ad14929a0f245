use crate::domain::{BatchProcessor, IdempotentWriter};
use crate::nats::CreditConsumer;
use common::domain::{Clock, CreditRepository};
use common::nats::QueueSubscription;
use creditos_runner::{AppProcess, PollScheduler, ScheduledJob, SchedulerStats};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const SCHEDULER_NAME: &str = "credit-consumer";

pub struct CreditWorkerConfig {
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub max_messages_per_cycle: usize,
}

pub struct CreditWorker {
    consumer: Arc<CreditConsumer>,
    scheduler: PollScheduler,
}

impl CreditWorker {
    pub fn new(
        repository: Arc<dyn CreditRepository>,
        subscription: Arc<dyn QueueSubscription>,
        clock: Arc<dyn Clock>,
        config: CreditWorkerConfig,
    ) -> Self {
        info!(
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            poll_timeout_ms = config.poll_timeout.as_millis() as u64,
            "Initializing credit worker"
        );

        let processor = BatchProcessor::new(repository, IdempotentWriter::new(clock));
        let consumer = Arc::new(CreditConsumer::new(
            subscription,
            processor,
            config.poll_timeout,
            config.max_messages_per_cycle,
        ));

        let job: Arc<dyn ScheduledJob> = consumer.clone();
        let scheduler = PollScheduler::new(SCHEDULER_NAME, config.poll_interval, job);

        Self {
            consumer,
            scheduler,
        }
    }

    pub fn consumer(&self) -> Arc<CreditConsumer> {
        self.consumer.clone()
    }

    pub fn scheduler_stats(&self) -> Arc<SchedulerStats> {
        self.scheduler.stats()
    }

    pub fn into_runner_process(self) -> AppProcess {
        let scheduler = self.scheduler;
        Box::new(move |ctx| Box::pin(async move { scheduler.run(ctx).await }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use common::domain::{FixedClock, InMemoryCreditRepository};
    use common::nats::MockQueueSubscription;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn test_runner_process_polls_on_interval_until_cancelled() {
        let mut subscription = MockQueueSubscription::new();
        subscription.expect_poll().returning(|_| Ok(None));

        let worker = CreditWorker::new(
            Arc::new(InMemoryCreditRepository::new()),
            Arc::new(subscription),
            Arc::new(FixedClock(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap())),
            CreditWorkerConfig {
                poll_interval: Duration::from_secs(5),
                poll_timeout: Duration::from_millis(500),
                max_messages_per_cycle: 10,
            },
        );
        let stats = worker.scheduler_stats();
        let consumer = worker.consumer();

        let ctx = CancellationToken::new();
        let handle = tokio::spawn((worker.into_runner_process())(ctx.clone()));

        tokio::time::sleep(Duration::from_millis(12_500)).await;
        ctx.cancel();
        handle.await.unwrap().unwrap();

        // Ticks at 0 s, 5 s and 10 s.
        assert_eq!(stats.cycles_started(), 3);
        assert_eq!(stats.cycles_failed(), 0);
        assert!(consumer.cursor().partitions().next().is_none());
    }
}
