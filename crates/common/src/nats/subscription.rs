use crate::nats::{QueueMessage, QueueSubscription};
use anyhow::{anyhow, Context, Result};
use async_nats::jetstream::{self, consumer::PullConsumer, AckKind};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// [`QueueSubscription`] backed by a durable JetStream pull consumer.
///
/// The subject is the partition and the stream sequence is the offset. Fetched messages are
/// kept until they are committed (double ack) or released (NAK).
pub struct JetStreamSubscription {
    consumer: PullConsumer,
    in_flight: Mutex<HashMap<u64, jetstream::Message>>,
}

impl JetStreamSubscription {
    pub fn new(consumer: PullConsumer) -> Self {
        Self {
            consumer,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    async fn take_in_flight(&self, message: &QueueMessage) -> Result<jetstream::Message> {
        self.in_flight
            .lock()
            .await
            .remove(&message.offset)
            .with_context(|| {
                format!(
                    "message at {}@{} is not in flight",
                    message.partition, message.offset
                )
            })
    }
}

#[async_trait]
impl QueueSubscription for JetStreamSubscription {
    async fn poll(&self, timeout: Duration) -> Result<Option<QueueMessage>> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(timeout)
            .messages()
            .await
            .context("Failed to fetch messages")?;

        while let Some(next) = messages.next().await {
            let message = match next {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Error receiving message");
                    continue;
                }
            };

            let (offset, delivered) = {
                let info = message
                    .info()
                    .map_err(|e| anyhow!("Message without JetStream metadata: {e}"))?;
                (info.stream_sequence, info.delivered)
            };
            let key = message
                .headers
                .as_ref()
                .and_then(|headers| headers.get(async_nats::header::NATS_MESSAGE_ID))
                .map(|value| value.as_str().to_string());

            let queue_message = QueueMessage {
                key,
                partition: message.subject.to_string(),
                offset,
                delivered,
                payload: message.payload.clone(),
            };

            debug!(
                partition = %queue_message.partition,
                offset,
                delivered,
                "Fetched message"
            );
            self.in_flight.lock().await.insert(offset, message);
            return Ok(Some(queue_message));
        }

        Ok(None)
    }

    async fn commit(&self, message: &QueueMessage) -> Result<()> {
        let in_flight = self.take_in_flight(message).await?;
        in_flight
            .double_ack()
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {e}"))
    }

    async fn release(&self, message: &QueueMessage) -> Result<()> {
        let in_flight = self.take_in_flight(message).await?;
        in_flight
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| anyhow!("Failed to reject message: {e}"))
    }
}
