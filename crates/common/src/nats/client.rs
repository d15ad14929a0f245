use crate::nats::JetStreamSubscription;
use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use tracing::info;

/// Settings for the durable pull consumer behind a [`JetStreamSubscription`].
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub filter_subject: String,
    /// Deliveries after which JetStream gives up on a message that is never committed
    pub max_deliver: i64,
}

pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: std::time::Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis() as u64, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("Successfully connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Create the stream if it does not exist yet
    pub async fn ensure_stream(&self, stream_name: &str, subject: &str) -> Result<()> {
        info!(stream = %stream_name, "Ensuring stream exists");

        match self.jetstream.get_stream(stream_name).await {
            Ok(_) => {
                info!(stream = %stream_name, "Stream already exists");
            }
            Err(_) => {
                self.jetstream
                    .create_stream(StreamConfig {
                        name: stream_name.to_string(),
                        subjects: vec![subject.to_string()],
                        description: Some("Constituted credit batches".to_string()),
                        ..Default::default()
                    })
                    .await
                    .context("Failed to create stream")?;
                info!(stream = %stream_name, "Created stream");
            }
        }

        Ok(())
    }

    /// Create (or bind to) the durable consumer and wrap it as a queue subscription.
    ///
    /// `max_ack_pending` is pinned to 1 so a released message blocks the ones behind it,
    /// which keeps redelivery in partition order.
    pub async fn subscribe(&self, config: &SubscriptionConfig) -> Result<JetStreamSubscription> {
        let consumer = self
            .jetstream
            .create_consumer_on_stream(
                jetstream::consumer::pull::Config {
                    name: Some(config.consumer_name.clone()),
                    durable_name: Some(config.consumer_name.clone()),
                    filter_subject: config.filter_subject.clone(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    deliver_policy: jetstream::consumer::DeliverPolicy::All,
                    max_ack_pending: 1,
                    max_deliver: config.max_deliver,
                    ..Default::default()
                },
                config.stream_name.as_str(),
            )
            .await
            .context("Failed to create consumer")?;

        info!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            filter = %config.filter_subject,
            max_deliver = config.max_deliver,
            "Subscribed to credit stream"
        );

        Ok(JetStreamSubscription::new(consumer))
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    pub async fn close(self) -> Result<()> {
        info!("Closing NATS connection");
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")
    }
}
