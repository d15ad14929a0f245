use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// One message handed out by a [`QueueSubscription`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    /// Producer-supplied message key, if any
    pub key: Option<String>,
    /// Ordering domain of the message; cursors are tracked per partition
    pub partition: String,
    /// Position of the message inside its partition
    pub offset: u64,
    /// How many times this message has been delivered, starting at 1
    pub delivered: i64,
    pub payload: Bytes,
}

/// Abstracts an offset-addressed queue subscription with manual commit control.
///
/// A message that is neither committed nor released stays owned by this consumer
/// until the broker times it out.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait QueueSubscription: Send + Sync {
    /// Wait up to `timeout` for the next message; `None` means nothing was available
    async fn poll(&self, timeout: Duration) -> Result<Option<QueueMessage>>;

    /// Durably advance the read cursor past `message`
    async fn commit(&self, message: &QueueMessage) -> Result<()>;

    /// Give `message` back without advancing the cursor so it is delivered again
    async fn release(&self, message: &QueueMessage) -> Result<()>;
}
