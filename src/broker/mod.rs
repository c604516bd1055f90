use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("channel not provisioned: {0}")]
    UnknownChannel(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

impl BrokerError {
    /// Missing provisioning is transient; a consumer should back off and
    /// try again instead of treating it as fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::UnknownChannel(_) | BrokerError::Unavailable(_))
    }
}

/// One message delivered to a channel subscriber.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub key: Option<String>,
    pub payload: Value,
}

/// Subscriber half of a channel. Messages published after subscription
/// are received in publish order; per-key ordering follows from the
/// single publish path per channel.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<BrokerMessage>,
}

impl Subscription {
    /// Next message, or `None` once the channel is gone. A consumer that
    /// falls behind the buffer skips to the oldest retained message.
    pub async fn next(&mut self) -> Option<BrokerMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscription lagged, resuming from oldest retained");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Contract every broker binding must satisfy: at-least-once publish with
/// a bounded synchronous acknowledgment, and channel subscription.
#[async_trait]
pub trait EventBroker: Send + Sync {
    async fn publish(
        &self,
        channel: &str,
        key: Option<&str>,
        payload: &Value,
    ) -> Result<(), BrokerError>;

    fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError>;
}

/// Broker backed by in-process broadcast channels. Channels are
/// provisioned lazily on first publish; subscribing to a channel nobody
/// has provisioned yet is the retryable `UnknownChannel` condition.
pub struct InProcessBroker {
    channels: DashMap<String, broadcast::Sender<BrokerMessage>>,
    buffer: usize,
    available: AtomicBool,
}

impl InProcessBroker {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a broker outage; publishes fail until restored.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn provision(&self, channel: &str) {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer).0);
    }
}

#[async_trait]
impl EventBroker for InProcessBroker {
    async fn publish(
        &self,
        channel: &str,
        key: Option<&str>,
        payload: &Value,
    ) -> Result<(), BrokerError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("broker marked down".to_string()));
        }

        self.provision(channel);
        let tx = self
            .channels
            .get(channel)
            .ok_or_else(|| BrokerError::UnknownChannel(channel.to_string()))?;

        let message = BrokerMessage {
            key: key.map(str::to_string),
            payload: payload.clone(),
        };

        // A send with no live subscribers is still a successful publish.
        let _ = tx.send(message);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
        let tx = self
            .channels
            .get(channel)
            .ok_or_else(|| BrokerError::UnknownChannel(channel.to_string()))?;

        Ok(Subscription { rx: tx.subscribe() })
    }
}
