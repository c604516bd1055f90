pub mod reprocessor;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::EventBroker;
use crate::cache::{event_processed_key, MemoryCache};
use crate::error::AppError;
use crate::models::dead_letter::{backoff_window, DeadLetterEntry, DeadLetterStatus};
use crate::models::event::{DomainEvent, EventDraft, EventKind};
use crate::observability::metrics::Metrics;
use crate::store::Store;

/// At-least-once event pipeline: the durable row commits with the
/// caller's transaction, the broker publish happens strictly afterwards,
/// and a failed publish is absorbed into a dead-letter entry instead of
/// surfacing to the caller.
pub struct EventPipeline {
    store: Arc<Store>,
    cache: Arc<MemoryCache>,
    broker: Arc<dyn EventBroker>,
    metrics: Metrics,
    publish_timeout: Duration,
    idempotency_ttl: Duration,
    backoff_cap_minutes: u32,
}

impl EventPipeline {
    pub fn new(
        store: Arc<Store>,
        cache: Arc<MemoryCache>,
        broker: Arc<dyn EventBroker>,
        metrics: Metrics,
        publish_timeout: Duration,
        idempotency_ttl: Duration,
        backoff_cap_minutes: u32,
    ) -> Self {
        Self {
            store,
            cache,
            broker,
            metrics,
            publish_timeout,
            idempotency_ttl,
            backoff_cap_minutes,
        }
    }

    /// Record and publish a standalone event in its own transaction.
    /// Callers that mutate state stage the event on their own [`Txn`]
    /// and call [`EventPipeline::dispatch`] after committing.
    pub async fn emit(&self, draft: EventDraft) -> Result<DomainEvent, AppError> {
        let mut txn = self.store.begin();
        txn.stage_event(draft);
        let mut committed = txn.commit();

        let event = committed
            .pop()
            .ok_or_else(|| AppError::Internal("staged event vanished on commit".to_string()))?;

        self.dispatch(&event).await;
        Ok(event)
    }

    /// Publish a committed event. Broker failure never propagates; the
    /// envelope is diverted to the dead-letter store for later replay.
    pub async fn dispatch(&self, event: &DomainEvent) {
        let channel = event.kind.channel();
        let key = partition_key(event);
        let envelope = envelope(event);

        let outcome = match timeout(
            self.publish_timeout,
            self.broker.publish(channel, key.as_deref(), &envelope),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "publish acknowledgment timed out after {:?}",
                self.publish_timeout
            )),
        };

        match outcome {
            Ok(()) => {
                self.metrics
                    .events_published_total
                    .with_label_values(&[channel, "success"])
                    .inc();
                self.mark_processed(event.id);
                debug!(event_id = %event.id, channel, "event published");
            }
            Err(error) => {
                self.metrics
                    .events_published_total
                    .with_label_values(&[channel, "dead_letter"])
                    .inc();
                self.divert_to_dead_letter(channel, key, envelope, error);
            }
        }
    }

    /// Advisory de-duplication flag, expiring after the configured
    /// horizon. Not a hard guarantee.
    pub fn mark_processed(&self, event_id: Uuid) {
        self.cache.set_json(
            &event_processed_key(event_id),
            &json!({"status": "processed"}),
            self.idempotency_ttl,
        );
    }

    pub fn is_duplicate(&self, event_id: Uuid) -> bool {
        self.cache.exists(&event_processed_key(event_id))
    }

    fn divert_to_dead_letter(
        &self,
        channel: &str,
        partition_key: Option<String>,
        payload: Value,
        error: String,
    ) {
        let now = Utc::now();
        let entry = DeadLetterEntry {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            partition_key,
            payload,
            error_message: error.clone(),
            retry_count: 0,
            status: DeadLetterStatus::Pending,
            next_retry_at: now + backoff_window(0, self.backoff_cap_minutes),
            processed_at: None,
            created_at: now,
            updated_at: now,
        };

        warn!(
            dead_letter_id = %entry.id,
            channel,
            error,
            "publish failed, event diverted to dead-letter store"
        );
        self.store.insert_dead_letter(entry);
        self.metrics
            .dead_letters_pending
            .set(self.store.pending_dead_letter_count() as i64);
    }
}

/// Location events carry the courier id as partition key so per-courier
/// ordering survives the broker.
fn partition_key(event: &DomainEvent) -> Option<String> {
    match event.kind {
        EventKind::LocationUpdate { .. } => event.courier_id.map(|id| id.to_string()),
        _ => None,
    }
}

/// Generic key-value envelope; the only place the tagged union is
/// flattened for the wire.
fn envelope(event: &DomainEvent) -> Value {
    json!({
        "event_id": event.id,
        "type": event.kind.name(),
        "timestamp": event.timestamp,
        "delivery_id": event.delivery_id,
        "order_id": event.order_id,
        "courier_id": event.courier_id,
        "data": event.kind,
        "location": event.location,
    })
}
