use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::cache::{location_key, MemoryCache};
use crate::events::EventPipeline;
use crate::models::event::{EventDraft, EventKind};
use crate::models::location::{CourierLocation, LocationSample};
use crate::realtime::{order_group, rider_group, FanOut, PushKind};
use crate::store::Store;

/// Per-courier current position: a TTL cache in front of the durable
/// append-only location log, with the non-terminal deliveries' last
/// known locations as the restart-recovery middle layer.
pub struct LocationStore {
    store: Arc<Store>,
    cache: Arc<MemoryCache>,
    pipeline: Arc<EventPipeline>,
    fanout: Arc<FanOut>,
    ttl: Duration,
}

impl LocationStore {
    pub fn new(
        store: Arc<Store>,
        cache: Arc<MemoryCache>,
        pipeline: Arc<EventPipeline>,
        fanout: Arc<FanOut>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            pipeline,
            fanout,
            ttl,
        }
    }

    /// Record a position report: unconditional log append, best-effort
    /// cache freshness, then best-effort event and fan-out side effects
    /// that must never fail the write itself.
    pub async fn write(
        &self,
        courier_id: Uuid,
        sample: LocationSample,
        delivery_id: Option<Uuid>,
    ) -> CourierLocation {
        let row = self.persist(courier_id, sample.clone(), delivery_id);

        let mut draft = EventDraft::new(EventKind::LocationUpdate {
            sample: sample.clone(),
        })
        .courier(courier_id)
        .location(sample.point);

        let order_id = delivery_id
            .and_then(|id| self.store.delivery(id))
            .map(|delivery| delivery.order_id);

        if let Some(delivery_id) = delivery_id {
            draft = draft.delivery(delivery_id);
        }
        if let Some(order_id) = order_id {
            draft = draft.order(order_id);
        }

        if let Err(err) = self.pipeline.emit(draft).await {
            warn!(courier_id = %courier_id, error = %err, "location event emission failed");
        }

        let push = serde_json::json!({
            "courier_id": courier_id,
            "delivery_id": delivery_id,
            "location": sample,
        });
        self.fanout
            .broadcast(&rider_group(courier_id), PushKind::LocationUpdate, push.clone());
        if let Some(order_id) = order_id {
            self.fanout
                .broadcast(&order_group(order_id), PushKind::LocationUpdate, push);
        }

        row
    }

    /// Persistence only, no notifications. Used for courier activation
    /// and synthetic seeding of the matching pool.
    pub fn write_silent(
        &self,
        courier_id: Uuid,
        sample: LocationSample,
        delivery_id: Option<Uuid>,
    ) -> CourierLocation {
        self.persist(courier_id, sample, delivery_id)
    }

    fn persist(
        &self,
        courier_id: Uuid,
        sample: LocationSample,
        delivery_id: Option<Uuid>,
    ) -> CourierLocation {
        let row = CourierLocation {
            id: Uuid::new_v4(),
            courier_id,
            delivery_id,
            sample: sample.clone(),
        };
        self.store.append_location(row.clone());
        self.cache
            .set_json(&location_key(courier_id), &sample, self.ttl);
        row
    }

    /// Cache hit, else newest last-known location on a non-terminal
    /// delivery, else the latest durable log row, else nothing.
    pub fn read(&self, courier_id: Uuid) -> Option<LocationSample> {
        if let Some(sample) = self.cache.get_json::<LocationSample>(&location_key(courier_id)) {
            return Some(sample);
        }

        if let Some((point, updated_at)) = self.store.latest_delivery_location(courier_id) {
            return Some(LocationSample::at(point, updated_at));
        }

        self.store
            .latest_location(courier_id)
            .map(|row| row.sample)
    }

    pub fn history(&self, courier_id: Uuid, limit: usize) -> Vec<CourierLocation> {
        self.store.location_history(courier_id, limit)
    }
}
