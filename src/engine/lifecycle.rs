use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::cache::{active_deliveries_key, MemoryCache};
use crate::error::AppError;
use crate::events::EventPipeline;
use crate::location::LocationStore;
use crate::models::courier::{CourierStatus, GeoPoint};
use crate::models::delivery::{Delivery, DeliveryStatus, SimulationStatus};
use crate::models::event::{EventDraft, EventKind};
use crate::models::location::LocationSample;
use crate::models::order::OrderStatus;
use crate::realtime::{order_group, FanOut, PushKind};
use crate::store::Store;

/// One transition request. Everything is optional: a call with no status
/// is a pure location/progress update and skips all status and event
/// logic.
#[derive(Debug, Default, Clone)]
pub struct DeliveryUpdate {
    pub status: Option<DeliveryStatus>,
    pub location: Option<GeoPoint>,
    pub route_index: Option<u32>,
    pub simulation_status: Option<SimulationStatus>,
}

/// Validates and applies delivery transitions, keeping the parent order
/// in step and telling the event pipeline and subscribers about it.
pub struct DeliveryLifecycle {
    store: Arc<Store>,
    cache: Arc<MemoryCache>,
    locations: Arc<LocationStore>,
    pipeline: Arc<EventPipeline>,
    fanout: Arc<FanOut>,
}

impl DeliveryLifecycle {
    pub fn new(
        store: Arc<Store>,
        cache: Arc<MemoryCache>,
        locations: Arc<LocationStore>,
        pipeline: Arc<EventPipeline>,
        fanout: Arc<FanOut>,
    ) -> Self {
        Self {
            store,
            cache,
            locations,
            pipeline,
            fanout,
        }
    }

    pub async fn accept(&self, delivery_id: Uuid) -> Result<Delivery, AppError> {
        self.update(
            delivery_id,
            DeliveryUpdate {
                status: Some(DeliveryStatus::Accepted),
                ..DeliveryUpdate::default()
            },
        )
        .await
    }

    pub async fn update(
        &self,
        delivery_id: Uuid,
        update: DeliveryUpdate,
    ) -> Result<Delivery, AppError> {
        let probe = self
            .store
            .delivery(delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;
        let order_id = probe.order_id;

        // Order lock before delivery lock, everywhere.
        let _order_lock = self.store.lock_row(order_id).await?;
        let _delivery_lock = self.store.lock_row(delivery_id).await?;

        let mut delivery = self
            .store
            .delivery(delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;
        let mut order = self
            .store
            .order(order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if let Some(point) = update.location {
            delivery.last_location = Some(point);
        }
        if let Some(index) = update.route_index {
            delivery.current_route_index = index;
        }
        if let Some(phase) = update.simulation_status {
            delivery.simulation_status = phase;
        }

        let mut staged_draft = None;
        let mut release_courier = false;

        if let Some(next) = update.status {
            if next == DeliveryStatus::Denied {
                return Err(AppError::InvalidState(
                    "denial goes through the deny operation".to_string(),
                ));
            }
            if !delivery.status.can_transition_to(next) {
                return Err(AppError::InvalidState(format!(
                    "delivery {delivery_id} cannot move from {:?} to {next:?}",
                    delivery.status
                )));
            }

            delivery.status = next;
            match next {
                DeliveryStatus::Accepted => {
                    order.advance_status(OrderStatus::Assigned);
                }
                DeliveryStatus::Collected => {
                    order.advance_status(OrderStatus::PickedUp);
                    staged_draft = Some(EventDraft::new(EventKind::OrderPickedUp));
                }
                DeliveryStatus::InProgress => {
                    order.advance_status(OrderStatus::InTransit);
                }
                DeliveryStatus::Completed => {
                    let now = Utc::now();
                    order.advance_status(OrderStatus::Delivered);
                    order.actual_delivery_time = Some(now);
                    delivery.completed_at = Some(now);
                    release_courier = true;
                    staged_draft = Some(EventDraft::new(EventKind::OrderDelivered));
                }
                DeliveryStatus::Failed => {
                    if !order.status.is_terminal() {
                        order.status = OrderStatus::Cancelled;
                    }
                    release_courier = true;
                    staged_draft = Some(EventDraft::new(EventKind::OrderCancelled {
                        reason: "delivery failed".to_string(),
                    }));
                }
                DeliveryStatus::Assigned | DeliveryStatus::Denied => unreachable!(),
            }
        }

        let mut txn = self.store.begin();
        if update.status.is_some() {
            txn.put_order(order.clone());
        }
        if release_courier {
            if let Some(mut courier) = self.store.courier(delivery.courier_id) {
                if courier.current_status == CourierStatus::Busy {
                    courier.current_status = CourierStatus::Available;
                    txn.put_courier(courier);
                }
            }
        }
        txn.put_delivery(delivery.clone());

        let event = staged_draft.map(|draft| {
            let mut draft = draft
                .delivery(delivery.id)
                .order(order.id)
                .courier(delivery.courier_id);
            if let Some(point) = update.location {
                draft = draft.location(point);
            }
            txn.stage_event(draft)
        });
        txn.commit();

        drop(_delivery_lock);
        drop(_order_lock);

        if release_courier {
            self.cache.srem(
                &active_deliveries_key(delivery.courier_id),
                &delivery.id.to_string(),
            );
        }

        // Location persistence runs through the location store so the
        // cache, log, event and fan-out paths all see the report.
        if let Some(point) = update.location {
            self.locations
                .write(
                    delivery.courier_id,
                    LocationSample::at(point, Utc::now()),
                    Some(delivery.id),
                )
                .await;
        }

        if let Some(event) = &event {
            self.pipeline.dispatch(event).await;
        }

        // The generic order-update notification goes out for every
        // transition, whether or not a domain event was recorded.
        // Progress-only calls stay silent here; their location report
        // already fanned out above.
        if update.status.is_some() {
            self.fanout.broadcast(
                &order_group(order.id),
                PushKind::StatusUpdate,
                json!({
                    "order_id": order.id,
                    "order_status": order.status,
                    "delivery_id": delivery.id,
                    "delivery_status": delivery.status,
                    "simulation_status": delivery.simulation_status,
                    "route_index": delivery.current_route_index,
                }),
            );
        }

        if let Some(next) = update.status {
            info!(
                delivery_id = %delivery.id,
                order_id = %order.id,
                status = ?next,
                "delivery transitioned"
            );
        }

        Ok(delivery)
    }
}
