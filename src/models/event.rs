use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;
use crate::models::location::LocationSample;

pub mod channels {
    pub const RIDER_ASSIGNED: &str = "delivery.rider.assigned";
    pub const RIDER_LOCATION: &str = "delivery.rider.location";
    pub const STATUS_CHANGED: &str = "delivery.status.changed";
    pub const COMPLETED: &str = "delivery.completed";
    pub const DEAD_LETTER: &str = "delivery.dlq";
}

/// Known domain event kinds with their structured payloads. The generic
/// key-value envelope only exists at the broker boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    OrderReceived,
    OrderPreparing,
    OrderReady,
    RiderAssigned {
        courier_name: String,
        distance_km: f64,
    },
    OrderPickedUp,
    OrderDelivered,
    OrderCancelled {
        reason: String,
    },
    LocationUpdate {
        sample: LocationSample,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::OrderReceived => "order_received",
            EventKind::OrderPreparing => "order_preparing",
            EventKind::OrderReady => "order_ready",
            EventKind::RiderAssigned { .. } => "rider_assigned",
            EventKind::OrderPickedUp => "order_picked_up",
            EventKind::OrderDelivered => "order_delivered",
            EventKind::OrderCancelled { .. } => "order_cancelled",
            EventKind::LocationUpdate { .. } => "location_update",
        }
    }

    /// Broker channel this kind is published on, keyed by event category.
    pub fn channel(&self) -> &'static str {
        match self {
            EventKind::RiderAssigned { .. } => channels::RIDER_ASSIGNED,
            EventKind::LocationUpdate { .. } => channels::RIDER_LOCATION,
            EventKind::OrderDelivered => channels::COMPLETED,
            _ => channels::STATUS_CHANGED,
        }
    }
}

/// Append-only domain event row. At least one of the three ids is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub delivery_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub courier_id: Option<Uuid>,
    pub kind: EventKind,
    pub location: Option<GeoPoint>,
    pub timestamp: DateTime<Utc>,
}

/// Event under construction, before it is given an id and a timestamp
/// inside the owning transaction.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub delivery_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub courier_id: Option<Uuid>,
    pub kind: EventKind,
    pub location: Option<GeoPoint>,
}

impl EventDraft {
    pub fn new(kind: EventKind) -> Self {
        Self {
            delivery_id: None,
            order_id: None,
            courier_id: None,
            kind,
            location: None,
        }
    }

    pub fn delivery(mut self, id: Uuid) -> Self {
        self.delivery_id = Some(id);
        self
    }

    pub fn order(mut self, id: Uuid) -> Self {
        self.order_id = Some(id);
        self
    }

    pub fn courier(mut self, id: Uuid) -> Self {
        self.courier_id = Some(id);
        self
    }

    pub fn location(mut self, point: GeoPoint) -> Self {
        self.location = Some(point);
        self
    }
}
