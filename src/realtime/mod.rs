pub mod consumer;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

pub fn order_group(order_id: Uuid) -> String {
    format!("order_{order_id}")
}

pub fn rider_group(courier_id: Uuid) -> String {
    format!("rider_{courier_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushKind {
    RiderAssigned,
    DeliveryAssigned,
    LocationUpdate,
    StatusUpdate,
    OrderCancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub kind: PushKind,
    pub data: Value,
}

/// Group-addressed push fan-out. Delivery is best-effort and at-most-once
/// per currently connected subscriber; there is no replay, so a
/// subscriber only sees messages sent after it joined.
pub struct FanOut {
    groups: DashMap<String, broadcast::Sender<PushMessage>>,
    buffer: usize,
}

impl FanOut {
    pub fn new(buffer: usize) -> Self {
        Self {
            groups: DashMap::new(),
            buffer,
        }
    }

    pub fn subscribe(&self, group: &str) -> broadcast::Receiver<PushMessage> {
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .subscribe()
    }

    /// Send to every current subscriber of `group`. An absent or empty
    /// group is a no-op; returns the number of subscribers reached.
    pub fn broadcast(&self, group: &str, kind: PushKind, data: Value) -> usize {
        match self.groups.get(group) {
            Some(tx) => tx.send(PushMessage { kind, data }).unwrap_or(0),
            None => 0,
        }
    }
}
