use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::batch::BatchDelivery;
use crate::models::courier::{Courier, CourierStatus, GeoPoint};
use crate::models::dead_letter::{DeadLetterEntry, DeadLetterStatus};
use crate::models::delivery::Delivery;
use crate::models::event::{DomainEvent, EventDraft};
use crate::models::location::CourierLocation;
use crate::models::order::{Order, OrderStatus};

/// In-memory binding of the relational-store contract: row-level
/// exclusive locks with bounded waits, and multi-row writes staged in a
/// [`Txn`] that commits atomically or not at all.
pub struct Store {
    orders: DashMap<Uuid, Order>,
    couriers: DashMap<Uuid, Courier>,
    deliveries: DashMap<Uuid, Delivery>,
    batches: DashMap<Uuid, BatchDelivery>,
    locations: DashMap<Uuid, Vec<CourierLocation>>,
    events: DashMap<Uuid, DomainEvent>,
    dead_letters: DashMap<Uuid, DeadLetterEntry>,
    row_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    lock_wait: Duration,
}

impl Store {
    pub fn new(lock_wait: Duration) -> Self {
        Self {
            orders: DashMap::new(),
            couriers: DashMap::new(),
            deliveries: DashMap::new(),
            batches: DashMap::new(),
            locations: DashMap::new(),
            events: DashMap::new(),
            dead_letters: DashMap::new(),
            row_locks: DashMap::new(),
            lock_wait,
        }
    }

    /// Exclusive row lock with a bounded wait. Callers locking both an
    /// order and one of its deliveries must take the order lock first.
    pub async fn lock_row(&self, id: Uuid) -> Result<OwnedMutexGuard<()>, AppError> {
        let mutex = self.row_locks.entry(id).or_default().clone();

        timeout(self.lock_wait, mutex.lock_owned())
            .await
            .map_err(|_| AppError::Contention(format!("lock wait exceeded for row {id}")))
    }

    pub fn begin(&self) -> Txn<'_> {
        Txn {
            store: self,
            orders: Vec::new(),
            couriers: Vec::new(),
            deliveries: Vec::new(),
            batches: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn order(&self, id: Uuid) -> Option<Order> {
        self.orders.get(&id).map(|entry| entry.clone())
    }

    pub fn courier(&self, id: Uuid) -> Option<Courier> {
        self.couriers.get(&id).map(|entry| entry.clone())
    }

    pub fn delivery(&self, id: Uuid) -> Option<Delivery> {
        self.deliveries.get(&id).map(|entry| entry.clone())
    }

    pub fn batch(&self, id: Uuid) -> Option<BatchDelivery> {
        self.batches.get(&id).map(|entry| entry.clone())
    }

    pub fn orders_snapshot(&self) -> Vec<Order> {
        self.orders.iter().map(|entry| entry.clone()).collect()
    }

    pub fn deliveries_snapshot(&self) -> Vec<Delivery> {
        self.deliveries.iter().map(|entry| entry.clone()).collect()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn courier_count(&self) -> usize {
        self.couriers.len()
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.len()
    }

    /// Active and available couriers in registration order, so distance
    /// ties resolve to the first-registered candidate.
    pub fn matchable_couriers(&self) -> Vec<Courier> {
        let mut couriers: Vec<Courier> = self
            .couriers
            .iter()
            .filter(|entry| entry.is_matchable())
            .map(|entry| entry.clone())
            .collect();
        couriers.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        couriers
    }

    pub fn couriers_snapshot(&self) -> Vec<Courier> {
        let mut couriers: Vec<Courier> =
            self.couriers.iter().map(|entry| entry.clone()).collect();
        couriers.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        couriers
    }

    /// Atomically flip an available courier to busy. Returns the claimed
    /// courier, or `None` when somebody else got there first.
    pub fn claim_courier(&self, id: Uuid) -> Option<Courier> {
        let mut entry = self.couriers.get_mut(&id)?;
        if !entry.is_matchable() {
            return None;
        }
        entry.current_status = CourierStatus::Busy;
        entry.updated_at = Utc::now();
        Some(entry.clone())
    }

    pub fn active_delivery_for_order(&self, order_id: Uuid) -> Option<Delivery> {
        self.deliveries
            .iter()
            .filter(|entry| entry.order_id == order_id && !entry.status.is_terminal())
            .map(|entry| entry.clone())
            .min_by_key(|delivery| delivery.created_at)
    }

    pub fn deliveries_for_order(&self, order_id: Uuid) -> Vec<Delivery> {
        let mut deliveries: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| entry.order_id == order_id)
            .map(|entry| entry.clone())
            .collect();
        deliveries.sort_by_key(|delivery| delivery.created_at);
        deliveries
    }

    /// Newest non-null last-known location across the courier's
    /// non-terminal deliveries; restart-recovery fallback for the cache.
    pub fn latest_delivery_location(&self, courier_id: Uuid) -> Option<(GeoPoint, DateTime<Utc>)> {
        self.deliveries
            .iter()
            .filter(|entry| entry.courier_id == courier_id && !entry.status.is_terminal())
            .filter_map(|entry| entry.last_location.map(|point| (point, entry.updated_at)))
            .max_by_key(|(_, updated_at)| *updated_at)
    }

    /// Durable append-only location log write.
    pub fn append_location(&self, row: CourierLocation) {
        self.locations.entry(row.courier_id).or_default().push(row);
    }

    pub fn latest_location(&self, courier_id: Uuid) -> Option<CourierLocation> {
        self.locations
            .get(&courier_id)
            .and_then(|log| log.last().cloned())
    }

    pub fn location_history(&self, courier_id: Uuid, limit: usize) -> Vec<CourierLocation> {
        self.locations
            .get(&courier_id)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn events_for_order(&self, order_id: Uuid) -> Vec<DomainEvent> {
        self.events_where(|event| event.order_id == Some(order_id))
    }

    pub fn events_for_delivery(&self, delivery_id: Uuid) -> Vec<DomainEvent> {
        self.events_where(|event| event.delivery_id == Some(delivery_id))
    }

    pub fn event(&self, id: Uuid) -> Option<DomainEvent> {
        self.events.get(&id).map(|entry| entry.clone())
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn events_where<F: Fn(&DomainEvent) -> bool>(&self, pred: F) -> Vec<DomainEvent> {
        let mut events: Vec<DomainEvent> = self
            .events
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| entry.clone())
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events
    }

    /// Orders sitting in `ready` with no live delivery, oldest first;
    /// the retry scheduler's scan set.
    pub fn ready_orders_without_delivery(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| entry.status == OrderStatus::Ready)
            .map(|entry| entry.clone())
            .filter(|order| self.active_delivery_for_order(order.id).is_none())
            .collect();
        orders.sort_by_key(|order| order.created_at);
        orders
    }

    pub fn insert_dead_letter(&self, entry: DeadLetterEntry) {
        self.dead_letters.insert(entry.id, entry);
    }

    pub fn update_dead_letter(&self, entry: DeadLetterEntry) {
        self.dead_letters.insert(entry.id, entry);
    }

    pub fn dead_letter(&self, id: Uuid) -> Option<DeadLetterEntry> {
        self.dead_letters.get(&id).map(|entry| entry.clone())
    }

    pub fn dead_letters_snapshot(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.iter().map(|entry| entry.clone()).collect()
    }

    pub fn pending_dead_letter_count(&self) -> usize {
        self.dead_letters
            .iter()
            .filter(|entry| entry.status == DeadLetterStatus::Pending)
            .count()
    }

    /// Pending entries whose retry time has elapsed, earliest first.
    pub fn due_dead_letters(&self, now: DateTime<Utc>, limit: usize) -> Vec<DeadLetterEntry> {
        let mut due: Vec<DeadLetterEntry> = self
            .dead_letters
            .iter()
            .filter(|entry| {
                entry.status == DeadLetterStatus::Pending && entry.next_retry_at <= now
            })
            .map(|entry| entry.clone())
            .collect();
        due.sort_by_key(|entry| entry.next_retry_at);
        due.truncate(limit);
        due
    }
}

/// Staged multi-row write. Rows and event records accumulate here and
/// only reach the store on [`Txn::commit`]; dropping the transaction
/// uncommitted leaves the store untouched, including the event rows.
pub struct Txn<'a> {
    store: &'a Store,
    orders: Vec<Order>,
    couriers: Vec<Courier>,
    deliveries: Vec<Delivery>,
    batches: Vec<BatchDelivery>,
    events: Vec<DomainEvent>,
}

impl Txn<'_> {
    pub fn put_order(&mut self, order: Order) {
        self.orders.push(order);
    }

    pub fn put_courier(&mut self, courier: Courier) {
        self.couriers.push(courier);
    }

    pub fn put_delivery(&mut self, delivery: Delivery) {
        self.deliveries.push(delivery);
    }

    pub fn put_batch(&mut self, batch: BatchDelivery) {
        self.batches.push(batch);
    }

    /// Materialize a draft into an event row that commits (or rolls
    /// back) together with the staged state mutations.
    pub fn stage_event(&mut self, draft: EventDraft) -> DomainEvent {
        let event = DomainEvent {
            id: Uuid::new_v4(),
            delivery_id: draft.delivery_id,
            order_id: draft.order_id,
            courier_id: draft.courier_id,
            kind: draft.kind,
            location: draft.location,
            timestamp: Utc::now(),
        };
        self.events.push(event.clone());
        event
    }

    /// Apply every staged write. Returns the committed event rows so the
    /// caller can publish them after the data is durable.
    pub fn commit(self) -> Vec<DomainEvent> {
        let now = Utc::now();

        for mut order in self.orders {
            order.updated_at = now;
            self.store.orders.insert(order.id, order);
        }
        for mut courier in self.couriers {
            courier.updated_at = now;
            self.store.couriers.insert(courier.id, courier);
        }
        for mut delivery in self.deliveries {
            delivery.updated_at = now;
            self.store.deliveries.insert(delivery.id, delivery);
        }
        for batch in self.batches {
            self.store.batches.insert(batch.id, batch);
        }

        for event in &self.events {
            self.store.events.insert(event.id, event.clone());
        }
        self.events
    }
}
