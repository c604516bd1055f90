use std::collections::HashSet;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::active_deliveries_key;
use crate::engine::dispatch::DispatchEngine;
use crate::error::AppError;
use crate::geo::{haversine_km, route_length_km};
use crate::models::batch::{BatchDelivery, BatchStatus};
use crate::models::courier::{Courier, CourierStatus};
use crate::models::delivery::{Delivery, DeliveryStatus, SimulationStatus};
use crate::models::event::{EventDraft, EventKind};
use crate::models::order::{Order, OrderStatus};
use crate::realtime::{order_group, rider_group, PushKind};

#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub courier: Courier,
    pub sequence: Vec<Order>,
    pub total_distance_km: f64,
}

/// Greedy nearest-neighbor tour: keep the first order, then repeatedly
/// take the unvisited order whose pickup is nearest to the previous
/// drop-off. Ties keep input order. A heuristic, not an optimal tour.
pub fn optimize_sequence(orders: Vec<Order>) -> Vec<Order> {
    if orders.len() < 2 {
        return orders;
    }

    let mut remaining = orders;
    let mut sequence = vec![remaining.remove(0)];

    while !remaining.is_empty() {
        let current = sequence.last().expect("sequence starts non-empty").dropoff;

        let mut best_index = 0;
        let mut best_distance = f64::INFINITY;
        for (index, order) in remaining.iter().enumerate() {
            let distance = haversine_km(&current, &order.pickup);
            if distance < best_distance {
                best_distance = distance;
                best_index = index;
            }
        }

        sequence.push(remaining.remove(best_index));
    }

    sequence
}

impl DispatchEngine {
    /// Pick the courier nearest to the first order's pickup, sequence
    /// the batch, and price the whole run:
    /// [courier, pickup 1, drop 1, pickup 2, drop 2, ...].
    pub fn find_best_for_batch(&self, order_ids: &[Uuid]) -> Result<BatchPlan, AppError> {
        if order_ids.is_empty() {
            return Err(AppError::BadRequest("batch contains no orders".to_string()));
        }

        let mut orders = Vec::with_capacity(order_ids.len());
        for id in order_ids {
            orders.push(
                self.store
                    .order(*id)
                    .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?,
            );
        }

        let first_pickup = orders[0].pickup;
        let (courier, _) = self
            .find_nearest_available(first_pickup, &HashSet::new())
            .ok_or(AppError::NoAvailableCouriers)?;

        let sequence = optimize_sequence(orders);

        let start = self
            .locations
            .read(courier.id)
            .map(|sample| sample.point)
            .unwrap_or(first_pickup);

        let mut points = Vec::with_capacity(sequence.len() * 2 + 1);
        points.push(start);
        for order in &sequence {
            points.push(order.pickup);
            points.push(order.dropoff);
        }

        Ok(BatchPlan {
            courier,
            sequence,
            total_distance_km: route_length_km(&points),
        })
    }

    /// Put a whole batch on one courier: one delivery per order in
    /// visiting sequence, one batch record. Orders that stopped being
    /// assignable since planning are skipped, not fatal.
    pub async fn assign_batch(
        &self,
        order_ids: &[Uuid],
    ) -> Result<(BatchDelivery, Vec<Delivery>), AppError> {
        let plan = self.find_best_for_batch(order_ids)?;

        let courier = self
            .store
            .claim_courier(plan.courier.id)
            .ok_or(AppError::NoAvailableCouriers)?;

        let mut current_point = self
            .locations
            .read(courier.id)
            .map(|sample| sample.point)
            .unwrap_or(plan.sequence[0].pickup);

        let mut deliveries = Vec::new();
        let mut events = Vec::new();
        let mut assigned_orders = Vec::new();

        for planned in &plan.sequence {
            let order_id = planned.id;
            let _order_lock = match self.store.lock_row(order_id).await {
                Ok(guard) => guard,
                Err(err) => {
                    warn!(order_id = %order_id, error = %err, "order contended, dropped from batch");
                    continue;
                }
            };

            let Some(mut order) = self.store.order(order_id) else {
                warn!(order_id = %order_id, "order vanished during batch assignment");
                continue;
            };
            if !order.status.is_assignable()
                || self.store.active_delivery_for_order(order_id).is_some()
            {
                warn!(
                    order_id = %order_id,
                    status = ?order.status,
                    "order no longer assignable, dropped from batch"
                );
                continue;
            }

            let leg_distance = haversine_km(&current_point, &order.pickup);
            let now = Utc::now();
            let delivery = Delivery {
                id: Uuid::new_v4(),
                order_id,
                courier_id: courier.id,
                status: DeliveryStatus::Assigned,
                distance_km: leg_distance,
                last_location: None,
                current_route_index: 0,
                simulation_status: SimulationStatus::Idle,
                assigned_at: now,
                completed_at: None,
                created_at: now,
                updated_at: now,
            };

            order.advance_status(OrderStatus::Assigned);
            order.assignment_retry_count = 0;
            order.last_assignment_retry_at = None;

            let mut txn = self.store.begin();
            txn.put_order(order.clone());
            txn.put_delivery(delivery.clone());
            events.push(txn.stage_event(
                EventDraft::new(EventKind::RiderAssigned {
                    courier_name: courier.name.clone(),
                    distance_km: leg_distance,
                })
                .order(order_id)
                .delivery(delivery.id)
                .courier(courier.id),
            ));
            txn.commit();

            self.cache.sadd(
                &active_deliveries_key(courier.id),
                &delivery.id.to_string(),
                self.config.active_deliveries_ttl(),
            );

            current_point = order.dropoff;
            assigned_orders.push(order);
            deliveries.push(delivery);
        }

        if deliveries.is_empty() {
            // Hand the courier back; the batch produced nothing.
            if let Some(mut held) = self.store.courier(courier.id) {
                if held.current_status == CourierStatus::Busy {
                    held.current_status = CourierStatus::Available;
                    let mut txn = self.store.begin();
                    txn.put_courier(held);
                    txn.commit();
                }
            }
            return Err(AppError::InvalidState(
                "no order in the batch was assignable".to_string(),
            ));
        }

        let batch = BatchDelivery {
            id: Uuid::new_v4(),
            courier_id: courier.id,
            order_sequence: assigned_orders.iter().map(|order| order.id).collect(),
            total_distance_km: plan.total_distance_km,
            status: BatchStatus::Active,
            completed_at: None,
            created_at: Utc::now(),
        };
        let mut txn = self.store.begin();
        txn.put_batch(batch.clone());
        txn.commit();

        for event in &events {
            self.pipeline.dispatch(event).await;
        }

        for (order, delivery) in assigned_orders.iter().zip(&deliveries) {
            self.fanout.broadcast(
                &order_group(order.id),
                PushKind::RiderAssigned,
                json!({
                    "delivery_id": delivery.id,
                    "batch_id": batch.id,
                    "courier": { "id": courier.id, "name": courier.name },
                }),
            );
        }
        self.fanout.broadcast(
            &rider_group(courier.id),
            PushKind::DeliveryAssigned,
            json!({
                "batch_id": batch.id,
                "total_distance_km": batch.total_distance_km,
                "stops": assigned_orders
                    .iter()
                    .map(|order| json!({
                        "order_id": order.id,
                        "order_number": order.order_number,
                        "pickup_address": order.pickup_address,
                        "pickup": order.pickup,
                        "dropoff_address": order.dropoff_address,
                        "dropoff": order.dropoff,
                    }))
                    .collect::<Vec<_>>(),
            }),
        );

        info!(
            batch_id = %batch.id,
            courier_id = %courier.id,
            orders = deliveries.len(),
            total_distance_km = batch.total_distance_km,
            "batch assigned"
        );
        Ok((batch, deliveries))
    }
}
