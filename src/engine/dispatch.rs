use std::collections::HashSet;
use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{active_deliveries_key, MemoryCache};
use crate::config::Config;
use crate::error::AppError;
use crate::events::EventPipeline;
use crate::geo::haversine_km;
use crate::location::LocationStore;
use crate::models::courier::{Courier, CourierStatus, GeoPoint};
use crate::models::delivery::{Delivery, DeliveryStatus, SimulationStatus};
use crate::models::event::{EventDraft, EventKind};
use crate::models::location::LocationSample;
use crate::models::order::{Order, OrderStatus};
use crate::observability::metrics::Metrics;
use crate::realtime::{order_group, rider_group, FanOut, PushKind};
use crate::store::Store;

/// Couriers with no resolvable position are seeded onto a ring around
/// the pickup point in this distance band.
const SYNTHETIC_RING_MIN_KM: f64 = 1.0;
const SYNTHETIC_RING_MAX_KM: f64 = 5.0;

/// How many times a lost courier race is re-resolved with the
/// next-nearest candidate before giving up.
const MAX_CLAIM_ATTEMPTS: usize = 3;

pub struct DispatchEngine {
    pub(crate) store: Arc<Store>,
    pub(crate) cache: Arc<MemoryCache>,
    pub(crate) locations: Arc<LocationStore>,
    pub(crate) pipeline: Arc<EventPipeline>,
    pub(crate) fanout: Arc<FanOut>,
    pub(crate) metrics: Metrics,
    pub(crate) config: Config,
    pub(crate) rng: Mutex<StdRng>,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<Store>,
        cache: Arc<MemoryCache>,
        locations: Arc<LocationStore>,
        pipeline: Arc<EventPipeline>,
        fanout: Arc<FanOut>,
        metrics: Metrics,
        config: Config,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            store,
            cache,
            locations,
            pipeline,
            fanout,
            metrics,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Nearest active + available courier to `pickup`, skipping
    /// `exclude`. Candidates are scanned in registration order, so a
    /// distance tie keeps the first one seen. A candidate with no
    /// resolvable location gets a synthetic one on the 1–5 km ring and
    /// enters the pool with it.
    pub fn find_nearest_available(
        &self,
        pickup: GeoPoint,
        exclude: &HashSet<Uuid>,
    ) -> Option<(Courier, f64)> {
        let mut best: Option<(Courier, f64)> = None;

        for courier in self.store.matchable_couriers() {
            if exclude.contains(&courier.id) {
                continue;
            }

            let point = match self.locations.read(courier.id) {
                Some(sample) => sample.point,
                None => self.seed_synthetic_location(courier.id, pickup),
            };

            let distance = haversine_km(&point, &pickup);
            if best.as_ref().is_none_or(|(_, d)| distance < *d) {
                best = Some((courier, distance));
            }
        }

        best
    }

    fn seed_synthetic_location(&self, courier_id: Uuid, pickup: GeoPoint) -> GeoPoint {
        let (radius_km, bearing) = {
            let mut rng = self.rng.lock().expect("rng mutex poisoned");
            (
                rng.gen_range(SYNTHETIC_RING_MIN_KM..SYNTHETIC_RING_MAX_KM),
                rng.gen_range(0.0..TAU),
            )
        };

        let point = offset_km(pickup, radius_km, bearing);
        self.locations
            .write_silent(courier_id, LocationSample::at(point, Utc::now()), None);
        point
    }

    /// Assign the nearest courier to an order. Exactly one delivery can
    /// exist per order: the whole read-modify-write runs under the
    /// order's row lock, and a concurrent caller either waits or gets
    /// the already-created delivery back unchanged.
    pub async fn assign(&self, order_id: Uuid) -> Result<Delivery, AppError> {
        let started = Instant::now();
        let result = self.assign_under_lock(order_id).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(AppError::NoAvailableCouriers) => "no_capacity",
            Err(AppError::Contention(_)) => "contention",
            Err(_) => "error",
        };
        self.metrics
            .assignment_latency_seconds
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());
        self.metrics
            .assignments_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    async fn assign_under_lock(&self, order_id: Uuid) -> Result<Delivery, AppError> {
        let _order_lock = self.store.lock_row(order_id).await?;

        let mut order = self
            .store
            .order(order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if let Some(existing) = self.store.active_delivery_for_order(order_id) {
            return Ok(existing);
        }

        if !order.status.is_assignable() {
            return Err(AppError::InvalidState(format!(
                "order {order_id} cannot be assigned from status {:?}",
                order.status
            )));
        }

        // Tentative selection, confirm under the courier entry, retry
        // with the next-nearest on a lost race.
        let mut exclude = HashSet::new();
        let mut claimed: Option<(Courier, f64)> = None;
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let Some((candidate, distance)) = self.find_nearest_available(order.pickup, &exclude)
            else {
                break;
            };

            match self.store.claim_courier(candidate.id) {
                Some(courier) => {
                    claimed = Some((courier, distance));
                    break;
                }
                None => {
                    exclude.insert(candidate.id);
                }
            }
        }

        let Some((courier, distance)) = claimed else {
            order.assignment_retry_count += 1;
            order.last_assignment_retry_at = Some(Utc::now());

            let mut txn = self.store.begin();
            txn.put_order(order);
            txn.commit();
            return Err(AppError::NoAvailableCouriers);
        };

        // Nothing below can fail, so the claimed courier cannot leak.
        let now = Utc::now();
        let delivery = Delivery {
            id: Uuid::new_v4(),
            order_id,
            courier_id: courier.id,
            status: DeliveryStatus::Assigned,
            distance_km: distance,
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
        let event = txn.stage_event(
            EventDraft::new(EventKind::RiderAssigned {
                courier_name: courier.name.clone(),
                distance_km: distance,
            })
            .order(order_id)
            .delivery(delivery.id)
            .courier(courier.id),
        );
        txn.commit();

        self.cache.sadd(
            &active_deliveries_key(courier.id),
            &delivery.id.to_string(),
            self.config.active_deliveries_ttl(),
        );

        self.pipeline.dispatch(&event).await;

        self.fanout.broadcast(
            &order_group(order_id),
            PushKind::RiderAssigned,
            json!({
                "delivery_id": delivery.id,
                "courier": {
                    "id": courier.id,
                    "name": courier.name,
                    "phone": courier.phone,
                    "vehicle_type": courier.vehicle_type,
                },
                "distance_km": distance,
            }),
        );
        self.fanout.broadcast(
            &rider_group(courier.id),
            PushKind::DeliveryAssigned,
            json!({
                "delivery_id": delivery.id,
                "order_id": order.id,
                "order_number": order.order_number,
                "pickup_address": order.pickup_address,
                "pickup": order.pickup,
                "dropoff_address": order.dropoff_address,
                "dropoff": order.dropoff,
            }),
        );

        info!(
            order_id = %order_id,
            courier_id = %courier.id,
            distance_km = distance,
            "order assigned"
        );
        Ok(delivery)
    }

    /// A courier turning down an assignment. The delivery terminalizes
    /// as denied, the order either goes back into the pool for an
    /// immediate reassignment or, at the denial ceiling, is cancelled
    /// outright. The denying courier keeps its busy status and is out of
    /// the matching pool either way.
    pub async fn deny_assignment(&self, delivery_id: Uuid) -> Result<Delivery, AppError> {
        let probe = self
            .store
            .delivery(delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;
        let order_id = probe.order_id;

        let denied;
        let denial_count;
        {
            let _order_lock = self.store.lock_row(order_id).await?;
            let _delivery_lock = self.store.lock_row(delivery_id).await?;

            let delivery = self
                .store
                .delivery(delivery_id)
                .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

            if delivery.status != DeliveryStatus::Assigned {
                return Err(AppError::InvalidState(format!(
                    "delivery {delivery_id} cannot be denied from status {:?}",
                    delivery.status
                )));
            }

            let mut order = self
                .store
                .order(order_id)
                .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
            order.denial_count += 1;
            denial_count = order.denial_count;

            if denial_count < self.config.max_denials && order.status == OrderStatus::Assigned {
                // Deliberate step back: the order re-enters the pool.
                order.status = OrderStatus::Ready;
            }

            let mut updated = delivery;
            updated.status = DeliveryStatus::Denied;

            let mut txn = self.store.begin();
            txn.put_order(order);
            txn.put_delivery(updated.clone());
            txn.commit();

            self.cache.srem(
                &active_deliveries_key(updated.courier_id),
                &delivery_id.to_string(),
            );
            denied = updated;
        }

        info!(
            delivery_id = %delivery_id,
            order_id = %order_id,
            denial_count,
            "assignment denied"
        );

        if denial_count >= self.config.max_denials {
            self.cancel_order(order_id, "denial limit reached").await?;
            return Ok(denied);
        }

        match self.assign(order_id).await {
            Ok(replacement) => {
                info!(
                    order_id = %order_id,
                    delivery_id = %replacement.id,
                    courier_id = %replacement.courier_id,
                    "order reassigned after denial"
                );
            }
            Err(AppError::NoAvailableCouriers) => {
                // The retry scheduler owns the order from here.
            }
            Err(err) => return Err(err),
        }

        Ok(denied)
    }

    /// Terminalize an order: cancelled order, failed deliveries,
    /// released couriers, one cancellation event, subscribers told.
    pub async fn cancel_order(&self, order_id: Uuid, reason: &str) -> Result<(), AppError> {
        let _order_lock = self.store.lock_row(order_id).await?;

        let mut order = self
            .store
            .order(order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        if order.status.is_terminal() {
            return Ok(());
        }

        let live: Vec<Delivery> = self
            .store
            .deliveries_for_order(order_id)
            .into_iter()
            .filter(|delivery| !delivery.status.is_terminal())
            .collect();

        order.status = OrderStatus::Cancelled;

        let mut txn = self.store.begin();
        txn.put_order(order);
        let mut released = Vec::new();
        for mut delivery in live {
            delivery.status = DeliveryStatus::Failed;
            if let Some(mut courier) = self.store.courier(delivery.courier_id) {
                if courier.current_status == CourierStatus::Busy {
                    courier.current_status = CourierStatus::Available;
                    txn.put_courier(courier);
                }
            }
            released.push((delivery.courier_id, delivery.id));
            txn.put_delivery(delivery);
        }
        let event = txn.stage_event(
            EventDraft::new(EventKind::OrderCancelled {
                reason: reason.to_string(),
            })
            .order(order_id),
        );
        txn.commit();

        for (courier_id, delivery_id) in &released {
            self.cache
                .srem(&active_deliveries_key(*courier_id), &delivery_id.to_string());
        }

        self.pipeline.dispatch(&event).await;

        let payload = json!({ "order_id": order_id, "reason": reason });
        self.fanout
            .broadcast(&order_group(order_id), PushKind::OrderCancelled, payload.clone());
        for (courier_id, _) in released {
            self.fanout
                .broadcast(&rider_group(courier_id), PushKind::OrderCancelled, payload.clone());
        }

        warn!(order_id = %order_id, reason, "order cancelled");
        Ok(())
    }

    /// Intake: the order starts preparing and its readiness timer is
    /// scheduled by the caller.
    pub async fn create_order(&self, mut order: Order) -> Result<Order, AppError> {
        order.status = OrderStatus::Preparing;

        let mut txn = self.store.begin();
        txn.put_order(order.clone());
        let event = txn.stage_event(EventDraft::new(EventKind::OrderReceived).order(order.id));
        txn.commit();

        self.pipeline.dispatch(&event).await;
        info!(order_id = %order.id, order_number = %order.order_number, "order received");
        Ok(order)
    }

    /// Preparation finished. Advances a still-preparing order to ready
    /// and tries an automatic assignment; no capacity is absorbed and
    /// left to the retry scheduler.
    pub async fn mark_order_ready(&self, order_id: Uuid) -> Result<(), AppError> {
        let event = {
            let _order_lock = self.store.lock_row(order_id).await?;
            let mut order = self
                .store
                .order(order_id)
                .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

            if order.status != OrderStatus::Preparing {
                return Ok(());
            }
            order.status = OrderStatus::Ready;

            let mut txn = self.store.begin();
            txn.put_order(order);
            let event = txn.stage_event(EventDraft::new(EventKind::OrderReady).order(order_id));
            txn.commit();
            event
        };

        self.pipeline.dispatch(&event).await;

        self.fanout.broadcast(
            &order_group(order_id),
            PushKind::StatusUpdate,
            json!({ "order_id": order_id, "status": OrderStatus::Ready }),
        );

        match self.assign(order_id).await {
            Ok(_) | Err(AppError::NoAvailableCouriers) => Ok(()),
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "auto-assignment after preparation failed");
                Ok(())
            }
        }
    }

    /// Jittered preparation delay drawn from the engine's seeded source.
    pub fn preparation_delay(&self) -> Duration {
        let (min, max) = (self.config.prep_min_secs, self.config.prep_max_secs);
        if max <= min {
            return Duration::from_secs(min);
        }
        let secs = self
            .rng
            .lock()
            .expect("rng mutex poisoned")
            .gen_range(min..=max);
        Duration::from_secs(secs)
    }
}

/// Planar offset by `radius_km` at `bearing` radians; close enough at
/// city scale for seeding synthetic courier positions.
fn offset_km(origin: GeoPoint, radius_km: f64, bearing: f64) -> GeoPoint {
    const KM_PER_DEG_LAT: f64 = 110.574;
    let km_per_deg_lng = 111.320 * origin.lat.to_radians().cos();

    GeoPoint {
        lat: origin.lat + (radius_km * bearing.cos()) / KM_PER_DEG_LAT,
        lng: origin.lng + (radius_km * bearing.sin()) / km_per_deg_lng,
    }
}
