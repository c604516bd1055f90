pub mod batch;
pub mod dispatch;
pub mod lifecycle;
pub mod retry;
pub mod timers;


#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};

    use super::testutil::{courier_named, harness, insert_courier_at, insert_order, order_at};
    use crate::error::AppError;
    use crate::geo::haversine_km;
    use crate::models::courier::{CourierStatus, GeoPoint};
    use crate::models::delivery::DeliveryStatus;
    use crate::models::event::EventKind;
    use crate::models::order::OrderStatus;

    fn p(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint { lat, lng }
    }

    #[tokio::test]
    async fn nearest_available_courier_wins_the_assignment() {
        let h = harness();
        let order = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
        insert_order(&h, &order);

        let near = courier_named("R1");
        let far = courier_named("R2");
        insert_courier_at(&h, &near, Some(p(28.62, 77.20)));
        insert_courier_at(&h, &far, Some(p(28.70, 77.30)));

        let delivery = h.dispatch.assign(order.id).await.unwrap();

        assert_eq!(delivery.courier_id, near.id);
        assert_eq!(delivery.status, DeliveryStatus::Assigned);
        let expected = haversine_km(&p(28.62, 77.20), &order.pickup);
        assert!((delivery.distance_km - expected).abs() < 1e-9);

        let chosen = h.store.courier(near.id).unwrap();
        assert_eq!(chosen.current_status, CourierStatus::Busy);
        let passed_over = h.store.courier(far.id).unwrap();
        assert_eq!(passed_over.current_status, CourierStatus::Available);

        // No still-available courier was strictly closer at call time.
        let winning_distance = delivery.distance_km;
        for other in h.store.matchable_couriers() {
            let location = h.locations.read(other.id).unwrap();
            assert!(haversine_km(&location.point, &order.pickup) >= winning_distance);
        }

        let updated = h.store.order(order.id).unwrap();
        assert_eq!(updated.status, OrderStatus::Assigned);
        assert_eq!(updated.assignment_retry_count, 0);

        let events = h.store.events_for_order(order.id);
        let assignments: Vec<_> = events
            .iter()
            .filter(|event| matches!(event.kind, EventKind::RiderAssigned { .. }))
            .collect();
        assert_eq!(assignments.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_assigns_yield_exactly_one_delivery() {
        let h = std::sync::Arc::new(harness());
        let order = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
        insert_order(&h, &order);
        for (name, point) in [("R1", p(28.62, 77.20)), ("R2", p(28.64, 77.22))] {
            insert_courier_at(&h, &courier_named(name), Some(point));
        }

        let first = {
            let h = h.clone();
            tokio::spawn(async move { h.dispatch.assign(order.id).await })
        };
        let second = {
            let h = h.clone();
            tokio::spawn(async move { h.dispatch.assign(order.id).await })
        };

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();

        // The loser observes the winner's delivery unchanged.
        assert_eq!(a.id, b.id);
        assert_eq!(h.store.deliveries_for_order(order.id).len(), 1);
    }

    #[tokio::test]
    async fn reassigning_an_assigned_order_is_idempotent() {
        let h = harness();
        let order = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
        insert_order(&h, &order);
        insert_courier_at(&h, &courier_named("R1"), Some(p(28.62, 77.20)));
        insert_courier_at(&h, &courier_named("R2"), Some(p(28.64, 77.22)));

        let first = h.dispatch.assign(order.id).await.unwrap();
        let second = h.dispatch.assign(order.id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(h.store.deliveries_for_order(order.id).len(), 1);
    }

    #[tokio::test]
    async fn no_capacity_bumps_the_retry_bookkeeping() {
        let h = harness();
        let order = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
        insert_order(&h, &order);

        let err = h.dispatch.assign(order.id).await.unwrap_err();
        assert!(matches!(err, AppError::NoAvailableCouriers));

        let updated = h.store.order(order.id).unwrap();
        assert_eq!(updated.assignment_retry_count, 1);
        assert!(updated.last_assignment_retry_at.is_some());
        assert!(h.store.deliveries_for_order(order.id).is_empty());
    }

    #[tokio::test]
    async fn courier_without_location_is_seeded_on_the_ring() {
        let h = harness();
        let order = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
        insert_order(&h, &order);
        let unseen = courier_named("R1");
        insert_courier_at(&h, &unseen, None);

        let delivery = h.dispatch.assign(order.id).await.unwrap();
        assert_eq!(delivery.courier_id, unseen.id);

        let seeded = h.locations.read(unseen.id).unwrap();
        let distance = haversine_km(&seeded.point, &order.pickup);
        assert!(
            (0.9..=5.2).contains(&distance),
            "synthetic location {distance} km outside the 1-5 km ring"
        );
        // The ring draw is persisted, and the delivery priced with it.
        assert!((delivery.distance_km - distance).abs() < 1e-9);
    }

    #[tokio::test]
    async fn seeded_rng_makes_synthetic_locations_reproducible() {
        let run = || async {
            let h = harness();
            let order = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
            insert_order(&h, &order);
            let unseen = courier_named("R1");
            insert_courier_at(&h, &unseen, None);
            h.dispatch.assign(order.id).await.unwrap();
            h.locations.read(unseen.id).unwrap().point
        };

        let first = run().await;
        let second = run().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn four_denials_keep_the_order_alive_the_fifth_cancels_it() {
        let h = harness();
        let order = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
        insert_order(&h, &order);
        for i in 0..5 {
            let courier = courier_named(&format!("R{i}"));
            insert_courier_at(&h, &courier, Some(p(28.62 + f64::from(i) * 0.01, 77.20)));
        }

        let mut delivery = h.dispatch.assign(order.id).await.unwrap();
        for denial in 1..=4u32 {
            h.dispatch.deny_assignment(delivery.id).await.unwrap();

            let updated = h.store.order(order.id).unwrap();
            assert_eq!(updated.denial_count, denial);
            assert!(!updated.status.is_terminal(), "cancelled after {denial} denials");

            delivery = h
                .store
                .active_delivery_for_order(order.id)
                .expect("reassignment after denial");
        }

        h.dispatch.deny_assignment(delivery.id).await.unwrap();

        let cancelled = h.store.order(order.id).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.denial_count, 5);
        assert!(h
            .store
            .deliveries_for_order(order.id)
            .iter()
            .all(|delivery| delivery.status.is_terminal()));
    }

    #[tokio::test]
    async fn denying_a_non_assigned_delivery_is_invalid() {
        let h = harness();
        let order = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
        insert_order(&h, &order);
        insert_courier_at(&h, &courier_named("R1"), Some(p(28.62, 77.20)));

        let delivery = h.dispatch.assign(order.id).await.unwrap();
        h.lifecycle.accept(delivery.id).await.unwrap();

        let err = h.dispatch.deny_assignment(delivery.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn retry_pass_honors_backoff_age_and_eligibility() {
        let h = harness();
        let now = Utc::now();

        // Backoff window (2^1 = 2 min) not yet elapsed: left alone.
        let mut backing_off = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
        backing_off.assignment_retry_count = 1;
        backing_off.last_assignment_retry_at = Some(now - ChronoDuration::seconds(30));
        insert_order(&h, &backing_off);

        // Too old: cancelled no matter how many retries are left.
        let mut stale = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
        stale.created_at = now - ChronoDuration::hours(25);
        stale.assignment_retry_count = 2;
        insert_order(&h, &stale);

        // Window elapsed and a courier is free: assigned.
        let mut eligible = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
        eligible.assignment_retry_count = 1;
        eligible.last_assignment_retry_at = Some(now - ChronoDuration::minutes(10));
        insert_order(&h, &eligible);

        insert_courier_at(&h, &courier_named("R1"), Some(p(28.62, 77.20)));

        let summary = h.dispatch.retry_unassigned(10, 24).await;

        assert_eq!(summary.examined, 3);
        assert_eq!(summary.assigned, 1);
        assert_eq!(summary.cancelled, 1);

        let untouched = h.store.order(backing_off.id).unwrap();
        assert_eq!(untouched.status, OrderStatus::Ready);
        assert_eq!(untouched.assignment_retry_count, 1);

        assert_eq!(h.store.order(stale.id).unwrap().status, OrderStatus::Cancelled);
        assert_eq!(h.store.order(eligible.id).unwrap().status, OrderStatus::Assigned);
    }

    #[tokio::test]
    async fn retry_pass_skips_orders_out_of_retries() {
        let h = harness();
        let mut exhausted = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
        exhausted.assignment_retry_count = 10;
        exhausted.last_assignment_retry_at = Some(Utc::now() - ChronoDuration::hours(2));
        insert_order(&h, &exhausted);
        insert_courier_at(&h, &courier_named("R1"), Some(p(28.62, 77.20)));

        let summary = h.dispatch.retry_unassigned(10, 24).await;

        assert_eq!(summary.assigned, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(h.store.order(exhausted.id).unwrap().status, OrderStatus::Ready);
    }

    #[tokio::test]
    async fn assigning_a_delivered_order_is_invalid() {
        let h = harness();
        let mut order = order_at(p(28.61, 77.21), p(28.63, 77.23), OrderStatus::Ready);
        order.status = OrderStatus::Delivered;
        insert_order(&h, &order);
        insert_courier_at(&h, &courier_named("R1"), Some(p(28.62, 77.20)));

        let err = h.dispatch.assign(order.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }
}
