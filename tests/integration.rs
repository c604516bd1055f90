use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use courier_dispatch::api::rest::router;
use courier_dispatch::config::Config;
use courier_dispatch::state::AppState;

fn test_config() -> Config {
    Config {
        http_port: 0,
        log_level: "info".to_string(),
        event_buffer_size: 64,
        location_ttl_secs: 300,
        active_deliveries_ttl_secs: 7200,
        idempotency_ttl_secs: 86_400,
        publish_timeout_ms: 1000,
        dlq_max_retries: 5,
        dlq_batch_size: 100,
        dlq_interval_secs: 60,
        assignment_max_retries: 10,
        order_max_age_hours: 24,
        retry_interval_secs: 300,
        backoff_cap_minutes: 60,
        max_denials: 5,
        lock_wait_ms: 500,
        // Long preparation keeps the readiness timer out of the tests.
        prep_min_secs: 3600,
        prep_max_secs: 3600,
        rng_seed: Some(42),
    }
}

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(test_config()));
    (router(state.clone()), state)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn create_courier(app: &axum::Router, name: &str, lat: f64, lng: f64) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/couriers",
            json!({
                "name": name,
                "phone": "9876500000",
                "vehicle_type": "bike",
                "location": { "lat": lat, "lng": lng }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn create_order(app: &axum::Router) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "customer_name": "Asha",
                "pickup_address": "12 Market Rd",
                "pickup": { "lat": 28.61, "lng": 77.21 },
                "dropoff_address": "4 Lake View",
                "dropoff": { "lat": 28.63, "lng": 77.23 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn assign(app: &axum::Router, order_id: &str) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            "/deliveries/assign",
            json!({ "order_id": order_id }),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["couriers"], 0);
    assert_eq!(body["orders"], 0);
    assert_eq!(body["deliveries"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("dead_letters_pending"));
}

#[tokio::test]
async fn created_order_starts_preparing() {
    let (app, state) = setup();
    let order = create_order(&app).await;

    assert_eq!(order["status"], "preparing");
    assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));

    // The intake event is durably recorded.
    let order_id = order["id"].as_str().unwrap().parse().unwrap();
    let events = state.store.events_for_order(order_id);
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn assignment_picks_the_nearer_courier_end_to_end() {
    let (app, state) = setup();
    let near = create_courier(&app, "R1", 28.62, 77.20).await;
    let _far = create_courier(&app, "R2", 28.70, 77.30).await;
    let order = create_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let response = assign(&app, order_id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let delivery = body_json(response).await;

    assert_eq!(delivery["courier_id"], near["id"]);
    assert_eq!(delivery["status"], "assigned");

    // Tracking view carries the delivery, the courier and a location.
    let response = app
        .clone()
        .oneshot(get_request(&format!("/orders/{order_id}")))
        .await
        .unwrap();
    let tracking = body_json(response).await;
    assert_eq!(tracking["order"]["status"], "assigned");
    assert_eq!(tracking["courier"]["id"], near["id"]);
    assert_eq!(tracking["current_location"]["point"]["lat"], 28.62);

    let courier_id = near["id"].as_str().unwrap().parse().unwrap();
    assert_eq!(
        state.store.courier(courier_id).unwrap().current_status,
        courier_dispatch::models::courier::CourierStatus::Busy
    );
}

#[tokio::test]
async fn delivery_lifecycle_runs_through_to_delivered() {
    let (app, state) = setup();
    let courier = create_courier(&app, "R1", 28.62, 77.20).await;
    let order = create_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let delivery = body_json(assign(&app, order_id).await).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/deliveries/{delivery_id}/status"),
            json!({ "status": "collected", "location": { "lat": 28.611, "lng": 77.211 } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/deliveries/{delivery_id}/status"),
            json!({ "status": "in_progress" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/deliveries/{delivery_id}/status"),
            json!({ "status": "completed", "location": { "lat": 28.63, "lng": 77.23 } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let completed = body_json(response).await;
    assert_eq!(completed["status"], "completed");

    let order_uuid = order_id.parse().unwrap();
    let stored_order = state.store.order(order_uuid).unwrap();
    assert_eq!(
        stored_order.status,
        courier_dispatch::models::order::OrderStatus::Delivered
    );
    assert!(stored_order.actual_delivery_time.is_some());

    let courier_id = courier["id"].as_str().unwrap().parse().unwrap();
    assert_eq!(
        state.store.courier(courier_id).unwrap().current_status,
        courier_dispatch::models::courier::CourierStatus::Available
    );
}

#[tokio::test]
async fn invalid_transition_is_a_conflict() {
    let (app, _state) = setup();
    create_courier(&app, "R1", 28.62, 77.20).await;
    let order = create_order(&app).await;
    let delivery = body_json(assign(&app, order["id"].as_str().unwrap()).await).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/deliveries/{delivery_id}/status"),
            json!({ "status": "completed" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn denial_reassigns_to_the_remaining_courier() {
    let (app, state) = setup();
    let first = create_courier(&app, "R1", 28.62, 77.20).await;
    let second = create_courier(&app, "R2", 28.64, 77.22).await;
    let order = create_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let delivery = body_json(assign(&app, order_id).await).await;
    assert_eq!(delivery["courier_id"], first["id"]);
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/deny"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let denied = body_json(response).await;
    assert_eq!(denied["status"], "denied");

    let order_uuid = order_id.parse().unwrap();
    let replacement = state.store.active_delivery_for_order(order_uuid).unwrap();
    assert_eq!(
        replacement.courier_id.to_string(),
        second["id"].as_str().unwrap()
    );
}

#[tokio::test]
async fn assigning_with_no_couriers_is_service_unavailable() {
    let (app, state) = setup();
    let order = create_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let response = assign(&app, order_id).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let order_uuid = order_id.parse().unwrap();
    assert_eq!(
        state.store.order(order_uuid).unwrap().assignment_retry_count,
        1
    );
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let (app, _state) = setup();
    let response = app
        .oneshot(get_request(
            "/orders/00000000-0000-0000-0000-000000000000",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn batch_assignment_returns_the_sequenced_run() {
    let (app, _state) = setup();
    create_courier(&app, "R1", 28.59, 77.19).await;
    let first = create_order(&app).await;
    let second = create_order(&app).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/deliveries/batch",
            json!({ "order_ids": [first["id"], second["id"]] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["deliveries"].as_array().unwrap().len(), 2);
    assert_eq!(body["batch"]["status"], "active");
    assert!(body["batch"]["total_distance_km"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn courier_location_report_lands_in_the_cache_and_log() {
    let (app, _state) = setup();
    let courier = create_courier(&app, "R1", 28.62, 77.20).await;
    let courier_id = courier["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/couriers/{courier_id}/location"),
            json!({ "location": { "lat": 28.65, "lng": 77.24 }, "speed": 18.5 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/couriers/{courier_id}/location")))
        .await
        .unwrap();
    let current = body_json(response).await;
    assert_eq!(current["point"]["lat"], 28.65);

    let response = app
        .clone()
        .oneshot(get_request(&format!(
            "/couriers/{courier_id}/location/history?limit=5"
        )))
        .await
        .unwrap();
    let history = body_json(response).await;
    assert_eq!(history.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn admin_sweeps_answer_with_summaries() {
    let (app, _state) = setup();

    let response = app
        .clone()
        .oneshot(json_request("POST", "/admin/retry-unassigned", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary = body_json(response).await;
    assert_eq!(summary["examined"], 0);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/admin/reprocess-dead-letters",
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary = body_json(response).await;
    assert_eq!(summary["processed"], 0);
}

#[tokio::test]
async fn broker_outage_parks_events_for_the_reprocessor() {
    let (app, state) = setup();
    create_courier(&app, "R1", 28.62, 77.20).await;
    state.broker.set_available(false);

    let order = create_order(&app).await;
    let order_id = order["id"].as_str().unwrap();
    let response = assign(&app, order_id).await;
    // The caller never sees the publish failure.
    assert_eq!(response.status(), StatusCode::OK);

    assert!(state.store.pending_dead_letter_count() >= 1);

    // Events are durably recorded regardless.
    let order_uuid = order_id.parse().unwrap();
    assert!(!state.store.events_for_order(order_uuid).is_empty());
}
