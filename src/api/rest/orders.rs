use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::timers::schedule_preparation;
use crate::error::AppError;
use crate::models::courier::{Courier, GeoPoint};
use crate::models::delivery::Delivery;
use crate::models::location::LocationSample;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(track_order))
        .route("/orders/:id/cancel", post(cancel_order))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_name: String,
    pub pickup_address: String,
    pub pickup: GeoPoint,
    pub dropoff_address: String,
    pub dropoff: GeoPoint,
}

/// Tracking view: the order plus whatever live delivery context exists.
#[derive(Serialize)]
pub struct TrackingResponse {
    pub order: Order,
    pub delivery: Option<Delivery>,
    pub courier: Option<Courier>,
    pub current_location: Option<LocationSample>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.customer_name.trim().is_empty() {
        return Err(AppError::BadRequest(
            "customer name cannot be empty".to_string(),
        ));
    }

    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4(),
        order_number: format!("ORD-{}", &Uuid::new_v4().simple().to_string()[..8].to_uppercase()),
        customer_name: payload.customer_name,
        pickup_address: payload.pickup_address,
        pickup: payload.pickup,
        dropoff_address: payload.dropoff_address,
        dropoff: payload.dropoff,
        status: OrderStatus::Pending,
        assignment_retry_count: 0,
        last_assignment_retry_at: None,
        denial_count: 0,
        estimated_delivery_time: None,
        actual_delivery_time: None,
        created_at: now,
        updated_at: now,
    };

    let order = state.dispatch.create_order(order).await?;
    schedule_preparation(&state.timers, state.dispatch.clone(), order.id);

    Ok(Json(order))
}

async fn list_orders(State(state): State<Arc<AppState>>) -> Json<Vec<Order>> {
    let mut orders = state.store.orders_snapshot();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(orders)
}

async fn track_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingResponse>, AppError> {
    let order = state
        .store
        .order(id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    let delivery = state.store.active_delivery_for_order(id);
    let courier = delivery
        .as_ref()
        .and_then(|delivery| state.store.courier(delivery.courier_id));
    let current_location = delivery
        .as_ref()
        .and_then(|delivery| state.locations.read(delivery.courier_id));

    Ok(Json(TrackingResponse {
        order,
        delivery,
        courier,
        current_location,
    }))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    state.dispatch.cancel_order(id, "cancelled by caller").await?;
    state.timers.cancel(id);

    let order = state
        .store
        .order(id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;
    Ok(Json(order))
}
