use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::lifecycle::DeliveryUpdate;
use crate::error::AppError;
use crate::models::batch::BatchDelivery;
use crate::models::courier::GeoPoint;
use crate::models::delivery::{Delivery, DeliveryStatus, SimulationStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", get(list_deliveries))
        .route("/deliveries/assign", post(assign))
        .route("/deliveries/batch", post(assign_batch))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/accept", post(accept))
        .route("/deliveries/:id/deny", post(deny))
        .route("/deliveries/:id/status", put(update_status))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub order_id: Uuid,
}

#[derive(Deserialize)]
pub struct BatchAssignRequest {
    pub order_ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct BatchAssignResponse {
    pub batch: BatchDelivery,
    pub deliveries: Vec<Delivery>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Option<DeliveryStatus>,
    pub location: Option<GeoPoint>,
    pub route_index: Option<u32>,
    pub simulation_status: Option<SimulationStatus>,
}

async fn list_deliveries(State(state): State<Arc<AppState>>) -> Json<Vec<Delivery>> {
    let mut deliveries = state.store.deliveries_snapshot();
    deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(deliveries)
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .store
        .delivery(id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;
    Ok(Json(delivery))
}

async fn assign(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state.dispatch.assign(payload.order_id).await?;
    Ok(Json(delivery))
}

async fn assign_batch(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BatchAssignRequest>,
) -> Result<Json<BatchAssignResponse>, AppError> {
    let (batch, deliveries) = state.dispatch.assign_batch(&payload.order_ids).await?;
    Ok(Json(BatchAssignResponse { batch, deliveries }))
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state.lifecycle.accept(id).await?;
    Ok(Json(delivery))
}

async fn deny(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state.dispatch.deny_assignment(id).await?;
    Ok(Json(delivery))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .lifecycle
        .update(
            id,
            DeliveryUpdate {
                status: payload.status,
                location: payload.location,
                route_index: payload.route_index,
                simulation_status: payload.simulation_status,
            },
        )
        .await?;
    Ok(Json(delivery))
}
