use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, CourierStatus, GeoPoint, VehicleType};
use crate::models::location::{CourierLocation, LocationSample};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(create_courier).get(list_couriers))
        .route("/couriers/:id", get(get_courier))
        .route("/couriers/:id/status", patch(update_status))
        .route(
            "/couriers/:id/location",
            patch(report_location).get(current_location),
        )
        .route("/couriers/:id/location/history", get(location_history))
}

#[derive(Deserialize)]
pub struct CreateCourierRequest {
    pub name: String,
    pub phone: String,
    pub vehicle_type: VehicleType,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CourierStatus,
}

#[derive(Deserialize)]
pub struct ReportLocationRequest {
    pub location: GeoPoint,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub battery_level: Option<i32>,
    pub delivery_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let now = Utc::now();
    let courier = Courier {
        id: Uuid::new_v4(),
        name: payload.name,
        phone: payload.phone,
        vehicle_type: payload.vehicle_type,
        is_active: true,
        current_status: CourierStatus::Available,
        created_at: now,
        updated_at: now,
    };

    let mut txn = state.store.begin();
    txn.put_courier(courier.clone());
    txn.commit();

    // Activation position is persistence-only; nobody is notified.
    if let Some(point) = payload.location {
        state
            .locations
            .write_silent(courier.id, LocationSample::at(point, now), None);
    }

    Ok(Json(courier))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Json<Vec<Courier>> {
    Json(state.store.couriers_snapshot())
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>, AppError> {
    let courier = state
        .store
        .courier(id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;
    Ok(Json(courier))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Courier>, AppError> {
    let mut courier = state
        .store
        .courier(id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

    courier.current_status = payload.status;
    let mut txn = state.store.begin();
    txn.put_courier(courier.clone());
    txn.commit();

    Ok(Json(courier))
}

async fn report_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReportLocationRequest>,
) -> Result<Json<CourierLocation>, AppError> {
    if state.store.courier(id).is_none() {
        return Err(AppError::NotFound(format!("courier {id} not found")));
    }

    let sample = LocationSample {
        point: payload.location,
        accuracy: payload.accuracy,
        speed: payload.speed,
        heading: payload.heading,
        battery_level: payload.battery_level,
        timestamp: Utc::now(),
    };

    let row = state.locations.write(id, sample, payload.delivery_id).await;
    Ok(Json(row))
}

async fn current_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<LocationSample>, AppError> {
    state
        .locations
        .read(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no location known for courier {id}")))
}

async fn location_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<CourierLocation>> {
    Json(state.locations.history(id, query.limit.unwrap_or(10)))
}
