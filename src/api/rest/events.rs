use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::models::event::DomainEvent;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events/orders/:id", get(order_events))
        .route("/events/deliveries/:id", get(delivery_events))
}

async fn order_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<DomainEvent>> {
    Json(state.store.events_for_order(id))
}

async fn delivery_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<DomainEvent>> {
    Json(state.store.events_for_delivery(id))
}
