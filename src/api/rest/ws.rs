use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::realtime::{order_group, rider_group};
use crate::state::AppState;

pub async fn order_ws(
    ws: WebSocketUpgrade,
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_group(socket, state, order_group(id)))
}

pub async fn rider_ws(
    ws: WebSocketUpgrade,
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_group(socket, state, rider_group(id)))
}

async fn stream_group(socket: WebSocket, state: Arc<AppState>, group: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.fanout.subscribe(&group);

    info!(group = %group, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Ok(push) = rx.recv().await {
            let json = match serde_json::to_string(&push) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize push message for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(group = %group, "websocket client disconnected");
}
