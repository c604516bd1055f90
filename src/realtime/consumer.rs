use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::EventBroker;
use crate::models::event::channels;
use crate::realtime::{order_group, rider_group, FanOut, PushKind};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Background consumer of the location channel: every message is pushed
/// to the courier's group and, when a delivery is attached, to the
/// order's group. An unprovisioned channel is retried, not fatal.
pub async fn run_location_consumer(broker: Arc<dyn EventBroker>, fanout: Arc<FanOut>) {
    loop {
        match broker.subscribe(channels::RIDER_LOCATION) {
            Ok(mut subscription) => {
                info!(channel = channels::RIDER_LOCATION, "location consumer subscribed");
                while let Some(message) = subscription.next().await {
                    forward_location_update(&fanout, &message.payload);
                }
                warn!("location channel closed, resubscribing");
            }
            Err(err) if err.is_retryable() => {
                warn!(
                    channel = channels::RIDER_LOCATION,
                    error = %err,
                    "location channel not ready, retrying"
                );
            }
            Err(err) => {
                error!(error = %err, "location consumer subscription failed");
            }
        }
        sleep(RESUBSCRIBE_DELAY).await;
    }
}

fn forward_location_update(fanout: &FanOut, payload: &Value) {
    let Some(courier_id) = payload
        .get("courier_id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
    else {
        warn!("location message without a courier id dropped");
        return;
    };

    let delivery_id = payload.get("delivery_id").cloned().unwrap_or(Value::Null);
    let data = json!({
        "courier_id": courier_id,
        "delivery_id": delivery_id,
        "location": payload.get("location"),
    });

    fanout.broadcast(&rider_group(courier_id), PushKind::LocationUpdate, data.clone());

    if let Some(order_id) = payload
        .get("order_id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
    {
        fanout.broadcast(&order_group(order_id), PushKind::LocationUpdate, data);
    }
}
