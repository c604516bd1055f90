use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Active,
    Completed,
}

/// Several orders carried by one courier in an optimized visiting order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDelivery {
    pub id: Uuid,
    pub courier_id: Uuid,
    pub order_sequence: Vec<Uuid>,
    pub total_distance_km: f64,
    pub status: BatchStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
