use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Assigned,
    Accepted,
    Denied,
    Collected,
    InProgress,
    Completed,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Completed | DeliveryStatus::Failed | DeliveryStatus::Denied
        )
    }

    /// Valid next steps in the delivery lifecycle. Denial is handled by
    /// the dispatch engine rather than the generic transition path.
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        match (self, next) {
            (Assigned, Accepted) => true,
            (Accepted, Collected) | (Accepted, InProgress) => true,
            (Collected, InProgress) | (Collected, Completed) => true,
            (InProgress, Completed) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

/// Playback phase of a simulated courier run. Informational only;
/// matching never reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    Idle,
    GoingToPickup,
    AtPickup,
    GoingToDelivery,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub status: DeliveryStatus,
    pub distance_km: f64,
    pub last_location: Option<GeoPoint>,
    pub current_route_index: u32,
    pub simulation_status: SimulationStatus,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
