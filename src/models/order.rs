use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Ready,
    Assigned,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Position in the forward lifecycle, used to guard against status
    /// regressions when deliveries and orders are synchronized.
    pub fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Preparing => 1,
            OrderStatus::Ready => 2,
            OrderStatus::Assigned => 3,
            OrderStatus::PickedUp => 4,
            OrderStatus::InTransit => 5,
            OrderStatus::Delivered => 6,
            OrderStatus::Cancelled => 7,
        }
    }

    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Preparing | OrderStatus::Ready
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_name: String,
    pub pickup_address: String,
    pub pickup: GeoPoint,
    pub dropoff_address: String,
    pub dropoff: GeoPoint,
    pub status: OrderStatus,
    pub assignment_retry_count: u32,
    pub last_assignment_retry_at: Option<DateTime<Utc>>,
    pub denial_count: u32,
    pub estimated_delivery_time: Option<DateTime<Utc>>,
    pub actual_delivery_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Advance to `next` only if it is further along the lifecycle.
    pub fn advance_status(&mut self, next: OrderStatus) {
        if next.rank() > self.status.rank() {
            self.status = next;
        }
    }
}
