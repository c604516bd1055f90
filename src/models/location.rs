use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

/// One position report from a courier device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub point: GeoPoint,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub battery_level: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn at(point: GeoPoint, timestamp: DateTime<Utc>) -> Self {
        Self {
            point,
            accuracy: None,
            speed: None,
            heading: None,
            battery_level: None,
            timestamp,
        }
    }
}

/// Append-only durable log row; never updated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierLocation {
    pub id: Uuid,
    pub courier_id: Uuid,
    pub delivery_id: Option<Uuid>,
    pub sample: LocationSample,
}
