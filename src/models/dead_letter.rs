use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    Pending,
    Retrying,
    Processed,
    Failed,
}

/// Durable record of an event envelope that failed to publish. Created
/// only on publish failure and replayed by the reprocessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub channel: String,
    pub partition_key: Option<String>,
    pub payload: Value,
    pub error_message: String,
    pub retry_count: u32,
    pub status: DeadLetterStatus,
    pub next_retry_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Backoff window before attempt `retry_count + 1`, capped in minutes.
pub fn backoff_window(retry_count: u32, cap_minutes: u32) -> Duration {
    let minutes = 2u32
        .checked_pow(retry_count)
        .unwrap_or(cap_minutes)
        .min(cap_minutes);
    Duration::minutes(i64::from(minutes))
}

#[cfg(test)]
mod tests {
    use super::backoff_window;

    #[test]
    fn backoff_doubles_until_cap() {
        assert_eq!(backoff_window(0, 60).num_minutes(), 1);
        assert_eq!(backoff_window(1, 60).num_minutes(), 2);
        assert_eq!(backoff_window(4, 60).num_minutes(), 16);
        assert_eq!(backoff_window(6, 60).num_minutes(), 60);
        assert_eq!(backoff_window(30, 60).num_minutes(), 60);
    }

    #[test]
    fn backoff_survives_pow_overflow() {
        assert_eq!(backoff_window(40, 60).num_minutes(), 60);
    }
}
