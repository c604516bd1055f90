use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,

    pub location_ttl_secs: u64,
    pub active_deliveries_ttl_secs: u64,
    pub idempotency_ttl_secs: u64,

    pub publish_timeout_ms: u64,
    pub dlq_max_retries: u32,
    pub dlq_batch_size: usize,
    pub dlq_interval_secs: u64,

    pub assignment_max_retries: u32,
    pub order_max_age_hours: i64,
    pub retry_interval_secs: u64,
    pub backoff_cap_minutes: u32,
    pub max_denials: u32,

    pub lock_wait_ms: u64,
    pub prep_min_secs: u64,
    pub prep_max_secs: u64,
    pub rng_seed: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,

            location_ttl_secs: parse_or_default("LOCATION_TTL_SECS", 300)?,
            active_deliveries_ttl_secs: parse_or_default("ACTIVE_DELIVERIES_TTL_SECS", 7200)?,
            idempotency_ttl_secs: parse_or_default("IDEMPOTENCY_TTL_SECS", 86_400)?,

            publish_timeout_ms: parse_or_default("PUBLISH_TIMEOUT_MS", 3000)?,
            dlq_max_retries: parse_or_default("DLQ_MAX_RETRIES", 5)?,
            dlq_batch_size: parse_or_default("DLQ_BATCH_SIZE", 100)?,
            dlq_interval_secs: parse_or_default("DLQ_INTERVAL_SECS", 60)?,

            assignment_max_retries: parse_or_default("ASSIGNMENT_MAX_RETRIES", 10)?,
            order_max_age_hours: parse_or_default("ORDER_MAX_AGE_HOURS", 24)?,
            retry_interval_secs: parse_or_default("RETRY_INTERVAL_SECS", 300)?,
            backoff_cap_minutes: parse_or_default("BACKOFF_CAP_MINUTES", 60)?,
            max_denials: parse_or_default("MAX_DENIALS", 5)?,

            lock_wait_ms: parse_or_default("LOCK_WAIT_MS", 2000)?,
            prep_min_secs: parse_or_default("PREP_MIN_SECS", 30)?,
            prep_max_secs: parse_or_default("PREP_MAX_SECS", 60)?,
            rng_seed: parse_optional("RNG_SEED")?,
        })
    }

    pub fn location_ttl(&self) -> Duration {
        Duration::from_secs(self.location_ttl_secs)
    }

    pub fn active_deliveries_ttl(&self) -> Duration {
        Duration::from_secs(self.active_deliveries_ttl_secs)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn parse_optional<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(None),
    }
}
