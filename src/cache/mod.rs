use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

pub fn location_key(courier_id: Uuid) -> String {
    format!("location:{courier_id}")
}

pub fn active_deliveries_key(courier_id: Uuid) -> String {
    format!("active_deliveries:{courier_id}")
}

pub fn event_processed_key(event_id: Uuid) -> String {
    format!("event_processed:{event_id}")
}

struct ValueEntry {
    data: String,
    expires_at: Option<Instant>,
}

struct SetEntry {
    members: HashSet<String>,
    expires_at: Option<Instant>,
}

fn expired(expires_at: Option<Instant>) -> bool {
    expires_at.is_some_and(|at| Instant::now() >= at)
}

/// In-process key-value cache with per-key TTL and set operations.
/// Expired entries are dropped lazily on access.
#[derive(Default)]
pub struct MemoryCache {
    values: DashMap<String, ValueEntry>,
    sets: DashMap<String, SetEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, data: String, ttl: Duration) {
        self.values.insert(
            key.to_string(),
            ValueEntry {
                data,
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.values.get(key) {
            if !expired(entry.expires_at) {
                return Some(entry.data.clone());
            }
        } else {
            return None;
        }

        self.values.remove(key);
        None
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &str) {
        self.values.remove(key);
        self.sets.remove(key);
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(data) => self.set(key, data, ttl),
            Err(err) => warn!(key, error = %err, "failed to serialize cache value"),
        }
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let data = self.get(key)?;
        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "dropping undecodable cache value");
                self.values.remove(key);
                None
            }
        }
    }

    /// Add to a set and refresh the whole set's expiry.
    pub fn sadd(&self, key: &str, member: &str, ttl: Duration) {
        let mut entry = self.sets.entry(key.to_string()).or_insert_with(|| SetEntry {
            members: HashSet::new(),
            expires_at: None,
        });
        if expired(entry.expires_at) {
            entry.members.clear();
        }
        entry.members.insert(member.to_string());
        entry.expires_at = Some(Instant::now() + ttl);
    }

    pub fn srem(&self, key: &str, member: &str) {
        if let Some(mut entry) = self.sets.get_mut(key) {
            entry.members.remove(member);
        }
    }

    pub fn smembers(&self, key: &str) -> Vec<String> {
        if let Some(entry) = self.sets.get(key) {
            if !expired(entry.expires_at) {
                return entry.members.iter().cloned().collect();
            }
        } else {
            return Vec::new();
        }

        self.sets.remove(key);
        Vec::new()
    }
}
