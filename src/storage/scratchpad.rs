//! Session scratchpad: in-process short-lived state for multi-turn flows
//!
//! Each entry is keyed by `"<chat_id>:<namespace>"` and holds a small bag of
//! JSON fields plus an optional expiry deadline. Counters reuse the same
//! store with a single numeric field. Everything here is lost on restart;
//! durable state belongs in the database.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    fields: HashMap<String, Value>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

pub struct Scratchpad {
    entries: DashMap<String, Entry>,
}

fn entry_key(chat_id: i64, namespace: &str) -> String {
    format!("{chat_id}:{namespace}")
}

impl Scratchpad {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Set one field under a chat's namespace, creating the entry if needed.
    ///
    /// A fresh entry gets the given TTL; writes into an existing entry keep
    /// its original deadline so a flow cannot extend itself forever.
    pub fn set_field(&self, chat_id: i64, namespace: &str, field: &str, value: Value, ttl: Option<Duration>) {
        let key = entry_key(chat_id, namespace);
        let mut entry = self.entries.entry(key).or_insert_with(|| Entry {
            fields: HashMap::new(),
            expires_at: ttl.map(|t| Instant::now() + t),
        });
        if entry.is_expired() {
            entry.fields.clear();
            entry.expires_at = ttl.map(|t| Instant::now() + t);
        }
        entry.fields.insert(field.to_string(), value);
    }

    /// Read one field, treating an expired entry as absent.
    pub fn get_field(&self, chat_id: i64, namespace: &str, field: &str) -> Option<Value> {
        let key = entry_key(chat_id, namespace);
        let entry = self.entries.get(&key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        entry.fields.get(field).cloned()
    }

    pub fn get_field_str(&self, chat_id: i64, namespace: &str, field: &str) -> Option<String> {
        self.get_field(chat_id, namespace, field)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn get_field_i64(&self, chat_id: i64, namespace: &str, field: &str) -> Option<i64> {
        self.get_field(chat_id, namespace, field).and_then(|v| v.as_i64())
    }

    /// Drop a chat's namespace entirely.
    pub fn remove(&self, chat_id: i64, namespace: &str) {
        self.entries.remove(&entry_key(chat_id, namespace));
    }

    /// Read a counter, or initialize it to 1 with the given TTL.
    ///
    /// Returns the value seen by the caller after the call (1 on first use).
    pub fn counter_get_or_init(&self, key: &str, ttl: Duration) -> i64 {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            fields: HashMap::new(),
            expires_at: Some(Instant::now() + ttl),
        });
        if entry.is_expired() {
            entry.fields.clear();
            entry.expires_at = Some(Instant::now() + ttl);
        }
        match entry.fields.get("count").and_then(Value::as_i64) {
            Some(count) => count,
            None => {
                entry.fields.insert("count".to_string(), Value::from(1));
                1
            }
        }
    }

    /// Increment a counter without touching its deadline.
    ///
    /// A counter that expired between read and increment restarts at 1.
    pub fn counter_incr(&self, key: &str, ttl: Duration) -> i64 {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            fields: HashMap::new(),
            expires_at: Some(Instant::now() + ttl),
        });
        if entry.is_expired() {
            entry.fields.clear();
            entry.expires_at = Some(Instant::now() + ttl);
        }
        let next = entry.fields.get("count").and_then(Value::as_i64).unwrap_or(0) + 1;
        entry.fields.insert("count".to_string(), Value::from(next));
        next
    }

    /// Pin a counter one past its threshold, keeping the existing deadline.
    ///
    /// Used on limit breach so repeat offenders stay blocked for the rest of
    /// the window without the window sliding forward.
    pub fn counter_pin_above(&self, key: &str, threshold: i64) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired() {
                entry.fields.insert("count".to_string(), Value::from(threshold + 1));
            }
        }
    }

    /// Current counter value, 0 when absent or expired.
    pub fn counter_value(&self, key: &str) -> i64 {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .and_then(|entry| entry.fields.get("count").and_then(Value::as_i64))
            .unwrap_or(0)
    }

    /// Sweep expired entries. Called periodically from the maintenance task.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before - self.entries.len();
        if removed > 0 {
            log::debug!("Purged {} expired scratchpad entries", removed);
        }
        removed
    }
}

impl Default for Scratchpad {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fields_round_trip_per_chat() {
        let pad = Scratchpad::new();
        pad.set_field(1, "add:session", "phone", json!("12025550123"), None);
        pad.set_field(2, "add:session", "phone", json!("447700900000"), None);

        assert_eq!(pad.get_field_str(1, "add:session", "phone").as_deref(), Some("12025550123"));
        assert_eq!(pad.get_field_str(2, "add:session", "phone").as_deref(), Some("447700900000"));
        pad.remove(1, "add:session");
        assert!(pad.get_field(1, "add:session", "phone").is_none());
        assert!(pad.get_field(2, "add:session", "phone").is_some());
    }

    #[test]
    fn expired_entry_reads_as_absent() {
        let pad = Scratchpad::new();
        pad.set_field(1, "order", "phone", json!("123"), Some(Duration::ZERO));
        assert!(pad.get_field(1, "order", "phone").is_none());
    }

    #[test]
    fn counter_starts_at_one_then_increments() {
        let pad = Scratchpad::new();
        let window = Duration::from_secs(60);
        assert_eq!(pad.counter_get_or_init("spam:1", window), 1);
        assert_eq!(pad.counter_incr("spam:1", window), 2);
        assert_eq!(pad.counter_incr("spam:1", window), 3);
        assert_eq!(pad.counter_value("spam:1"), 3);
    }

    #[test]
    fn pin_above_holds_breach_without_new_deadline() {
        let pad = Scratchpad::new();
        let window = Duration::from_secs(60);
        pad.counter_get_or_init("spam:2", window);
        pad.counter_pin_above("spam:2", 3);
        assert_eq!(pad.counter_value("spam:2"), 4);
        // Pinning an absent counter is a no-op
        pad.counter_pin_above("spam:9", 3);
        assert_eq!(pad.counter_value("spam:9"), 0);
    }

    #[test]
    fn purge_drops_only_expired() {
        let pad = Scratchpad::new();
        pad.set_field(1, "a", "x", json!(1), Some(Duration::ZERO));
        pad.set_field(2, "b", "x", json!(1), None);
        assert_eq!(pad.purge_expired(), 1);
        assert!(pad.get_field(2, "b", "x").is_some());
    }
}
