//! Bounded, TTL-based, LRU-evicting map from synthetic tool-call IDs to their invocation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde_json::Value;

/// Default maximum number of entries retained.
pub const DEFAULT_MAX_SIZE: usize = 1000;
/// Default time-to-live for a stored entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
/// Default interval between background sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// A previously-observed tool invocation, keyed by its synthetic `call_<hex>` id.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    /// Name of the tool that was called.
    pub name: String,
    /// Arguments the model supplied, as a parsed JSON value.
    pub args: Value,
    /// Tool description, if known, for re-formatting the call in a later turn.
    pub description: String,
}

/// Point-in-time counters describing the map's occupancy.
#[derive(Debug, Clone, Copy)]
pub struct IdMapStats {
    /// Entries currently stored, including any that are expired but not yet swept.
    pub total_entries: usize,
    /// Entries that are stored but past their TTL.
    pub expired_entries: usize,
    /// `total_entries - expired_entries`.
    pub active_entries: usize,
    /// Configured capacity.
    pub max_size: usize,
    /// Configured time-to-live, in seconds.
    pub ttl_seconds: u64,
    /// `total_entries / max_size`.
    pub memory_usage_ratio: f64,
}

struct Entry {
    record: ToolCallRecord,
    stored_at: Instant,
}

struct Inner {
    /// Insertion/access order: front is least-recently-used, back is most-recently-used.
    data: IndexMap<String, Entry>,
}

/// A process-wide, thread-safe store mapping synthetic tool-call IDs to the invocation
/// (`name`, `args`) they correspond to, so a later `tool`-role message carrying that ID can be
/// reformatted without the client having to resend the original call.
pub struct IdMap {
    inner: Mutex<Inner>,
    max_size: usize,
    ttl: Duration,
}

impl IdMap {
    /// Creates a new map with the given capacity and entry lifetime.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self { inner: Mutex::new(Inner { data: IndexMap::new() }), max_size, ttl }
    }

    /// Stores (or refreshes) a record under `id`. Idempotent: re-storing an existing ID
    /// refreshes both its timestamp and its position as most-recently-used. When storing a
    /// new entry would exceed capacity, the least-recently-used entries are evicted first.
    pub fn store(&self, id: &str, name: &str, args: Value, description: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());

        inner.data.shift_remove(id);

        while inner.data.len() >= self.max_size {
            inner.data.shift_remove_index(0);
        }

        inner.data.insert(
            id.to_string(),
            Entry {
                record: ToolCallRecord { name: name.to_string(), args, description: description.to_string() },
                stored_at: Instant::now(),
            },
        );
    }

    /// Returns the record for `id` if present and not expired, promoting it to
    /// most-recently-used. Absence (missing or expired) is not an error.
    pub fn get(&self, id: &str) -> Option<ToolCallRecord> {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());

        let entry = inner.data.get(id)?;
        if entry.stored_at.elapsed() > self.ttl {
            inner.data.shift_remove(id);
            return None;
        }

        let record = entry.record.clone();
        inner.data.move_index(inner.data.get_index_of(id).unwrap(), inner.data.len() - 1);
        Some(record)
    }

    /// Sweeps every expired entry, returning the count removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());

        let expired: Vec<String> =
            inner.data.iter().filter(|(_, entry)| entry.stored_at.elapsed() > self.ttl).map(|(id, _)| id.clone()).collect();

        for id in &expired {
            inner.data.shift_remove(id);
        }

        expired.len()
    }

    /// Returns a snapshot of the map's current occupancy.
    pub fn stats(&self) -> IdMapStats {
        let inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());

        let total_entries = inner.data.len();
        let expired_entries = inner.data.values().filter(|entry| entry.stored_at.elapsed() > self.ttl).count();

        IdMapStats {
            total_entries,
            expired_entries,
            active_entries: total_entries - expired_entries,
            max_size: self.max_size,
            ttl_seconds: self.ttl.as_secs(),
            memory_usage_ratio: total_entries as f64 / self.max_size as f64,
        }
    }

    /// Spawns a dedicated OS thread that sweeps expired entries every `interval`, logging
    /// occupancy whenever the map is non-empty. Runs for the lifetime of the process; a
    /// single sweep failing never stops subsequent ones.
    pub fn spawn_sweeper(self: &std::sync::Arc<Self>, interval: Duration) {
        let map = std::sync::Arc::clone(self);

        std::thread::spawn(move || {
            loop {
                std::thread::sleep(interval);

                let cleaned = map.cleanup_expired();
                let stats = map.stats();

                if stats.total_entries > 0 {
                    log::debug!(
                        "tool-call id map sweep: cleaned={cleaned} total={} active={} usage={:.1}%",
                        stats.total_entries,
                        stats.active_entries,
                        stats.memory_usage_ratio * 100.0
                    );
                }
            }
        });
    }
}

impl Default for IdMap {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }
}

/// Unused alias retained for call sites that want to name the underlying storage; not part of
/// the public contract.
#[allow(dead_code)]
type _Timestamps = HashMap<String, Instant>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_get_round_trips() {
        let map = IdMap::new(10, Duration::from_secs(60));
        map.store("call_1", "get_weather", serde_json::json!({"city": "nyc"}), "");

        let record = map.get("call_1").unwrap();
        assert_eq!(record.name, "get_weather");
        assert_eq!(record.args, serde_json::json!({"city": "nyc"}));
    }

    #[test]
    fn get_on_missing_id_is_none() {
        let map = IdMap::new(10, Duration::from_secs(60));
        assert!(map.get("call_missing").is_none());
    }

    #[test]
    fn expired_entry_is_absent() {
        let map = IdMap::new(10, Duration::from_millis(1));
        map.store("call_1", "f", Value::Null, "");
        std::thread::sleep(Duration::from_millis(5));
        assert!(map.get("call_1").is_none());
    }

    #[test]
    fn over_capacity_evicts_least_recently_used() {
        let map = IdMap::new(3, Duration::from_secs(60));
        map.store("a", "f", Value::Null, "");
        map.store("b", "f", Value::Null, "");
        map.store("c", "f", Value::Null, "");

        // touch "a" so it becomes most-recently-used, "b" becomes the LRU victim.
        map.get("a");
        map.store("d", "f", Value::Null, "");

        assert!(map.get("b").is_none());
        assert!(map.get("a").is_some());
        assert!(map.get("c").is_some());
        assert!(map.get("d").is_some());
    }

    #[test]
    fn restore_under_existing_id_is_idempotent() {
        let map = IdMap::new(10, Duration::from_secs(60));
        map.store("call_1", "f", serde_json::json!(1), "");
        map.store("call_1", "f", serde_json::json!(2), "");

        assert_eq!(map.stats().total_entries, 1);
        assert_eq!(map.get("call_1").unwrap().args, serde_json::json!(2));
    }

    #[test]
    fn stats_report_expected_shape() {
        let map = IdMap::new(10, Duration::from_secs(60));
        map.store("call_1", "f", Value::Null, "");
        let stats = map.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.max_size, 10);
        assert!(stats.memory_usage_ratio > 0.0);
    }
}
