//! Cache of read-only tool outputs.
//!
//! Report tools are queried repeatedly while a plan is built. Their last
//! good answer is kept here, keyed by `"{tool}-{input}"`, so a service that
//! goes down mid-run still has a last known report to fall back on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// Thread-safe in-memory store of tool outputs.
#[derive(Debug, Clone, Default)]
pub struct ToolCache {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

fn key(tool: &str, input: &str) -> String {
    format!("{}-{}", tool, input)
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the output of `tool` for `input`, replacing any older entry.
    pub fn add(&self, tool: &str, input: &str, output: Value) {
        self.entries.write().insert(key(tool, input), output);
    }

    /// The cached output of `tool` for `input`.
    pub fn read(&self, tool: &str, input: &str) -> Option<Value> {
        self.entries.read().get(&key(tool, input)).cloned()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_and_read() {
        let cache = ToolCache::new();
        cache.add("grid_report_status", "{}", json!({"total_zones": 3}));
        assert_eq!(cache.read("grid_report_status", "{}"), Some(json!({"total_zones": 3})));
        assert_eq!(cache.read("grid_report_status", "{\"zone_id\":\"Z001\"}"), None);
        assert_eq!(cache.read("emergency_report_status", "{}"), None);
    }

    #[test]
    fn test_newer_output_replaces_older() {
        let cache = ToolCache::new();
        cache.add("traffic_report_conditions", "{}", json!({"average_congestion": 0.4}));
        cache.add("traffic_report_conditions", "{}", json!({"average_congestion": 0.9}));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.read("traffic_report_conditions", "{}").unwrap()["average_congestion"], 0.9);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clones_share_entries_across_threads() {
        let cache = ToolCache::new();
        let writer_cache = cache.clone();
        let writer = std::thread::spawn(move || {
            for i in 0..50 {
                writer_cache.add("grid_report_status", &format!("zone_{}", i), json!(i));
            }
        });
        let reader_cache = cache.clone();
        let reader = std::thread::spawn(move || {
            for i in 0..50 {
                let _ = reader_cache.read("grid_report_status", &format!("zone_{}", i));
            }
        });
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(cache.len(), 50);
    }
}
