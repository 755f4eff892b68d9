use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Read-through cache keyed by pull-request URL. Entries expire after a
/// fixed TTL; expired entries are dropped on the next write.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, (V, DateTime<Utc>)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone())
    }

    pub fn insert_at(&self, key: &str, value: V, now: DateTime<Utc>) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(key.to_string(), (value, now + self.ttl));
    }

    pub fn invalidate(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}
