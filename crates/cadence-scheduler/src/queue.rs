use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

/// Jobs waiting for their fire time, bucketed by epoch milliseconds.
///
/// A name appears at most once across all buckets. Entries sharing a fire
/// time keep insertion order.
#[derive(Debug)]
pub(crate) struct WaitQueue<T> {
    buckets: BTreeMap<i64, Vec<(String, T)>>,
    index: HashMap<String, i64>,
}

impl<T> WaitQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    /// Enqueue `item` under `name`, replacing any earlier entry for it.
    pub(crate) fn insert(&mut self, name: &str, fire_at: DateTime<Utc>, item: T) {
        self.remove(name);
        let key = fire_at.timestamp_millis();
        self.buckets
            .entry(key)
            .or_default()
            .push((name.to_string(), item));
        self.index.insert(name.to_string(), key);
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<T> {
        let key = self.index.remove(name)?;
        let bucket = self.buckets.get_mut(&key)?;
        let pos = bucket.iter().position(|(n, _)| n == name)?;
        let (_, item) = bucket.remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
        Some(item)
    }

    pub(crate) fn fire_time(&self, name: &str) -> Option<DateTime<Utc>> {
        self.index
            .get(name)
            .and_then(|ms| DateTime::from_timestamp_millis(*ms))
    }

    /// Earliest fire time in the queue.
    pub(crate) fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.buckets
            .keys()
            .next()
            .and_then(|ms| DateTime::from_timestamp_millis(*ms))
    }

    /// Remove and return every entry due at or before `now`, in fire time
    /// order.
    pub(crate) fn drain_due(&mut self, now: DateTime<Utc>) -> Vec<T> {
        let now_ms = now.timestamp_millis();
        let mut due = Vec::new();
        while let Some(entry) = self.buckets.first_entry() {
            if *entry.key() > now_ms {
                break;
            }
            for (name, item) in entry.remove() {
                self.index.remove(&name);
                due.push(item);
            }
        }
        due
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }
}
