//! Error log: a bounded in-memory ring plus a smaller persisted tail.
//!
//! The log itself never touches storage. It hands out the serialized tail
//! so the boundary can write it with no lock held.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tracing::warn;
use warden_core::{ErrorRecord, KeyValueStore, Severity, Timestamp};

#[derive(Debug, Clone)]
pub struct ErrorLog {
    records: VecDeque<ErrorRecord>,
    max_records: usize,
    max_persisted: usize,
}

impl ErrorLog {
    pub fn new(max_records: usize, max_persisted: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_records),
            max_records,
            max_persisted,
        }
    }

    /// Seed the ring with previously persisted records, oldest first.
    pub fn with_records(mut self, records: Vec<ErrorRecord>) -> Self {
        for record in records {
            self.push(record);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append, dropping the oldest record once the ring is full.
    pub fn push(&mut self, record: ErrorRecord) {
        while self.records.len() >= self.max_records {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn last(&self) -> Option<&ErrorRecord> {
        self.records.back()
    }

    /// The `n` most recent records, newest last.
    pub fn recent(&self, n: usize) -> Vec<ErrorRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    /// Records stamped within `window` before `now`.
    pub fn count_since(&self, now: Timestamp, window: Duration) -> usize {
        let cutoff = cutoff(now, window);
        self.records.iter().rev().take_while(|r| r.timestamp >= cutoff).count()
    }

    /// Whether the same message and severity was recorded within `window`.
    pub fn has_duplicate(&self, message: &str, severity: Severity, now: Timestamp, window: Duration) -> bool {
        let cutoff = cutoff(now, window);
        self.records
            .iter()
            .rev()
            .take_while(|r| r.timestamp >= cutoff)
            .any(|r| r.same_failure(message, severity))
    }

    pub fn by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.severity).or_insert(0) += 1;
        }
        counts
    }

    /// JSON of the persisted tail.
    pub fn persisted_payload(&self) -> Result<String, serde_json::Error> {
        let skip = self.records.len().saturating_sub(self.max_persisted);
        let tail: Vec<&ErrorRecord> = self.records.iter().skip(skip).collect();
        serde_json::to_string(&tail)
    }
}

fn cutoff(now: Timestamp, window: Duration) -> Timestamp {
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
    now - window
}

/// Read the persisted tail. Missing or corrupt data yields an empty log.
pub fn load(store: &dyn KeyValueStore, key: &str, max_persisted: usize) -> Vec<ErrorRecord> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(err) => {
            warn!(key, error = %err, "boundary.restore_failed");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<ErrorRecord>>(&raw) {
        Ok(mut records) => {
            let excess = records.len().saturating_sub(max_persisted);
            records.drain(..excess);
            records
        }
        Err(err) => {
            warn!(key, error = %err, "boundary.restore_failed");
            Vec::new()
        }
    }
}

/// Write the persisted tail, logging instead of failing.
pub fn persist(store: &dyn KeyValueStore, key: &str, payload: Result<String, serde_json::Error>) {
    let payload = match payload {
        Ok(payload) => payload,
        Err(err) => {
            warn!(key, error = %err, "boundary.persist_failed");
            return;
        }
    };
    if let Err(err) = store.set(key, &payload) {
        warn!(key, error = %err, "boundary.persist_failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use warden_core::{ErrorContext, ErrorKind};
    use warden_test_utils::MemoryStore;

    fn record(at: Timestamp, message: &str, severity: Severity) -> ErrorRecord {
        ErrorRecord::new(at, message, severity, ErrorContext::new("test.op", ErrorKind::Failure))
    }

    #[test]
    fn test_ring_drops_oldest() {
        let now = Utc::now();
        let mut log = ErrorLog::new(3, 2);
        for i in 0..5 {
            log.push(record(now, &format!("e{}", i), Severity::Low));
        }
        let messages: Vec<String> = log.recent(10).into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["e2", "e3", "e4"]);
        assert_eq!(log.recent(1)[0].message, "e4");
    }

    #[test]
    fn test_windows_only_count_recent_records() {
        let now = Utc::now();
        let mut log = ErrorLog::new(10, 5);
        log.push(record(now - chrono::Duration::seconds(90), "old", Severity::High));
        log.push(record(now - chrono::Duration::seconds(5), "new", Severity::High));

        assert_eq!(log.count_since(now, Duration::from_secs(60)), 1);
        assert!(log.has_duplicate("new", Severity::High, now, Duration::from_secs(10)));
        assert!(!log.has_duplicate("old", Severity::High, now, Duration::from_secs(10)));
        assert!(!log.has_duplicate("new", Severity::Low, now, Duration::from_secs(10)));
    }

    #[test]
    fn test_persist_and_load_roundtrip_tail() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut log = ErrorLog::new(10, 2);
        for i in 0..4 {
            log.push(record(now, &format!("e{}", i), Severity::Medium));
        }
        persist(&store, "k", log.persisted_payload());

        let restored = load(&store, "k", 2);
        let messages: Vec<String> = restored.into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["e2", "e3"]);
    }

    #[test]
    fn test_load_tolerates_garbage() {
        let store = MemoryStore::new();
        store.set("k", "{not json").unwrap();
        assert!(load(&store, "k", 20).is_empty());
        assert!(load(&store, "missing", 20).is_empty());
    }

    proptest! {
        /// Property: neither the ring nor the persisted tail exceeds its bound.
        #[test]
        fn prop_ring_and_tail_bounded(
            max_records in 1usize..30,
            max_persisted in 0usize..30,
            pushes in 0usize..80,
        ) {
            let max_persisted = max_persisted.min(max_records);
            let now = Utc::now();
            let mut log = ErrorLog::new(max_records, max_persisted);
            for i in 0..pushes {
                log.push(record(now, &format!("e{}", i), Severity::Low));
                prop_assert!(log.len() <= max_records);
            }
            let payload = log.persisted_payload().unwrap();
            let tail: Vec<ErrorRecord> = serde_json::from_str(&payload).unwrap();
            prop_assert_eq!(tail.len(), pushes.min(max_persisted));
            if let (Some(last), Some(tail_last)) = (log.last(), tail.last()) {
                prop_assert_eq!(&last.message, &tail_last.message);
            }
        }
    }
}
