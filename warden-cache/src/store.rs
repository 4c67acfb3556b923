//! Entry storage for the query cache.
//!
//! [`SingleStore`] keeps one node-or-absence per key and evicts by insertion
//! order: the entry with the smallest sequence number goes first. Refreshing
//! an entry re-inserts it with a new sequence number, moving it to the back.
//! This approximates LRU without touching order on reads.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use warden_core::TimerId;

use crate::key::CacheKey;

/// A cached single lookup.
#[derive(Debug, Clone)]
pub struct CacheEntry<N> {
    pub value: Option<N>,
    pub inserted_at: Instant,
    seq: u64,
}

/// A cached multi lookup. Expiry is driven by the one-shot timer `expiry`,
/// armed at insertion. The timer carries `generation` so a stale timer cannot
/// drop a newer entry under the same key.
#[derive(Debug, Clone)]
pub struct MultiCacheEntry<N> {
    pub values: Vec<N>,
    pub expiry: TimerId,
    pub generation: u64,
}

impl<N> MultiCacheEntry<N> {
    /// First and last elements, the only ones checked for attachment.
    pub fn endpoints(&self) -> Option<(&N, &N)> {
        match (self.values.first(), self.values.last()) {
            (Some(first), Some(last)) => Some((first, last)),
            _ => None,
        }
    }
}

/// Insertion-ordered single-entry store with a size bound.
#[derive(Debug)]
pub struct SingleStore<N> {
    entries: HashMap<CacheKey, CacheEntry<N>>,
    order: BTreeMap<u64, CacheKey>,
    next_seq: u64,
}

impl<N> Default for SingleStore<N> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<N: Clone> SingleStore<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry<N>> {
        self.entries.get(key)
    }

    /// Insert or refresh `key`. When the store is full the structurally
    /// oldest entry is evicted first and its key returned.
    pub fn insert(
        &mut self,
        key: CacheKey,
        value: Option<N>,
        now: Instant,
        max_entries: usize,
    ) -> Option<CacheKey> {
        self.remove(&key);

        let mut evicted = None;
        if self.entries.len() >= max_entries {
            if let Some((_, oldest)) = self.order.pop_first() {
                self.entries.remove(&oldest);
                evicted = Some(oldest);
            }
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        self.order.insert(seq, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                seq,
            },
        );
        evicted
    }

    pub fn remove(&mut self, key: &CacheKey) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.seq);
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose key satisfies `pred`. Keys are collected
    /// first, so the pass is O(size) and always terminates.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&CacheKey) -> bool) -> usize {
        let doomed: Vec<CacheKey> = self.entries.keys().filter(|k| pred(k)).cloned().collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Snapshot of (key, value, inserted_at), oldest first.
    pub fn snapshot(&self) -> Vec<(CacheKey, Option<N>, Instant)> {
        self.order
            .values()
            .filter_map(|key| {
                self.entries
                    .get(key)
                    .map(|e| (key.clone(), e.value.clone(), e.inserted_at))
            })
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.keys()
    }

    /// Keys oldest first.
    pub fn keys_in_order(&self) -> Vec<CacheKey> {
        self.order.values().cloned().collect()
    }
}
