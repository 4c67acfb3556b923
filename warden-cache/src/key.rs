//! Cache keys and scope identifiers.
//!
//! A key is the pair (pattern, scope). The whole tree always has the fixed
//! scope id [`ScopeId::Root`]; every other scope node receives a generated id
//! the first time it is used. The id is stable while any cached entry refers
//! to it. Once released (no entries left, scope detached, or full
//! invalidation) the node is forgotten and its next use gets a fresh id.
//! Ids are never reused.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

/// Stable per-context handle for a query scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScopeId {
    /// The whole tree
    Root,
    /// A scope node, numbered in order of first use
    Node(u64),
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Node(n) => write!(f, "s{}", n),
        }
    }
}

/// Composite cache key. One entry exists per (pattern, scope) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pattern: String,
    scope: ScopeId,
}

impl CacheKey {
    pub fn new(pattern: impl Into<String>, scope: ScopeId) -> Self {
        Self {
            pattern: pattern.into(),
            scope,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Substring match against the rendered key, used by targeted invalidation.
    pub fn contains(&self, fragment: &str) -> bool {
        self.to_string().contains(fragment)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.pattern, self.scope)
    }
}

/// Lazily assigns [`ScopeId`]s to scope nodes.
#[derive(Debug)]
pub struct ScopeIds<N> {
    ids: HashMap<N, u64>,
    next: u64,
}

impl<N> Default for ScopeIds<N> {
    fn default() -> Self {
        Self {
            ids: HashMap::new(),
            next: 1,
        }
    }
}

impl<N: Clone + Eq + Hash> ScopeIds<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope id for `scope`, assigning one on first use.
    pub fn id_for(&mut self, scope: Option<&N>) -> ScopeId {
        match scope {
            None => ScopeId::Root,
            Some(node) => {
                if let Some(id) = self.ids.get(node) {
                    return ScopeId::Node(*id);
                }
                let id = self.next;
                self.next += 1;
                self.ids.insert(node.clone(), id);
                ScopeId::Node(id)
            }
        }
    }

    pub fn key_for(&mut self, pattern: &str, scope: Option<&N>) -> CacheKey {
        CacheKey::new(pattern, self.id_for(scope))
    }

    /// Number of scope nodes with an assigned id.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Every scope node with its assigned id.
    pub fn assigned(&self) -> Vec<(N, u64)> {
        self.ids.iter().map(|(node, id)| (node.clone(), *id)).collect()
    }

    /// Forget the nodes holding any of `ids`. Returns how many were dropped.
    pub fn release(&mut self, ids: &BTreeSet<u64>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let before = self.ids.len();
        self.ids.retain(|_, id| !ids.contains(id));
        before - self.ids.len()
    }

    /// Forget every assignment. Numbering continues, so ids are never reused.
    pub fn clear(&mut self) {
        self.ids.clear();
    }
}
