//! In-memory node tree.
//!
//! Nodes carry a list of labels (`"#player"`, `".comment"`, `"ytd-app"`); a
//! pattern matches a node when it equals one of its labels. Every structural
//! change is delivered synchronously to observers as a one-item batch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use warden_core::{HostError, MutationBatch, MutationCallback, NodeTree, Observer, QueryError};

/// Handle to a node in a [`MemoryTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(pub u64);

/// The root node of every tree.
pub const ROOT: NodeRef = NodeRef(0);

#[derive(Debug)]
struct NodeData {
    parent: Option<NodeRef>,
    children: Vec<NodeRef>,
    labels: Vec<String>,
}

#[derive(Debug)]
struct TreeState {
    nodes: BTreeMap<NodeRef, NodeData>,
    next_id: u64,
}

struct ObserverSlot {
    id: u64,
    callback: MutationCallback,
}

#[derive(Default)]
struct Observers {
    slots: Mutex<Vec<ObserverSlot>>,
    next_id: AtomicUsize,
}

/// A mutable tree with query counting and synchronous mutation delivery.
pub struct MemoryTree {
    state: Mutex<TreeState>,
    observers: Arc<Observers>,
    queries: AtomicUsize,
    observe_calls: AtomicUsize,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            ROOT,
            NodeData {
                parent: None,
                children: Vec::new(),
                labels: vec![":root".to_string()],
            },
        );
        Self {
            state: Mutex::new(TreeState { nodes, next_id: 1 }),
            observers: Arc::new(Observers::default()),
            queries: AtomicUsize::new(0),
            observe_calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a new node with `labels` under the root.
    pub fn append(&self, labels: &[&str]) -> NodeRef {
        self.insert(ROOT, labels)
    }

    /// Attach a new node with `labels` under `parent`.
    pub fn insert(&self, parent: NodeRef, labels: &[&str]) -> NodeRef {
        let node = {
            let mut state = self.state();
            let node = NodeRef(state.next_id);
            state.next_id += 1;
            state.nodes.insert(
                node,
                NodeData {
                    parent: Some(parent),
                    children: Vec::new(),
                    labels: labels.iter().map(|l| l.to_string()).collect(),
                },
            );
            if let Some(p) = state.nodes.get_mut(&parent) {
                p.children.push(node);
            }
            node
        };
        self.notify(MutationBatch {
            added: 1,
            ..Default::default()
        });
        node
    }

    /// Remove `node` (and its subtree) from its parent.
    pub fn detach(&self, node: NodeRef) {
        let removed = {
            let mut state = self.state();
            let parent = state.nodes.get_mut(&node).and_then(|n| n.parent.take());
            match parent {
                Some(parent) => {
                    if let Some(p) = state.nodes.get_mut(&parent) {
                        p.children.retain(|c| *c != node);
                    }
                    true
                }
                None => false,
            }
        };
        if removed {
            self.notify(MutationBatch {
                removed: 1,
                ..Default::default()
            });
        }
    }

    /// Replace the labels of `node`.
    pub fn relabel(&self, node: NodeRef, labels: &[&str]) {
        {
            let mut state = self.state();
            if let Some(n) = state.nodes.get_mut(&node) {
                n.labels = labels.iter().map(|l| l.to_string()).collect();
            }
        }
        self.notify(MutationBatch {
            attributes: 1,
            ..Default::default()
        });
    }

    /// Tree queries served so far (`query` and `query_all`).
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn reset_query_count(&self) {
        self.queries.store(0, Ordering::SeqCst);
    }

    /// Observers currently connected.
    pub fn observer_count(&self) -> usize {
        self.observers
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Number of times `observe` was called.
    pub fn observe_calls(&self) -> usize {
        self.observe_calls.load(Ordering::SeqCst)
    }

    fn notify(&self, batch: MutationBatch) {
        let callbacks: Vec<MutationCallback> = self
            .observers
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|slot| Arc::clone(&slot.callback))
            .collect();
        for callback in callbacks {
            callback(&batch);
        }
    }

    fn validate(pattern: &str) -> Result<(), QueryError> {
        if pattern.trim().is_empty() {
            return Err(QueryError::invalid_pattern(pattern, "empty pattern"));
        }
        let mut depth = 0i32;
        for c in pattern.chars() {
            match c {
                '[' => depth += 1,
                ']' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Err(QueryError::invalid_pattern(pattern, "unexpected ']'"));
            }
        }
        if depth != 0 {
            return Err(QueryError::invalid_pattern(pattern, "unterminated '['"));
        }
        Ok(())
    }

    /// Descendants of `scope` in depth-first tree order, scope excluded.
    fn descendants(state: &TreeState, scope: NodeRef) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeRef> = state
            .nodes
            .get(&scope)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(node) = stack.pop() {
            out.push(node);
            if let Some(data) = state.nodes.get(&node) {
                stack.extend(data.children.iter().rev().copied());
            }
        }
        out
    }

    fn matches(state: &TreeState, node: NodeRef, pattern: &str) -> bool {
        state
            .nodes
            .get(&node)
            .map(|n| n.labels.iter().any(|l| l == pattern))
            .unwrap_or(false)
    }
}

impl NodeTree for MemoryTree {
    type Node = NodeRef;

    fn query(&self, pattern: &str, scope: Option<&NodeRef>) -> Result<Option<NodeRef>, QueryError> {
        Self::validate(pattern)?;
        self.queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        let scope = scope.copied().unwrap_or(ROOT);
        Ok(Self::descendants(&state, scope)
            .into_iter()
            .find(|n| Self::matches(&state, *n, pattern)))
    }

    fn query_all(&self, pattern: &str, scope: Option<&NodeRef>) -> Result<Vec<NodeRef>, QueryError> {
        Self::validate(pattern)?;
        self.queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        let scope = scope.copied().unwrap_or(ROOT);
        Ok(Self::descendants(&state, scope)
            .into_iter()
            .filter(|n| Self::matches(&state, *n, pattern))
            .collect())
    }

    fn is_attached(&self, node: &NodeRef) -> bool {
        let state = self.state();
        let mut current = *node;
        loop {
            if current == ROOT {
                return true;
            }
            match state.nodes.get(&current).and_then(|n| n.parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    fn observe(&self, callback: MutationCallback) -> Box<dyn Observer> {
        self.observe_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.observers.next_id.fetch_add(1, Ordering::SeqCst) as u64;
        self.observers
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ObserverSlot { id, callback });
        Box::new(MemoryObserver {
            id,
            observers: Arc::clone(&self.observers),
            connected: AtomicBool::new(true),
        })
    }
}

/// Subscription handed out by [`MemoryTree::observe`].
///
/// A second `disconnect` fails, mirroring hosts that reject disconnecting a
/// dead subscription.
pub struct MemoryObserver {
    id: u64,
    observers: Arc<Observers>,
    connected: AtomicBool,
}

impl Observer for MemoryObserver {
    fn disconnect(&mut self) -> Result<(), HostError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(HostError::ObserverDisconnect {
                reason: "already disconnected".to_string(),
            });
        }
        self.observers
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|slot| slot.id != self.id);
        Ok(())
    }
}
