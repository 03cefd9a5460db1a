//! Result persistence bridge
//!
//! Nodes hand every result they record to the run-context through the
//! [`ResultPersistence`] trait. Results are partitioned by scope name and
//! keyed by node id. A store may additionally hold a snapshot of the previous
//! run, which nodes consult to find out whether their value changed.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::node::{NodeId, StoredResult};

/// Errors reading or writing result snapshots
#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to (de)serialize result snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Trait the engine calls to persist and read back node results
pub trait ResultPersistence: Send + Sync {
    /// Store a node's latest result in `scope`
    fn persist(&self, scope: &str, node_id: &NodeId, result: StoredResult);

    /// The current stored result of a node in `scope`
    ///
    /// Creates an empty entry when the node has nothing stored yet.
    fn touch(&self, scope: &str, node_id: &NodeId) -> StoredResult;

    /// The node's result from the previous run
    ///
    /// Returns `None` only when the store holds no previous-run snapshot at
    /// all. When a snapshot exists but has nothing for this node, an empty
    /// result is returned instead.
    fn previous(&self, scope: &str, node_id: &NodeId) -> Option<StoredResult>;
}

/// Results of one run: `scope -> node id -> result`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSnapshot {
    scopes: BTreeMap<String, BTreeMap<NodeId, StoredResult>>,
}

impl ResultSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope: &str, node_id: &NodeId) -> Option<&StoredResult> {
        self.scopes.get(scope).and_then(|values| values.get(node_id))
    }

    pub fn insert(&mut self, scope: &str, node_id: NodeId, result: StoredResult) {
        self.scopes
            .entry(scope.to_string())
            .or_default()
            .insert(node_id, result);
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.values().all(BTreeMap::is_empty)
    }

    /// Fold a newer snapshot into this one
    ///
    /// Every scope present in `newer` replaces the scope of the same name;
    /// other scopes are kept.
    pub fn merge(&mut self, newer: ResultSnapshot) {
        self.scopes.extend(newer.scopes);
    }

    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    current: ResultSnapshot,
    previous: Option<ResultSnapshot>,
}

/// In-memory result store
///
/// Keeps the results of the current run and, optionally, the snapshot of the
/// previous one. Hosts that want memoization across process restarts write
/// [`MemoryResultStore::snapshot`] out after a run and feed it back through
/// [`MemoryResultStore::with_previous`].
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    state: RwLock<StoreState>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose previous-run snapshot is `previous`
    pub fn with_previous(previous: ResultSnapshot) -> Self {
        Self {
            state: RwLock::new(StoreState {
                current: ResultSnapshot::new(),
                previous: Some(previous),
            }),
        }
    }

    /// Results recorded so far in the current run
    pub fn snapshot(&self) -> ResultSnapshot {
        self.read(|state| state.current.clone())
    }

    pub fn previous_snapshot(&self) -> Option<ResultSnapshot> {
        self.read(|state| state.previous.clone())
    }

    /// Start a new run: the current results become the previous-run snapshot
    pub fn rotate(&self) {
        self.write(|state| {
            let current = std::mem::take(&mut state.current);
            state.previous = Some(current);
        });
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        let state = self
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }
}

impl ResultPersistence for MemoryResultStore {
    fn persist(&self, scope: &str, node_id: &NodeId, result: StoredResult) {
        tracing::trace!("Persisting result of node {node_id} in scope {scope}");
        self.write(|state| state.current.insert(scope, node_id.clone(), result));
    }

    fn touch(&self, scope: &str, node_id: &NodeId) -> StoredResult {
        self.write(|state| {
            state
                .current
                .scopes
                .entry(scope.to_string())
                .or_default()
                .entry(node_id.clone())
                .or_default()
                .clone()
        })
    }

    fn previous(&self, scope: &str, node_id: &NodeId) -> Option<StoredResult> {
        self.read(|state| {
            state
                .previous
                .as_ref()
                .map(|previous| previous.get(scope, node_id).cloned().unwrap_or_default())
        })
    }
}
