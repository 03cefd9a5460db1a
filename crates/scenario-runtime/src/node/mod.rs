//! Shared node base
//!
//! Both graph models (blocks and components) are built from the same pieces:
//!
//! - [`NodeId`]: the stable identifier graph authors give every placed node
//! - [`BootGate`]: the boot-once state machine every node goes through
//! - [`ResultSlot`]: the last result value/error stored on a node
//! - [`VariableTable`]: the run-wide variable table nodes read and write
//! - [`RunContext`]: the per-run state (scope, results, events, teardown)

mod lifecycle;
mod result;
mod run;
mod variables;

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use ts_rs::TS;

pub use lifecycle::{BootError, BootGate, LifecycleState};
pub(crate) use lifecycle::drive_boot;
pub use result::{EvaluationError, ResultSlot, StoredResult};
pub use run::{RunContext, Teardown, DEFAULT_SCOPE};
pub use variables::{Variable, VariableTable};

/// Identifier of a node placed in a graph
///
/// Ids are opaque strings supplied by the graph author. An empty id is the
/// "falsy" id: it never resolves to a node and is skipped in exit lists.
#[derive(TS, Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[ts(export)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&NodeId> for NodeId {
    fn from(value: &NodeId) -> Self {
        value.clone()
    }
}

/// Deserialize a list of node ids leniently
///
/// Graph documents written by editors contain strings, numbers and nulls in
/// their exit lists. Numbers are stringified; `null`, `false` and `0` become
/// the empty id so they are dropped like any other falsy entry.
pub(crate) fn deserialize_id_list<'de, D>(deserializer: D) -> Result<Vec<NodeId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;

    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|entry| match entry {
            Value::String(id) => NodeId(id),
            Value::Number(n) if n.as_f64() == Some(0.0) => NodeId::default(),
            Value::Number(n) => NodeId(n.to_string()),
            Value::Null | Value::Bool(false) => NodeId::default(),
            other => NodeId(other.to_string()),
        })
        .collect())
}

/// Truthiness of a result value, used to pick the branch a block exits on
///
/// `null`, `false`, `0`, `NaN` and the empty string are falsy; everything else,
/// including empty arrays and objects, is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
