use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::node::NodeId;

/// A typed value routed between component anchors
///
/// Every delivery gets its own copy, forked from the one that was sent, so
/// receivers never share signal state.
#[derive(TS, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[ts(export)]
pub struct Signal {
    pub id: Uuid,

    #[serde(rename = "type")]
    pub signal_type: String,

    pub value: Value,

    /// The component that sent this copy
    pub source: Option<NodeId>,

    /// The output anchor it was sent from
    pub source_anchor: Option<String>,
}

impl Signal {
    pub fn new(signal_type: impl Into<String>, value: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            signal_type: signal_type.into(),
            value,
            source: None,
            source_anchor: None,
        }
    }

    /// A copy with a fresh identity, sent by `source` from `anchor`
    pub fn fork(&self, source: &NodeId, anchor: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            signal_type: self.signal_type.clone(),
            value: self.value.clone(),
            source: Some(source.clone()),
            source_anchor: Some(anchor.to_string()),
        }
    }
}
