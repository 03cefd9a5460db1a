//! Component model: nodes connected through named signal anchors
//!
//! A component type is a [`ComponentDefinition`]: its anchors (built once,
//! in an [`AnchorRegistry`]), categories, configuration schema and an
//! optional boot hook. Components placed in a [`Session`](crate::session::Session)
//! become [`ComponentNode`]s, which route [`Signal`]s from their output
//! anchors to the input anchors of connected components.

mod anchors;
pub(crate) mod builtin;
mod definition;
mod memory;
mod node;
mod signal;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use anchors::{AnchorOptions, AnchorRegistry, AnchorSpec, HandlerResult, InputAnchor, InputHandler};
pub use builtin::{LogComponent, RelayComponent};
pub use definition::{ComponentBoot, ComponentDefinition, ComponentDefinitionBuilder};
pub use memory::Memory;
pub use node::{ComponentNode, SignalError};
pub use signal::Signal;

use crate::node::NodeId;

/// One end of a connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchorRef {
    pub node_uid: NodeId,
    pub anchor_name: String,
}

impl AnchorRef {
    pub fn new(node_uid: impl Into<NodeId>, anchor_name: impl Into<String>) -> Self {
        Self {
            node_uid: node_uid.into(),
            anchor_name: anchor_name.into(),
        }
    }
}

/// An edge from an output anchor to an input anchor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub source: AnchorRef,
    pub target: AnchorRef,
}

impl Connection {
    pub fn new(source: AnchorRef, target: AnchorRef) -> Self {
        Self { source, target }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connections {
    #[serde(default, rename = "in")]
    pub inputs: Vec<Connection>,

    #[serde(default, rename = "out")]
    pub outputs: Vec<Connection>,
}

/// A component as it is stored in a session document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentData {
    pub uid: NodeId,

    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub settings: Map<String, Value>,

    #[serde(default)]
    pub connections: Connections,
}

impl ComponentData {
    pub fn new(uid: impl Into<NodeId>, type_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        if let Value::Object(settings) = settings {
            self.settings = settings;
        }
        self
    }

    /// Connect output `anchor` to `target_anchor` of component `target`
    pub fn connect(mut self, anchor: &str, target: &str, target_anchor: &str) -> Self {
        let source = AnchorRef::new(self.uid.clone(), anchor);
        self.connections
            .outputs
            .push(Connection::new(source, AnchorRef::new(target, target_anchor)));
        self
    }
}
