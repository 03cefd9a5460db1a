//! Block model: true/false branching flow nodes
//!
//! A block type is described once by a [`BlockDefinition`] and registered with
//! the [`NodeRegistry`](crate::registry::NodeRegistry). Every block placed in a
//! scenario becomes a [`BlockNode`] bound to that scenario run. The node owns
//! the generic lifecycle (boot once, evaluate once per trigger, store and
//! persist results) and delegates the type-specific parts to a
//! [`BlockBehavior`].
//!
//! Each [`BlockBehavior`] gets a [`Responder`] per evaluation. Completing it
//! records the result and hands it to whoever started the evaluation. A
//! [`Command`] lets a block record a silent value without its exits being
//! followed.

pub(crate) mod builtin;
mod definition;
mod node;
mod responder;

use async_trait::async_trait;
use downcast_rs::{impl_downcast, DowncastSync};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use definition::{BlockDefinition, BlockDefinitionBuilder, BlockFactory};
pub use node::BlockNode;
pub use responder::{Command, Responder};

use crate::node::{deserialize_id_list, BootError, EvaluationError, NodeId};

/// A block as it is stored in a scenario document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockData {
    pub id: NodeId,

    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub settings: Map<String, Value>,

    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub out_on_true: Vec<NodeId>,

    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub out_on_false: Vec<NodeId>,
}

impl BlockData {
    pub fn new(id: impl Into<NodeId>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
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

    pub fn on_true<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.out_on_true = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_false<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.out_on_false = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// Trait for building a block behavior from the settings an author gave it
pub trait FromSettings: Sized {
    /// # Errors
    /// Returns an error string if the settings cannot be used by this block type
    fn from_settings(settings: &Map<String, Value>) -> Result<Self, String>;
}

/// Type-specific hooks of a block
///
/// The node calls these; implementations never drive the lifecycle
/// themselves. Returning an error from [`BlockBehavior::evaluate`] is
/// equivalent to failing the responder.
#[async_trait]
pub trait BlockBehavior: DowncastSync {
    /// Prepare the block; runs at most once per run, before any evaluation
    async fn boot(&self, _node: &BlockNode) -> Result<(), BootError> {
        Ok(())
    }

    /// Evaluate the block
    ///
    /// # Arguments
    /// * `node` - The block instance being evaluated
    /// * `from` - The block that triggered this evaluation, if any
    /// * `responder` - Completes the evaluation, at most once
    async fn evaluate(
        &self,
        node: &BlockNode,
        from: Option<&NodeId>,
        responder: Responder,
    ) -> Result<(), EvaluationError>;

    /// Description shown in the scenario editor
    async fn description(&self, node: &BlockNode) -> String {
        node.definition().title().to_string()
    }
}

impl_downcast!(sync BlockBehavior);
