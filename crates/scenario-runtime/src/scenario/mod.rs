//! Block-model run-context
//!
//! A [`Scenario`] owns one live instance of a block graph: the block nodes,
//! the shared variable table, the result store and the event bus of a single
//! run. Blocks hold a weak reference back to it.
//!
//! Scenarios are loaded from a [`ScenarioDefinition`] (JSON or YAML) against
//! a [`NodeRegistry`]. [`Scenario::run`] drives the graph from its entrance
//! points; hosts with their own scheduling can instead boot blocks and start
//! evaluations themselves.

mod runner;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

pub use runner::{NodeFailure, RunReport};

use crate::block::{BlockData, BlockNode};
use crate::events::{EventBus, NoOpEventBus, RuntimeEvent};
use crate::graph::GraphIndex;
use crate::node::{NodeId, RunContext, VariableTable, DEFAULT_SCOPE};
use crate::persistence::{MemoryResultStore, ResultPersistence};
use crate::registry::NodeRegistry;

/// Errors loading a scenario
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("Block {id} has unknown type {type_name}")]
    UnknownBlockType { id: NodeId, type_name: String },

    #[error("Invalid block definition: {0}")]
    Definition(String),

    #[error("Failed to parse scenario: {0}")]
    Parse(String),
}

/// A scenario as it is stored by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default)]
    pub blocks: Vec<BlockData>,
}

impl ScenarioDefinition {
    pub fn new(id: impl Into<String>, blocks: Vec<BlockData>) -> Self {
        Self {
            id: id.into(),
            title: None,
            blocks,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        serde_json::from_str(json).map_err(|e| ScenarioError::Parse(e.to_string()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ScenarioError> {
        serde_yaml::from_str(yaml).map_err(|e| ScenarioError::Parse(e.to_string()))
    }
}

/// Options for one scenario run
#[derive(TypedBuilder)]
pub struct RunOptions {
    /// Scope results are stored under
    #[builder(default = DEFAULT_SCOPE.to_string(), setter(into))]
    pub scope: String,

    #[builder(default = Arc::new(NoOpEventBus) as Arc<dyn EventBus>)]
    pub event_bus: Arc<dyn EventBus>,

    #[builder(default = Arc::new(MemoryResultStore::new()) as Arc<dyn ResultPersistence>)]
    pub results: Arc<dyn ResultPersistence>,

    /// Run variables; `None` runs without a variable table
    #[builder(default = Some(VariableTable::new()))]
    pub variables: Option<VariableTable>,

    /// Close the run on the first evaluation error
    #[builder(default = false)]
    pub halt_on_error: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One run of a block graph
pub struct Scenario {
    id: String,
    title: Option<String>,
    context: RunContext,
    graph: GraphIndex<BlockNode>,
    halt_on_error: bool,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("graph", &self.graph)
            .finish()
    }
}

impl Scenario {
    /// Instantiate every block of `definition`
    ///
    /// # Errors
    /// Fails when a block has a type the registry does not know or settings
    /// its type rejects.
    pub fn load(
        definition: ScenarioDefinition,
        registry: &NodeRegistry,
        options: RunOptions,
    ) -> Result<Arc<Self>, ScenarioError> {
        let mut prepared = Vec::with_capacity(definition.blocks.len());

        for data in definition.blocks {
            let block_definition = registry.block(&data.type_name).ok_or_else(|| {
                ScenarioError::UnknownBlockType {
                    id: data.id.clone(),
                    type_name: data.type_name.clone(),
                }
            })?;

            let behavior = block_definition
                .create_behavior(&data)
                .map_err(|message| ScenarioError::Definition(format!("block {}: {message}", data.id)))?;

            prepared.push((block_definition, data, behavior));
        }

        let context = RunContext::new(options.scope, options.variables, options.results, options.event_bus);
        tracing::debug!(
            "Loaded scenario {} with {} blocks as run {}",
            definition.id,
            prepared.len(),
            context.run_id()
        );

        Ok(Arc::new_cyclic(|scenario| {
            let nodes = prepared
                .into_iter()
                .map(|(block_definition, data, behavior)| {
                    Arc::new(BlockNode::new(block_definition, data, behavior, scenario.clone()))
                });

            Scenario {
                id: definition.id,
                title: definition.title,
                context,
                graph: GraphIndex::new(nodes),
                halt_on_error: options.halt_on_error,
            }
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn run_id(&self) -> Uuid {
        self.context.run_id()
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// All blocks of the run, by id, in document order
    pub fn graph(&self) -> &GraphIndex<BlockNode> {
        &self.graph
    }

    pub fn get_block(&self, id: &str) -> Option<Arc<BlockNode>> {
        self.graph.get(id)
    }

    /// Blocks a run starts from
    pub fn entrance_blocks(&self) -> Vec<Arc<BlockNode>> {
        self.graph
            .iter()
            .filter(|block| block.definition().entrance_point())
            .cloned()
            .collect()
    }

    pub fn scope(&self) -> String {
        self.context.scope()
    }

    pub fn set_scope(&self, scope: impl Into<String>) {
        self.context.set_scope(scope);
    }

    pub fn variables(&self) -> Option<&VariableTable> {
        self.context.variables()
    }

    pub fn halt_on_error(&self) -> bool {
        self.halt_on_error
    }

    pub fn is_closed(&self) -> bool {
        self.context.is_closed()
    }

    /// Tear the run down
    ///
    /// Evaluations still waiting on boot are dropped, and callbacks that
    /// arrive later are ignored. Returns false if the run was already closed.
    pub async fn close(&self) -> bool {
        if !self.context.teardown().close() {
            return false;
        }

        tracing::debug!("Closed scenario run {}", self.run_id());
        let _ = self
            .context
            .event_bus()
            .emit(RuntimeEvent::RunClosed { run_id: self.run_id() })
            .await;
        true
    }
}
