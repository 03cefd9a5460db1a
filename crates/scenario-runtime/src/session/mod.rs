//! Component-model run-context
//!
//! A [`Session`] owns one live instance of a component graph together with
//! its variables, event bus and memories. Components hold a weak reference
//! back to it. Signals enter the graph through [`Session::inject`] and then
//! travel along the connections the components declare.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::component::{ComponentData, ComponentNode, Memory, Signal, SignalError};
use crate::events::{EventBus, NoOpEventBus, RuntimeEvent};
use crate::graph::GraphIndex;
use crate::node::{BootError, NodeId, RunContext, VariableTable, DEFAULT_SCOPE};
use crate::persistence::MemoryResultStore;
use crate::registry::NodeRegistry;

/// Errors loading or driving a session
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Component {uid} has unknown type {type_name}")]
    UnknownComponentType { uid: NodeId, type_name: String },

    #[error("Session has no component {0}")]
    UnknownComponent(NodeId),

    #[error("Failed to parse session: {0}")]
    Parse(String),

    #[error("The session is closed")]
    Closed,

    #[error(transparent)]
    Signal(#[from] SignalError),
}

/// A component graph as it is stored by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDefinition {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub components: Vec<ComponentData>,
}

impl SessionDefinition {
    pub fn new(id: impl Into<String>, components: Vec<ComponentData>) -> Self {
        Self {
            id: id.into(),
            components,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        serde_json::from_str(json).map_err(|e| SessionError::Parse(e.to_string()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, SessionError> {
        serde_yaml::from_str(yaml).map_err(|e| SessionError::Parse(e.to_string()))
    }
}

/// Options for one session
#[derive(TypedBuilder)]
pub struct SessionOptions {
    #[builder(default = Arc::new(NoOpEventBus) as Arc<dyn EventBus>)]
    pub event_bus: Arc<dyn EventBus>,

    #[builder(default = Some(VariableTable::new()))]
    pub variables: Option<VariableTable>,

    /// Memory that outlives the session, shared with later sessions
    #[builder(default, setter(strip_option))]
    pub persistent_memory: Option<Memory>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One run of a component graph
pub struct Session {
    id: String,
    context: RunContext,
    graph: GraphIndex<ComponentNode>,
    session_memory: Memory,
    persistent_memory: Option<Memory>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("graph", &self.graph)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Instantiate every component of `definition`
    ///
    /// # Errors
    /// [`SessionError::UnknownComponentType`] for types the registry lacks
    pub fn load(
        definition: SessionDefinition,
        registry: &NodeRegistry,
        options: SessionOptions,
    ) -> Result<Arc<Self>, SessionError> {
        let mut prepared = Vec::with_capacity(definition.components.len());
        for data in definition.components {
            let component = registry.component(&data.type_name).ok_or_else(|| {
                SessionError::UnknownComponentType {
                    uid: data.uid.clone(),
                    type_name: data.type_name.clone(),
                }
            })?;
            prepared.push((component, data));
        }

        let context = RunContext::new(
            DEFAULT_SCOPE.to_string(),
            options.variables,
            Arc::new(MemoryResultStore::new()),
            options.event_bus,
        );
        tracing::debug!(
            "Loaded session {} with {} components as run {}",
            definition.id,
            prepared.len(),
            context.run_id()
        );

        Ok(Arc::new_cyclic(|session| {
            let nodes = prepared
                .into_iter()
                .map(|(component, data)| Arc::new(ComponentNode::new(component, data, session.clone())));

            Session {
                id: definition.id,
                context,
                graph: GraphIndex::new(nodes),
                session_memory: Memory::new(),
                persistent_memory: options.persistent_memory,
            }
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run_id(&self) -> Uuid {
        self.context.run_id()
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn graph(&self) -> &GraphIndex<ComponentNode> {
        &self.graph
    }

    pub fn get_component(&self, uid: &str) -> Option<Arc<ComponentNode>> {
        self.graph.get(uid)
    }

    pub fn session_memory(&self) -> &Memory {
        &self.session_memory
    }

    pub fn persistent_memory(&self) -> Option<&Memory> {
        self.persistent_memory.as_ref()
    }

    pub fn variables(&self) -> Option<&VariableTable> {
        self.context.variables()
    }

    pub fn is_closed(&self) -> bool {
        self.context.is_closed()
    }

    /// Boot every component concurrently
    ///
    /// Returns the components that failed, in document order.
    pub async fn start(&self) -> Vec<(NodeId, BootError)> {
        let mut booting = JoinSet::new();
        for component in self.graph.iter() {
            let component = Arc::clone(component);
            booting.spawn(async move {
                let result = component.start_boot().await;
                (component.uid().clone(), result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = booting.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((uid, Err(error))) => failures.push((uid, error)),
                Err(e) => tracing::error!("Boot task failed: {e}"),
            }
        }

        failures.sort_by_key(|(uid, _)| self.graph.position(uid.as_str()));
        failures
    }

    /// Deliver `signal` to input `anchor` of component `uid`
    ///
    /// # Errors
    /// Fails when the session is closed, the component does not exist or its
    /// handler fails
    pub async fn inject(&self, uid: &str, anchor: &str, signal: Signal) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let component = self
            .get_component(uid)
            .ok_or_else(|| SessionError::UnknownComponent(NodeId::from(uid)))?;

        component.input_signal(anchor, signal).await?;
        Ok(())
    }

    /// Tear the session down. Returns false if it was already closed.
    pub async fn close(&self) -> bool {
        if !self.context.teardown().close() {
            return false;
        }

        tracing::debug!("Closed session {}", self.id);
        let _ = self
            .context
            .event_bus()
            .emit(RuntimeEvent::RunClosed { run_id: self.run_id() })
            .await;
        true
    }
}
