use std::sync::{Arc, Weak};

use serde_json::{Map, Value};

use crate::component::{ComponentData, ComponentDefinition, Connection, Memory, Signal};
use crate::events::RuntimeEvent;
use crate::graph::GraphNode;
use crate::node::{drive_boot, BootError, BootGate, LifecycleState, NodeId};
use crate::session::Session;

/// Errors delivering a signal
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("Input {anchor} of component {component} failed: {message}")]
    Handler {
        component: NodeId,
        anchor: String,
        message: String,
    },
}

/// A component placed in a session, bound to one run
///
/// Also the signal router: [`ComponentNode::output_signal`] forwards a signal
/// along every connection of an output anchor, and
/// [`ComponentNode::input_signal`] runs the receiving handler.
///
/// There is no cycle detection. A graph whose connections loop back to a
/// component keeps routing for as long as its handlers keep emitting.
pub struct ComponentNode {
    uid: NodeId,
    definition: Arc<ComponentDefinition>,
    data: ComponentData,
    session: Weak<Session>,
    gate: BootGate,
}

impl std::fmt::Debug for ComponentNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentNode")
            .field("uid", &self.uid)
            .field("type", &self.definition.type_name())
            .field("state", &self.gate.state())
            .finish()
    }
}

impl GraphNode for ComponentNode {
    fn node_id(&self) -> &NodeId {
        &self.uid
    }

    fn exit_ids(&self) -> Vec<NodeId> {
        self.data
            .connections
            .outputs
            .iter()
            .map(|connection| connection.target.node_uid.clone())
            .collect()
    }
}

impl ComponentNode {
    pub(crate) fn new(definition: Arc<ComponentDefinition>, data: ComponentData, session: Weak<Session>) -> Self {
        Self {
            uid: data.uid.clone(),
            definition,
            data,
            session,
            gate: BootGate::new(),
        }
    }

    pub fn uid(&self) -> &NodeId {
        &self.uid
    }

    pub fn definition(&self) -> &ComponentDefinition {
        &self.definition
    }

    pub fn data(&self) -> &ComponentData {
        &self.data
    }

    pub fn settings(&self) -> &Map<String, Value> {
        &self.data.settings
    }

    /// The owning session, if it is still alive
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.upgrade()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.gate.state()
    }

    /// Boot the component, at most once per run
    ///
    /// # Errors
    /// Returns the [`BootError`] that kept the component from booting
    pub async fn start_boot(self: &Arc<Self>) -> Result<(), BootError> {
        let Some(session) = self.session() else {
            return Err(BootError::RunClosed);
        };

        let event_bus = Arc::clone(session.context().event_bus());
        let run_id = session.context().run_id();
        drop(session);

        let node = Arc::clone(self);
        let hook = async move {
            let Some(boot) = node.definition.boot_hook().cloned() else {
                return Ok(());
            };

            match tokio::spawn(async move { boot.boot(node).await }).await {
                Ok(result) => result,
                Err(e) => Err(BootError::Panicked(e.to_string())),
            }
        };

        drive_boot(&self.gate, event_bus.as_ref(), &self.uid, run_id, hook).await
    }

    /// A new signal with this component as its source
    pub fn create_signal(&self, signal_type: impl Into<String>, value: Value) -> Signal {
        let mut signal = Signal::new(signal_type, value);
        signal.source = Some(self.uid.clone());
        signal
    }

    /// Send `signal` along every connection leaving output `anchor`
    ///
    /// Connections are followed in declaration order. Each target receives its
    /// own fork of the signal. Targets that no longer exist are skipped and
    /// handler failures are logged; neither stops the remaining deliveries.
    /// Returns the number of targets the signal was handed to.
    pub async fn output_signal(&self, anchor: &str, signal: Signal) -> usize {
        let Some(session) = self.session() else {
            tracing::debug!("Component {} has no session, dropping signal", self.uid);
            return 0;
        };

        if session.is_closed() {
            tracing::trace!("Session closed, component {} not routing", self.uid);
            return 0;
        }

        let mut delivered = 0;

        for connection in self.output_connections() {
            if connection.source.anchor_name != anchor {
                continue;
            }

            let target_uid = &connection.target.node_uid;
            let Some(target) = session.get_component(target_uid.as_str()) else {
                tracing::debug!("Connection from {}:{anchor} points at missing component {target_uid}", self.uid);
                continue;
            };

            let forked = signal.fork(&self.uid, anchor);
            let target_anchor = connection.target.anchor_name.as_str();

            let dispatched = session
                .context()
                .event_bus()
                .emit(RuntimeEvent::SignalDispatched {
                    source: self.uid.clone(),
                    source_anchor: anchor.to_string(),
                    target: target_uid.clone(),
                    target_anchor: target_anchor.to_string(),
                })
                .await;
            if let Err(e) = dispatched {
                tracing::warn!("Failed to report signal {}:{anchor} -> {target_uid}:{target_anchor}: {e}", self.uid);
            }

            delivered += 1;
            if let Err(e) = target.input_signal(target_anchor, forked).await {
                tracing::error!("{e}");
            }
        }

        delivered
    }

    /// Run the handler of input `anchor` with `signal`
    ///
    /// A signal for an anchor without a handler is dropped; that is not an
    /// error.
    ///
    /// # Errors
    /// [`SignalError::Handler`] when the handler fails
    pub async fn input_signal(self: &Arc<Self>, anchor: &str, signal: Signal) -> Result<(), SignalError> {
        let Some(input) = self.definition.anchors().input(anchor) else {
            tracing::trace!("Component {} has no input {anchor}, dropping signal", self.uid);
            if let Some(session) = self.session() {
                let dropped = session
                    .context()
                    .event_bus()
                    .emit(RuntimeEvent::SignalDropped {
                        target: self.uid.clone(),
                        anchor: anchor.to_string(),
                    })
                    .await;
                if let Err(e) = dropped {
                    tracing::warn!("Failed to report dropped signal on {}:{anchor}: {e}", self.uid);
                }
            }
            return Ok(());
        };

        let handler = Arc::clone(input.handler());
        handler
            .handle(Arc::clone(self), signal)
            .await
            .map_err(|e| SignalError::Handler {
                component: self.uid.clone(),
                anchor: anchor.to_string(),
                message: e.to_string(),
            })
    }

    pub fn input_connections(&self) -> &[Connection] {
        &self.data.connections.inputs
    }

    pub fn output_connections(&self) -> &[Connection] {
        &self.data.connections.outputs
    }

    /// This component's memory
    ///
    /// Lives in the session's persistent memory when it has one, otherwise in
    /// the session memory.
    pub fn memory(&self) -> Option<Memory> {
        let session = self.session()?;
        let memory = match session.persistent_memory() {
            Some(persistent) => persistent.sub_memory(self.uid.as_str()),
            None => session.session_memory().sub_memory(self.uid.as_str()),
        };
        Some(memory)
    }

    /// This component's memory for the current session only
    pub fn session_memory(&self) -> Option<Memory> {
        let session = self.session()?;
        Some(session.session_memory().sub_memory(self.uid.as_str()))
    }

    /// Read a run variable. `None` when unset or when there is no session.
    pub fn get(&self, name: &str) -> Option<Value> {
        let session = self.session()?;
        session.context().variables()?.get(name)
    }

    /// Write a run variable. Returns false when there is no variable table.
    pub fn set(&self, name: &str, value: Value, var_type: Option<&str>) -> bool {
        let Some(session) = self.session() else {
            return false;
        };

        match session.context().variables() {
            Some(variables) => {
                variables.set(name, value, var_type.map(str::to_string));
                true
            }
            None => false,
        }
    }
}
