use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use uuid::Uuid;

use crate::events::{EventBus, NoOpEventBus};
use crate::node::VariableTable;
use crate::persistence::{MemoryResultStore, ResultPersistence};

/// Scope used when a run-context is not given one
pub const DEFAULT_SCOPE: &str = "default";

/// Teardown signal of a run
///
/// Once closed, waiting evaluations are dropped and callbacks that arrive
/// late become no-ops.
#[derive(Debug, Clone)]
pub struct Teardown {
    closed: Arc<watch::Sender<bool>>,
}

impl Default for Teardown {
    fn default() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            closed: Arc::new(closed),
        }
    }
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the run. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        self.closed.send_if_modified(|closed| !std::mem::replace(closed, true))
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the run is closed
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// State shared by every node of one run
///
/// Owned by the scenario or session; nodes reach it through a weak reference
/// to their owner and must tolerate it being gone.
pub struct RunContext {
    run_id: Uuid,
    scope: RwLock<String>,
    variables: Option<VariableTable>,
    results: Arc<dyn ResultPersistence>,
    event_bus: Arc<dyn EventBus>,
    teardown: Teardown,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("scope", &self.scope())
            .field("closed", &self.teardown.is_closed())
            .finish()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(
            DEFAULT_SCOPE.to_string(),
            Some(VariableTable::new()),
            Arc::new(MemoryResultStore::new()),
            Arc::new(NoOpEventBus),
        )
    }
}

impl RunContext {
    pub fn new(
        scope: String,
        variables: Option<VariableTable>,
        results: Arc<dyn ResultPersistence>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scope: RwLock::new(scope),
            variables,
            results,
            event_bus,
            teardown: Teardown::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The active scope results are stored under
    pub fn scope(&self) -> String {
        self.scope
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_scope(&self, scope: impl Into<String>) {
        *self
            .scope
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = scope.into();
    }

    pub fn variables(&self) -> Option<&VariableTable> {
        self.variables.as_ref()
    }

    pub fn results(&self) -> &Arc<dyn ResultPersistence> {
        &self.results
    }

    pub fn event_bus(&self) -> &Arc<dyn EventBus> {
        &self.event_bus
    }

    pub fn teardown(&self) -> &Teardown {
        &self.teardown
    }

    pub fn is_closed(&self) -> bool {
        self.teardown.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_teardown_closes_once() {
        let teardown = Teardown::new();
        assert!(!teardown.is_closed());

        assert!(teardown.close());
        assert!(!teardown.close());
        assert!(teardown.is_closed());

        // Already closed: resolves immediately
        tokio::time::timeout(Duration::from_secs(1), teardown.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_teardown_wakes_waiters() {
        let teardown = Teardown::new();
        let waiter = {
            let teardown = teardown.clone();
            tokio::spawn(async move { teardown.closed().await })
        };

        tokio::task::yield_now().await;
        teardown.close();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_scope_can_change() {
        let context = RunContext::default();
        assert_eq!(context.scope(), DEFAULT_SCOPE);

        context.set_scope("retry-1");
        assert_eq!(context.scope(), "retry-1");
    }
}
