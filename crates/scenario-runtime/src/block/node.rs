use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use crate::block::responder::Response;
use crate::block::{BlockBehavior, BlockData, BlockDefinition, Command, Responder};
use crate::events::RuntimeEvent;
use crate::graph::GraphNode;
use crate::node::{
    drive_boot, BootError, BootGate, EvaluationError, LifecycleState, NodeId, ResultSlot,
    StoredResult,
};
use crate::scenario::Scenario;

/// A block placed in a scenario, bound to one run
pub struct BlockNode {
    id: NodeId,
    definition: Arc<BlockDefinition>,
    data: BlockData,
    behavior: Arc<dyn BlockBehavior>,
    scenario: Weak<Scenario>,
    gate: BootGate,
    evaluation_count: AtomicU64,
    seen: Mutex<Vec<Option<NodeId>>>,
    result: Mutex<ResultSlot>,
    evaluated: AtomicBool,
    entrance_ids: OnceLock<Arc<[NodeId]>>,
    entrance_blocks: OnceLock<Vec<Weak<BlockNode>>>,
}

impl std::fmt::Debug for BlockNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockNode")
            .field("id", &self.id)
            .field("type", &self.definition.type_name())
            .field("state", &self.gate.state())
            .field("evaluation_count", &self.evaluation_count())
            .finish()
    }
}

impl GraphNode for BlockNode {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn exit_ids(&self) -> Vec<NodeId> {
        self.data
            .out_on_true
            .iter()
            .chain(self.data.out_on_false.iter())
            .cloned()
            .collect()
    }
}

impl BlockNode {
    pub(crate) fn new(
        definition: Arc<BlockDefinition>,
        data: BlockData,
        behavior: Arc<dyn BlockBehavior>,
        scenario: Weak<Scenario>,
    ) -> Self {
        Self {
            id: data.id.clone(),
            definition,
            data,
            behavior,
            scenario,
            gate: BootGate::new(),
            evaluation_count: AtomicU64::new(0),
            seen: Mutex::new(Vec::new()),
            result: Mutex::new(ResultSlot::default()),
            evaluated: AtomicBool::new(false),
            entrance_ids: OnceLock::new(),
            entrance_blocks: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn definition(&self) -> &BlockDefinition {
        &self.definition
    }

    pub fn data(&self) -> &BlockData {
        &self.data
    }

    pub fn settings(&self) -> &Map<String, Value> {
        &self.data.settings
    }

    pub fn behavior(&self) -> &Arc<dyn BlockBehavior> {
        &self.behavior
    }

    /// The behavior as its concrete type
    pub fn behavior_as<T: BlockBehavior>(&self) -> Option<&T> {
        self.behavior.downcast_ref::<T>()
    }

    /// The owning scenario, if it is still alive
    pub fn scenario(&self) -> Option<Arc<Scenario>> {
        self.scenario.upgrade()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.gate.state()
    }

    pub fn evaluation_count(&self) -> u64 {
        self.evaluation_count.load(Ordering::SeqCst)
    }

    /// Every block that triggered an evaluation, in call order
    ///
    /// Not de-duplicated. `None` marks evaluations started by the run itself.
    pub fn seen_blocks(&self) -> Vec<Option<NodeId>> {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn result_slot(&self) -> ResultSlot {
        self.result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether an evaluation of this block completed in this run
    pub fn has_evaluated(&self) -> bool {
        self.evaluated.load(Ordering::SeqCst)
    }

    /// Boot the block
    ///
    /// Only the first call runs the boot sequence; every caller, including
    /// concurrent ones, receives its outcome.
    ///
    /// # Errors
    /// Returns the [`BootError`] that kept the block from booting
    pub async fn start_boot(self: &Arc<Self>) -> Result<(), BootError> {
        let Some(scenario) = self.scenario() else {
            return Err(BootError::RunClosed);
        };

        if scenario.context().is_closed() && self.gate.state() == LifecycleState::Created {
            return Err(BootError::RunClosed);
        }

        let event_bus = Arc::clone(scenario.context().event_bus());
        let run_id = scenario.context().run_id();
        drop(scenario);

        let node = Arc::clone(self);
        let hook = async move {
            // Run the hook in its own task so a panic only fails this block
            let booting = tokio::spawn(async move { node.behavior.boot(&node).await });
            match booting.await {
                Ok(result) => result,
                Err(e) => Err(BootError::Panicked(e.to_string())),
            }
        };

        drive_boot(&self.gate, event_bus.as_ref(), &self.id, run_id, hook).await
    }

    /// Start an evaluation of this block
    ///
    /// `from` is recorded straight away. The evaluation itself waits until
    /// the block has booted; it never starts booting by itself. Once booted,
    /// the behavior's `evaluate` hook runs. On completion the result is stored
    /// and persisted before `callback` fires. `command_callback` receives the
    /// first command the hook sends, if any. Each callback fires at most once,
    /// but every completion and every silent value the hook sends is stored,
    /// so the block keeps the last one.
    ///
    /// If the block fails to boot or the run is closed first, neither callback
    /// fires.
    pub fn start_evaluation<F, C>(self: &Arc<Self>, from: Option<NodeId>, callback: F, command_callback: C)
    where
        F: FnOnce(Result<Value, EvaluationError>) + Send + 'static,
        C: FnOnce(Command) + Send + 'static,
    {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(from.clone());

        let node = Arc::clone(self);
        tokio::spawn(async move {
            node.run_evaluation(from, callback, command_callback).await;
        });
    }

    /// Evaluate and wait for the result
    ///
    /// Returns `None` when the evaluation never completes: the block failed to
    /// boot, the run was closed, or the hook dropped its responder.
    pub async fn evaluate(self: &Arc<Self>, from: Option<NodeId>) -> Option<Result<Value, EvaluationError>> {
        let (tx, rx) = oneshot::channel();
        self.start_evaluation(
            from,
            move |result| {
                let _ = tx.send(result);
            },
            |_| {},
        );
        rx.await.ok()
    }

    async fn run_evaluation<F, C>(self: Arc<Self>, from: Option<NodeId>, callback: F, command_callback: C)
    where
        F: FnOnce(Result<Value, EvaluationError>) + Send + 'static,
        C: FnOnce(Command) + Send + 'static,
    {
        let Some(teardown) = self.scenario().map(|s| s.context().teardown().clone()) else {
            tracing::trace!("Block {} has no run-context, dropping evaluation", self.id);
            return;
        };

        tokio::select! {
            biased;
            _ = teardown.closed() => {
                tracing::trace!("Run closed before block {} booted", self.id);
                return;
            }
            booted = self.gate.wait() => {
                if let Err(error) = booted {
                    tracing::debug!("Block {} will never evaluate: {error}", self.id);
                    return;
                }
            }
        }

        let count = self.evaluation_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(node_id = %self.id, count, "Evaluating block");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let responder = Responder::new(tx);

        let mut hook = {
            let node = Arc::clone(&self);
            let responder = responder.clone();
            tokio::spawn(async move { node.behavior.evaluate(&node, from.as_ref(), responder).await })
        };

        // Held until the hook returns so a hook error or panic can still
        // complete the evaluation
        let mut guard = Some(responder);
        let mut callback = Some(callback);
        let mut command_callback = Some(command_callback);

        loop {
            tokio::select! {
                biased;
                _ = teardown.closed() => {
                    tracing::trace!("Run closed while block {} was evaluating", self.id);
                    break;
                }
                response = rx.recv() => match response {
                    Some(Response::Command(command)) => {
                        if let Some(value) = &command.silent_value {
                            self.set_result_value(None, Some(value.clone()), true);
                        }
                        if let Some(command_callback) = command_callback.take() {
                            command_callback(command);
                        }
                    }
                    Some(Response::Done(result)) => {
                        self.record_completion(&result);
                        if let Some(callback) = callback.take() {
                            let success = result.is_ok();
                            callback(result);
                            self.emit_evaluated(success).await;
                        }
                    }
                    None => {
                        if callback.is_some() {
                            tracing::debug!("Block {} dropped its evaluation without completing", self.id);
                        }
                        break;
                    }
                },
                joined = &mut hook, if guard.is_some() => {
                    if let Some(responder) = guard.take() {
                        match joined {
                            Ok(Ok(())) => {}
                            Ok(Err(error)) => {
                                responder.fail(error);
                            }
                            Err(error) => {
                                responder.fail(EvaluationError::Panicked(error.to_string()));
                            }
                        }
                    }
                }
            }
        }
    }

    fn record_completion(&self, result: &Result<Value, EvaluationError>) {
        match result {
            Ok(value) => self.set_result_value(None, Some(value.clone()), false),
            Err(error) => {
                tracing::warn!("Block {} failed to evaluate: {error}", self.id);
                self.set_result_value(Some(error.clone()), None, false);
            }
        }
    }

    /// Emit `NodeEvaluated` for the first completed evaluation of the run
    async fn emit_evaluated(&self, success: bool) {
        if self.evaluated.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(scenario) = self.scenario() else {
            return;
        };
        let event_bus = Arc::clone(scenario.context().event_bus());
        let run_id = scenario.context().run_id();
        drop(scenario);

        let event = RuntimeEvent::NodeEvaluated {
            node_id: self.id.clone(),
            run_id,
            success,
        };
        if let Err(e) = event_bus.emit(event).await {
            tracing::warn!("Failed to report evaluation of block {}: {e}", self.id);
        }
    }

    /// Store a result on the block and hand it to the run's result store
    pub fn set_result_value(&self, err: Option<EvaluationError>, value: Option<Value>, silent: bool) {
        let stored = {
            let mut slot = self
                .result
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.record(err, value, silent);
            slot.to_stored()
        };

        if let Some(scenario) = self.scenario() {
            let context = scenario.context();
            context.results().persist(&context.scope(), &self.id, stored);
        }
    }

    /// The block's stored result in `scope` (default: the run's active scope)
    pub fn current_result(&self, scope: Option<&str>) -> StoredResult {
        let Some(scenario) = self.scenario() else {
            return self.result_slot().to_stored();
        };

        let context = scenario.context();
        let scope = scope.map(str::to_string).unwrap_or_else(|| context.scope());
        context.results().touch(&scope, &self.id)
    }

    /// The block's result from the previous run
    ///
    /// Falls back to the current result when there is no previous-run
    /// snapshot at all.
    pub fn previous_result(&self, scope: Option<&str>) -> StoredResult {
        let Some(scenario) = self.scenario() else {
            return self.result_slot().to_stored();
        };

        let context = scenario.context();
        let scope = scope.map(str::to_string).unwrap_or_else(|| context.scope());
        context
            .results()
            .previous(&scope, &self.id)
            .unwrap_or_else(|| context.results().touch(&scope, &self.id))
    }

    /// Whether the value differs from the one the previous run stored
    pub fn result_changed(&self, scope: Option<&str>) -> bool {
        self.previous_result(scope).value != self.current_result(scope).value
    }

    /// Read a run variable. `None` when unset or when there is no run-context.
    pub fn get(&self, name: &str) -> Option<Value> {
        let scenario = self.scenario()?;
        scenario.context().variables()?.get(name)
    }

    /// Write a run variable. Returns false when there is no variable table.
    pub fn set(&self, name: &str, value: Value, var_type: Option<&str>) -> bool {
        let Some(scenario) = self.scenario() else {
            return false;
        };

        match scenario.context().variables() {
            Some(variables) => {
                variables.set(name, value, var_type.map(str::to_string));
                true
            }
            None => false,
        }
    }

    /// Successor ids on the true branch, empty entries removed
    pub fn block_ids_when_true(&self) -> Vec<NodeId> {
        self.data.out_on_true.iter().filter(|id| !id.is_empty()).cloned().collect()
    }

    /// Successor ids on the false branch, empty entries removed
    pub fn block_ids_when_false(&self) -> Vec<NodeId> {
        self.data.out_on_false.iter().filter(|id| !id.is_empty()).cloned().collect()
    }

    /// Successor ids of both branches
    pub fn exit_block_ids(&self) -> Vec<NodeId> {
        let mut ids = self.block_ids_when_true();
        ids.extend(self.block_ids_when_false());
        ids
    }

    /// Exit ids for a branch
    pub fn exit_ids_for(&self, value: bool) -> Vec<NodeId> {
        if value {
            self.block_ids_when_true()
        } else {
            self.block_ids_when_false()
        }
    }

    /// The blocks to continue with after evaluating to `value`
    ///
    /// Ids that do not resolve (removed blocks) are skipped.
    pub fn next_blocks(&self, value: bool) -> Vec<Arc<BlockNode>> {
        let ids = self.exit_ids_for(value);
        if ids.is_empty() {
            return Vec::new();
        }

        match self.scenario() {
            Some(scenario) => scenario.graph().resolve(&ids),
            None => Vec::new(),
        }
    }

    /// Ids of the blocks whose exits point at this block
    ///
    /// Computed on first access and cached for the rest of the run; the
    /// topology of a run never changes.
    pub fn entrance_block_ids(&self) -> Arc<[NodeId]> {
        if let Some(ids) = self.entrance_ids.get() {
            return Arc::clone(ids);
        }

        let Some(scenario) = self.scenario() else {
            return Arc::from(Vec::new());
        };

        let ids: Arc<[NodeId]> = scenario.graph().entrance_ids(&self.id).into();
        Arc::clone(self.entrance_ids.get_or_init(|| ids))
    }

    /// The live blocks pointing at this block
    pub fn entrance_blocks(&self) -> Vec<Arc<BlockNode>> {
        if let Some(blocks) = self.entrance_blocks.get() {
            return blocks.iter().filter_map(Weak::upgrade).collect();
        }

        let Some(scenario) = self.scenario() else {
            return Vec::new();
        };

        let blocks = scenario.graph().resolve(&self.entrance_block_ids());
        let weak = blocks.iter().map(Arc::downgrade).collect();
        let _ = self.entrance_blocks.set(weak);
        blocks
    }

    /// Description shown in the scenario editor
    pub async fn describe(&self) -> String {
        let definition = &self.definition;

        if let Some(description) = definition.static_description() {
            if !definition.force_description() {
                return description.to_string();
            }
        }

        if !definition.has_settings() || definition.force_description() || !self.data.settings.is_empty() {
            return self.behavior.description(self).await;
        }

        format!("{} (unconfigured)", definition.title())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::events::{EventBus, MemoryEventBus};
    use crate::node::VariableTable;
    use crate::persistence::{MemoryResultStore, ResultSnapshot};
    use crate::registry::NodeRegistry;
    use crate::scenario::{RunOptions, ScenarioDefinition};

    /// What the test block does when evaluated
    #[derive(Clone)]
    enum Plan {
        Value(Value),
        Twice(Value, Value),
        Fail(&'static str),
        Panic,
        Silent(Value),
        SilentTwice(Value, Value),
        Drop,
    }

    struct TestBlock {
        plan: Plan,
        boot_fails: bool,
        boots: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BlockBehavior for TestBlock {
        async fn boot(&self, _node: &BlockNode) -> Result<(), BootError> {
            self.boots.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.boot_fails {
                return Err(BootError::Failed("no connection".to_string()));
            }
            Ok(())
        }

        async fn evaluate(
            &self,
            _node: &BlockNode,
            _from: Option<&NodeId>,
            responder: Responder,
        ) -> Result<(), EvaluationError> {
            match &self.plan {
                Plan::Value(value) => {
                    responder.ok(value.clone());
                }
                Plan::Twice(first, second) => {
                    responder.ok(first.clone());
                    responder.ok(second.clone());
                }
                Plan::Fail(message) => return Err((*message).into()),
                Plan::Panic => panic!("evaluate exploded"),
                Plan::Silent(value) => {
                    responder.command(Command::silent(value.clone()));
                }
                Plan::SilentTwice(first, second) => {
                    responder.command(Command::silent(first.clone()));
                    responder.command(Command::silent(second.clone()));
                }
                Plan::Drop => {}
            }
            Ok(())
        }

        async fn description(&self, node: &BlockNode) -> String {
            format!("Test {}", node.settings().len())
        }
    }

    struct Fixture {
        scenario: Arc<Scenario>,
        boots: Arc<AtomicUsize>,
    }

    fn definition(plan: Plan, boot_fails: bool, boots: Arc<AtomicUsize>) -> BlockDefinition {
        BlockDefinition::builder("test")
            .factory(move |_| {
                Ok(Arc::new(TestBlock {
                    plan: plan.clone(),
                    boot_fails,
                    boots: Arc::clone(&boots),
                }) as Arc<dyn BlockBehavior>)
            })
            .build()
            .unwrap()
    }

    fn fixture_with(plan: Plan, boot_fails: bool, blocks: Vec<BlockData>, options: RunOptions) -> Fixture {
        let boots = Arc::new(AtomicUsize::new(0));
        let mut registry = NodeRegistry::new();
        registry
            .register_block(definition(plan, boot_fails, Arc::clone(&boots)))
            .unwrap();

        let scenario = Scenario::load(ScenarioDefinition::new("test", blocks), &registry, options).unwrap();
        Fixture { scenario, boots }
    }

    fn fixture(plan: Plan) -> Fixture {
        fixture_with(plan, false, vec![BlockData::new("a", "test")], RunOptions::default())
    }

    fn block(fixture: &Fixture, id: &str) -> Arc<BlockNode> {
        fixture.scenario.get_block(id).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_boot_runs_hook_once() {
        let fixture = fixture(Plan::Value(json!(1)));
        let a = block(&fixture, "a");

        let (first, second) = tokio::join!(a.start_boot(), a.start_boot());

        assert_eq!(first, Ok(()));
        assert_eq!(second, Ok(()));
        assert_eq!(fixture.boots.load(Ordering::SeqCst), 1);
        assert_eq!(a.lifecycle_state(), LifecycleState::Booted);

        // Later calls are no-ops too
        assert_eq!(a.start_boot().await, Ok(()));
        assert_eq!(fixture.boots.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_evaluation_waits_for_boot() {
        let fixture = fixture(Plan::Value(json!("done")));
        let a = block(&fixture, "a");

        let (tx, rx) = oneshot::channel();
        a.start_evaluation(
            Some(NodeId::from("upstream")),
            move |result| {
                let _ = tx.send(result);
            },
            |_| {},
        );

        // Recorded before booting
        assert_eq!(a.seen_blocks(), vec![Some(NodeId::from("upstream"))]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.evaluation_count(), 0);

        a.start_boot().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
        assert_eq!(result, Ok(json!("done")));
        assert_eq!(a.evaluation_count(), 1);
    }

    #[tokio::test]
    async fn test_callback_fires_once() {
        let fixture = fixture(Plan::Twice(json!(1), json!(2)));
        let a = block(&fixture, "a");
        a.start_boot().await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        {
            let calls = Arc::clone(&calls);
            a.start_evaluation(
                None,
                move |result| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(result);
                },
                |_| {},
            );
        }

        assert_eq!(rx.await.unwrap(), Ok(json!(1)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Downstream saw the first value; the stored result is the last one
        assert_eq!(a.result_slot().result_value, Some(json!(2)));
        assert_eq!(a.current_result(None).value, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_hook_error_becomes_callback_error() {
        let fixture = fixture(Plan::Fail("bad input"));
        let a = block(&fixture, "a");
        a.start_boot().await.unwrap();

        let result = a.evaluate(None).await.unwrap();

        assert_eq!(result, Err(EvaluationError::Failed("bad input".to_string())));
        let slot = a.result_slot();
        assert!(slot.has_result_value);
        assert_eq!(slot.result_err, Some(EvaluationError::Failed("bad input".to_string())));
        assert_eq!(slot.result_value, None);
    }

    #[tokio::test]
    async fn test_panicking_hook_does_not_crash_the_run() {
        let fixture = fixture(Plan::Panic);
        let a = block(&fixture, "a");
        a.start_boot().await.unwrap();

        let result = a.evaluate(None).await.unwrap();
        assert!(matches!(result, Err(EvaluationError::Panicked(_))));
    }

    #[tokio::test]
    async fn test_silent_command_records_value() {
        let fixture = fixture(Plan::Silent(json!(7)));
        let a = block(&fixture, "a");
        a.start_boot().await.unwrap();

        let (command_tx, command_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel::<Result<Value, EvaluationError>>();
        a.start_evaluation(
            None,
            move |result| {
                let _ = done_tx.send(result);
            },
            move |command| {
                let _ = command_tx.send(command);
            },
        );

        let command = command_rx.await.unwrap();
        assert_eq!(command.silent_value, Some(json!(7)));

        // The hook never completed: the main callback is dropped
        assert!(done_rx.await.is_err());

        let slot = a.result_slot();
        assert!(slot.has_silent_value);
        assert_eq!(slot.result_value, Some(json!(7)));
        assert_eq!(a.current_result(None).value, Some(json!(7)));
        assert!(a.current_result(None).silent);
    }

    #[tokio::test]
    async fn test_every_silent_value_is_recorded() {
        let fixture = fixture(Plan::SilentTwice(json!(1), json!(2)));
        let a = block(&fixture, "a");
        a.start_boot().await.unwrap();

        let commands = Arc::new(AtomicUsize::new(0));
        let (command_tx, command_rx) = oneshot::channel();
        {
            let commands = Arc::clone(&commands);
            a.start_evaluation(
                None,
                |_| {},
                move |command| {
                    commands.fetch_add(1, Ordering::SeqCst);
                    let _ = command_tx.send(command);
                },
            );
        }

        let command = command_rx.await.unwrap();
        assert_eq!(command.silent_value, Some(json!(1)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(commands.load(Ordering::SeqCst), 1);
        let slot = a.result_slot();
        assert!(slot.has_silent_value);
        assert_eq!(slot.result_value, Some(json!(2)));
        assert_eq!(a.current_result(None).value, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_dropped_responder_never_completes() {
        let fixture = fixture(Plan::Drop);
        let a = block(&fixture, "a");
        a.start_boot().await.unwrap();

        assert_eq!(a.evaluate(None).await, None);
        assert_eq!(a.evaluation_count(), 1);
        assert!(!a.result_slot().has_result_value);
    }

    #[tokio::test]
    async fn test_boot_failure_blocks_evaluation() {
        let fixture = fixture_with(
            Plan::Value(json!(1)),
            true,
            vec![BlockData::new("a", "test")],
            RunOptions::default(),
        );
        let a = block(&fixture, "a");

        let pending = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.evaluate(None).await })
        };

        let booted = a.start_boot().await;
        assert_eq!(booted, Err(BootError::Failed("no connection".to_string())));
        assert!(matches!(a.lifecycle_state(), LifecycleState::Failed(_)));

        assert_eq!(pending.await.unwrap(), None);
        assert_eq!(a.evaluation_count(), 0);

        // Terminal: booting again does not retry
        assert!(a.start_boot().await.is_err());
        assert_eq!(fixture.boots.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_drops_pending_evaluation() {
        let fixture = fixture(Plan::Value(json!(1)));
        let a = block(&fixture, "a");

        let pending = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.evaluate(None).await })
        };
        tokio::task::yield_now().await;

        fixture.scenario.close().await;
        assert_eq!(pending.await.unwrap(), None);
        assert_eq!(a.start_boot().await, Err(BootError::RunClosed));
    }

    #[tokio::test]
    async fn test_result_round_trip_and_previous_fallback() {
        let fixture = fixture(Plan::Value(json!(1)));
        let a = block(&fixture, "a");

        a.set_result_value(None, Some(json!(42)), false);

        let current = a.current_result(Some("default"));
        assert_eq!(current.value, Some(json!(42)));
        // No previous-run snapshot: previous equals current
        assert_eq!(a.previous_result(Some("default")), current);
        assert!(!a.result_changed(None));
    }

    #[tokio::test]
    async fn test_result_changed_against_previous_run() {
        let mut previous = ResultSnapshot::new();
        previous.insert(
            "default",
            NodeId::from("a"),
            StoredResult {
                value: Some(json!(1)),
                error: None,
                silent: false,
            },
        );

        let options = RunOptions::builder()
            .results(Arc::new(MemoryResultStore::with_previous(previous)))
            .build();
        let fixture = fixture_with(Plan::Value(json!(2)), false, vec![BlockData::new("a", "test")], options);
        let a = block(&fixture, "a");
        a.start_boot().await.unwrap();

        a.evaluate(None).await.unwrap().unwrap();

        assert_eq!(a.previous_result(None).value, Some(json!(1)));
        assert_eq!(a.current_result(None).value, Some(json!(2)));
        assert!(a.result_changed(None));
    }

    #[tokio::test]
    async fn test_next_blocks_filters_and_keeps_order() {
        let fixture = fixture_with(
            Plan::Value(json!(1)),
            false,
            vec![
                BlockData::new("x", "test")
                    .on_true(["A", "", "missing", "B"])
                    .on_false(["B"]),
                BlockData::new("A", "test"),
                BlockData::new("B", "test"),
            ],
            RunOptions::default(),
        );
        let x = block(&fixture, "x");

        let ids: Vec<_> = x.next_blocks(true).iter().map(|b| b.id().to_string()).collect();
        assert_eq!(ids, vec!["A", "B"]);

        let ids: Vec<_> = x.next_blocks(false).iter().map(|b| b.id().to_string()).collect();
        assert_eq!(ids, vec!["B"]);

        assert_eq!(
            x.exit_block_ids(),
            vec![NodeId::from("A"), NodeId::from("missing"), NodeId::from("B"), NodeId::from("B")]
        );
    }

    #[tokio::test]
    async fn test_entrance_ids_are_cached() {
        let fixture = fixture_with(
            Plan::Value(json!(1)),
            false,
            vec![
                BlockData::new("start", "test").on_true(["X"]),
                BlockData::new("B", "test").on_false(["X", "X"]),
                BlockData::new("X", "test"),
            ],
            RunOptions::default(),
        );
        let x = block(&fixture, "X");

        let first = x.entrance_block_ids();
        let second = x.entrance_block_ids();

        assert_eq!(&*first, &[NodeId::from("start"), NodeId::from("B")]);
        assert!(Arc::ptr_eq(&first, &second));

        let entrances: Vec<_> = x.entrance_blocks().iter().map(|b| b.id().to_string()).collect();
        assert_eq!(entrances, vec!["start", "B"]);
    }

    #[tokio::test]
    async fn test_dangling_exit_is_not_an_error() {
        let fixture = fixture_with(
            Plan::Value(json!(1)),
            false,
            vec![BlockData::new("A", "test").on_true(["B"]), BlockData::new("B", "test").on_true(["C"])],
            RunOptions::default(),
        );
        let b = block(&fixture, "B");

        assert!(b.next_blocks(true).is_empty());
        assert_eq!(
            fixture.scenario.graph().entrance_ids(&NodeId::from("C")),
            vec![NodeId::from("B")]
        );
    }

    #[tokio::test]
    async fn test_variables() {
        let fixture = fixture(Plan::Value(json!(1)));
        let a = block(&fixture, "a");

        assert_eq!(a.get("count"), None);
        assert!(a.set("count", json!(3), Some("number")));
        assert_eq!(a.get("count"), Some(json!(3)));

        let without_table = fixture_with(
            Plan::Value(json!(1)),
            false,
            vec![BlockData::new("a", "test")],
            RunOptions::builder().variables(None).build(),
        );
        let a = block(&without_table, "a");
        assert!(!a.set("count", json!(3), None));
        assert_eq!(a.get("count"), None);
    }

    #[tokio::test]
    async fn test_missing_run_context() {
        let fixture = fixture(Plan::Value(json!(1)));
        let a = block(&fixture, "a");
        drop(fixture);

        assert!(a.scenario().is_none());
        assert_eq!(a.get("anything"), None);
        assert!(!a.set("anything", json!(1), None));
        assert!(a.next_blocks(true).is_empty());
        assert!(a.entrance_block_ids().is_empty());
        assert_eq!(a.start_boot().await, Err(BootError::RunClosed));

        a.set_result_value(None, Some(json!(5)), false);
        assert_eq!(a.current_result(None).value, Some(json!(5)));
    }

    #[tokio::test]
    async fn test_shared_variable_table() {
        let variables = VariableTable::new();
        variables.set("name", json!("seed"), None);

        let fixture = fixture_with(
            Plan::Value(json!(1)),
            false,
            vec![BlockData::new("a", "test")],
            RunOptions::builder().variables(Some(variables.clone())).build(),
        );

        block(&fixture, "a").set("name", json!("changed"), Some("string"));
        assert_eq!(variables.get("name"), Some(json!("changed")));
    }

    #[tokio::test]
    async fn test_describe() {
        let boots = Arc::new(AtomicUsize::new(0));
        let make = |builder: crate::block::BlockDefinitionBuilder| {
            let boots = Arc::clone(&boots);
            builder
                .factory(move |_| {
                    Ok(Arc::new(TestBlock {
                        plan: Plan::Drop,
                        boot_fails: false,
                        boots: Arc::clone(&boots),
                    }) as Arc<dyn BlockBehavior>)
                })
                .build()
                .unwrap()
        };

        let mut registry = NodeRegistry::new();
        registry
            .register_block(make(BlockDefinition::builder("plain").title("Plain")))
            .unwrap();
        registry
            .register_block(make(BlockDefinition::builder("fixed").static_description("Always the same")))
            .unwrap();
        registry
            .register_block(make(
                BlockDefinition::builder("forced")
                    .static_description("Ignored")
                    .force_description(true),
            ))
            .unwrap();
        registry
            .register_block(make(BlockDefinition::builder("bare").has_settings(false)))
            .unwrap();

        let scenario = Scenario::load(
            ScenarioDefinition::new(
                "describe",
                vec![
                    BlockData::new("unconfigured", "plain"),
                    BlockData::new("configured", "plain").with_settings(json!({ "a": 1, "b": 2 })),
                    BlockData::new("fixed", "fixed"),
                    BlockData::new("forced", "forced"),
                    BlockData::new("bare", "bare"),
                ],
            ),
            &registry,
            RunOptions::default(),
        )
        .unwrap();

        let describe = |id: &str| {
            let block = scenario.get_block(id).unwrap();
            async move { block.describe().await }
        };

        assert_eq!(describe("unconfigured").await, "Plain (unconfigured)");
        assert_eq!(describe("configured").await, "Test 2");
        assert_eq!(describe("fixed").await, "Always the same");
        assert_eq!(describe("forced").await, "Test 0");
        assert_eq!(describe("bare").await, "Test 0");
    }

    #[tokio::test]
    async fn test_events() {
        let bus = Arc::new(MemoryEventBus::new());
        let options = RunOptions::builder()
            .event_bus(Arc::clone(&bus) as Arc<dyn EventBus>)
            .build();
        let fixture = fixture_with(Plan::Value(json!(1)), false, vec![BlockData::new("a", "test")], options);
        let a = block(&fixture, "a");
        let run_id = fixture.scenario.run_id();

        a.start_boot().await.unwrap();
        a.evaluate(None).await.unwrap().unwrap();
        a.evaluate(None).await.unwrap().unwrap();

        assert_eq!(
            bus.events(),
            vec![
                RuntimeEvent::NodeBooting {
                    node_id: NodeId::from("a"),
                    run_id
                },
                RuntimeEvent::NodeBooted {
                    node_id: NodeId::from("a"),
                    run_id
                },
                RuntimeEvent::NodeEvaluated {
                    node_id: NodeId::from("a"),
                    run_id,
                    success: true
                },
            ]
        );
        assert_eq!(a.evaluation_count(), 2);
    }
}
