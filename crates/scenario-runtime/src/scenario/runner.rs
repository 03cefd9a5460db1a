use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use ts_rs::TS;
use uuid::Uuid;

use crate::block::{BlockNode, Command};
use crate::events::RuntimeEvent;
use crate::node::{is_truthy, EvaluationError, NodeId};
use crate::scenario::Scenario;

/// A block that failed to boot or evaluate
#[derive(TS, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[ts(export)]
pub struct NodeFailure {
    pub node_id: NodeId,
    pub error: String,
}

/// Summary of a finished [`Scenario::run`]
#[derive(TS, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[ts(export)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scope: String,

    #[ts(type = "string")]
    pub started_at: DateTime<Utc>,

    #[ts(type = "string")]
    pub finished_at: DateTime<Utc>,

    /// Blocks in the order their evaluations completed
    pub evaluated: Vec<NodeId>,
    pub errors: Vec<NodeFailure>,
    pub boot_failures: Vec<NodeFailure>,

    /// Whether the run was closed early because of an error
    pub halted: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && self.boot_failures.is_empty()
    }
}

#[derive(Debug)]
enum RunMessage {
    Completed {
        block: Arc<BlockNode>,
        result: Result<Value, EvaluationError>,
        // Keeps the channel open while successors are started
        tx: mpsc::UnboundedSender<RunMessage>,
    },
    Commanded {
        block: NodeId,
        command: Command,
    },
}

impl Scenario {
    /// Boot every block concurrently
    ///
    /// Returns the blocks that failed, in document order.
    pub async fn boot_all(&self) -> Vec<NodeFailure> {
        let mut booting = JoinSet::new();
        for block in self.graph().iter() {
            let block = Arc::clone(block);
            booting.spawn(async move {
                let result = block.start_boot().await;
                (block.id().clone(), result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = booting.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((node_id, Err(error))) => failures.push(NodeFailure {
                    node_id,
                    error: error.to_string(),
                }),
                Err(e) => tracing::error!("Boot task failed: {e}"),
            }
        }

        failures.sort_by_key(|failure| self.graph().position(failure.node_id.as_str()));
        failures
    }

    /// Run the scenario to completion
    ///
    /// Boots every block, then evaluates the entrance-point blocks and follows
    /// the branch each completed evaluation selects. Every `(from, to)` edge is
    /// followed at most once per run. Errors end their branch; with
    /// `halt_on_error` the first one closes the run.
    ///
    /// Returns once no evaluation is in flight any more.
    pub async fn run(self: &Arc<Self>) -> RunReport {
        let started_at = Utc::now();
        let run_id = self.run_id();
        let event_bus = Arc::clone(self.context().event_bus());

        tracing::info!("Starting scenario {} (run {run_id})", self.id());
        let _ = event_bus.emit(RuntimeEvent::RunStarted { run_id }).await;

        let boot_failures = self.boot_all().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        for block in self.entrance_blocks() {
            dispatch(&block, None, &tx);
        }
        drop(tx);

        let mut traversed = HashSet::new();
        let mut evaluated = Vec::new();
        let mut errors = Vec::new();
        let mut halted = false;

        while let Some(message) = rx.recv().await {
            match message {
                RunMessage::Commanded { block, command } => {
                    tracing::debug!("Block {block} sent command {}", command.name);
                }
                RunMessage::Completed { block, result, tx } => {
                    evaluated.push(block.id().clone());

                    match result {
                        Ok(value) => {
                            if self.is_closed() {
                                continue;
                            }

                            for next in block.next_blocks(is_truthy(&value)) {
                                let edge = (block.id().clone(), next.id().clone());
                                if !traversed.insert(edge) {
                                    tracing::trace!("Edge {} -> {} already followed", block.id(), next.id());
                                    continue;
                                }
                                dispatch(&next, Some(block.id().clone()), &tx);
                            }
                        }
                        Err(error) => {
                            errors.push(NodeFailure {
                                node_id: block.id().clone(),
                                error: error.to_string(),
                            });

                            if self.halt_on_error() && !halted {
                                tracing::warn!("Halting scenario {} after error in block {}", self.id(), block.id());
                                halted = true;
                                self.close().await;
                            }
                        }
                    }
                }
            }
        }

        let _ = event_bus.emit(RuntimeEvent::RunCompleted { run_id }).await;
        tracing::info!(
            "Scenario {} finished: {} evaluations, {} errors",
            self.id(),
            evaluated.len(),
            errors.len()
        );

        RunReport {
            run_id,
            scope: self.scope(),
            started_at,
            finished_at: Utc::now(),
            evaluated,
            errors,
            boot_failures,
            halted,
        }
    }
}

fn dispatch(block: &Arc<BlockNode>, from: Option<NodeId>, tx: &mpsc::UnboundedSender<RunMessage>) {
    let done_tx = tx.clone();
    let command_tx = tx.clone();
    let node = Arc::clone(block);
    let id = block.id().clone();

    block.start_evaluation(
        from,
        move |result| {
            let sender = done_tx.clone();
            let _ = sender.send(RunMessage::Completed {
                block: node,
                result,
                tx: done_tx,
            });
        },
        move |command| {
            let _ = command_tx.send(RunMessage::Commanded { block: id, command });
        },
    );
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::block::{BlockBehavior, BlockData, BlockDefinition, Responder};
    use crate::events::{EventBus, MemoryEventBus};
    use crate::node::BootError;
    use crate::registry::NodeRegistry;
    use crate::scenario::{RunOptions, ScenarioDefinition};

    /// Evaluates to the `value` setting, fails when `fail` is set
    struct Fixed {
        value: Value,
        fail: bool,
        silent: bool,
    }

    #[async_trait]
    impl BlockBehavior for Fixed {
        async fn boot(&self, node: &BlockNode) -> Result<(), BootError> {
            if node.settings().contains_key("broken") {
                return Err(BootError::Failed("broken".to_string()));
            }
            Ok(())
        }

        async fn evaluate(
            &self,
            _node: &BlockNode,
            _from: Option<&NodeId>,
            responder: Responder,
        ) -> Result<(), EvaluationError> {
            if self.fail {
                return Err("failed on purpose".into());
            }
            if self.silent {
                responder.command(Command::silent(self.value.clone()));
                return Ok(());
            }
            responder.ok(self.value.clone());
            Ok(())
        }
    }

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register_builtins().unwrap();
        registry
            .register_block(
                BlockDefinition::builder("fixed")
                    .factory(|data| {
                        Ok(Arc::new(Fixed {
                            value: data.settings.get("value").cloned().unwrap_or(Value::Null),
                            fail: data.settings.contains_key("fail"),
                            silent: data.settings.contains_key("silent"),
                        }) as Arc<dyn BlockBehavior>)
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    fn fixed(id: &str, value: Value) -> BlockData {
        BlockData::new(id, "fixed").with_settings(json!({ "value": value }))
    }

    async fn run(blocks: Vec<BlockData>, options: RunOptions) -> (Arc<Scenario>, RunReport) {
        let scenario = Scenario::load(ScenarioDefinition::new("test", blocks), &registry(), options).unwrap();
        let report = scenario.run().await;
        (scenario, report)
    }

    fn ids(ids: &[NodeId]) -> Vec<&str> {
        ids.iter().map(NodeId::as_str).collect()
    }

    #[tokio::test]
    async fn test_follows_branches() {
        let (_, report) = run(
            vec![
                BlockData::new("start", "start").on_true(["check"]),
                fixed("check", json!(0)).on_true(["yes"]).on_false(["no"]),
                fixed("yes", json!(1)),
                fixed("no", json!(1)),
            ],
            RunOptions::default(),
        )
        .await;

        assert_eq!(ids(&report.evaluated), vec!["start", "check", "no"]);
        assert!(report.succeeded());
        assert!(!report.halted);
    }

    #[tokio::test]
    async fn test_each_edge_followed_once() {
        // a and b both lead to c; c loops back to itself
        let (scenario, report) = run(
            vec![
                BlockData::new("start", "start").on_true(["a", "b"]),
                fixed("a", json!(true)).on_true(["c"]),
                fixed("b", json!(true)).on_true(["c"]),
                fixed("c", json!(true)).on_true(["c"]),
            ],
            RunOptions::default(),
        )
        .await;

        let c = scenario.get_block("c").unwrap();
        // once from a, once from b, once from itself
        assert_eq!(c.evaluation_count(), 3);
        assert_eq!(report.evaluated.len(), 6);
        assert_eq!(c.seen_blocks().len(), 3);
    }

    #[tokio::test]
    async fn test_error_ends_branch() {
        let (_, report) = run(
            vec![
                BlockData::new("start", "start").on_true(["bad", "good"]),
                BlockData::new("bad", "fixed")
                    .with_settings(json!({ "fail": true }))
                    .on_true(["after"])
                    .on_false(["after"]),
                fixed("good", json!(1)),
                fixed("after", json!(1)),
            ],
            RunOptions::default(),
        )
        .await;

        assert!(!report.evaluated.contains(&NodeId::from("after")));
        assert!(report.evaluated.contains(&NodeId::from("good")));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].node_id, NodeId::from("bad"));
        assert!(!report.succeeded());
    }

    #[tokio::test]
    async fn test_halt_on_error_closes_run() {
        let (scenario, report) = run(
            vec![
                BlockData::new("start", "start").on_true(["bad"]),
                BlockData::new("bad", "fixed").with_settings(json!({ "fail": true })),
            ],
            RunOptions::builder().halt_on_error(true).build(),
        )
        .await;

        assert!(report.halted);
        assert!(scenario.is_closed());
    }

    #[tokio::test]
    async fn test_silent_value_does_not_traverse() {
        let (scenario, report) = run(
            vec![
                BlockData::new("start", "start").on_true(["quiet"]),
                BlockData::new("quiet", "fixed")
                    .with_settings(json!({ "silent": true, "value": 9 }))
                    .on_true(["next"]),
                fixed("next", json!(1)),
            ],
            RunOptions::default(),
        )
        .await;

        assert_eq!(ids(&report.evaluated), vec!["start"]);
        let quiet = scenario.get_block("quiet").unwrap();
        assert_eq!(quiet.result_slot().result_value, Some(json!(9)));
        assert!(quiet.result_slot().has_silent_value);
    }

    #[tokio::test]
    async fn test_boot_failure_reported() {
        let (_, report) = run(
            vec![
                BlockData::new("start", "start").on_true(["broken"]),
                BlockData::new("broken", "fixed").with_settings(json!({ "broken": true })),
            ],
            RunOptions::default(),
        )
        .await;

        assert_eq!(
            report.boot_failures,
            vec![NodeFailure {
                node_id: NodeId::from("broken"),
                error: "Boot failed: broken".to_string()
            }]
        );
        assert_eq!(ids(&report.evaluated), vec!["start"]);
    }

    #[tokio::test]
    async fn test_run_events() {
        let bus = Arc::new(MemoryEventBus::new());
        let (scenario, _) = run(
            vec![BlockData::new("start", "start")],
            RunOptions::builder()
                .event_bus(Arc::clone(&bus) as Arc<dyn EventBus>)
                .build(),
        )
        .await;

        let events = bus.events();
        let run_id = scenario.run_id();
        assert_eq!(events.first(), Some(&RuntimeEvent::RunStarted { run_id }));
        assert_eq!(events.last(), Some(&RuntimeEvent::RunCompleted { run_id }));
    }

    #[tokio::test]
    async fn test_variables_flow_between_blocks() {
        let (scenario, report) = run(
            vec![
                BlockData::new("start", "start").on_true(["set"]),
                BlockData::new("set", "set_variable")
                    .with_settings(json!({ "name": "answer", "value": 42 }))
                    .on_true(["compare"]),
                BlockData::new("compare", "compare_variable")
                    .with_settings(json!({ "name": "answer", "value": 42 }))
                    .on_true(["log"]),
                BlockData::new("log", "log").with_settings(json!({ "message": "matched" })),
            ],
            RunOptions::default(),
        )
        .await;

        assert_eq!(ids(&report.evaluated), vec!["start", "set", "compare", "log"]);
        assert_eq!(scenario.variables().unwrap().get("answer"), Some(json!(42)));
    }
}
