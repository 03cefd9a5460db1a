use std::path::PathBuf;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use serde_json::Value;

use scenario_runtime::events::{EventBus, TracingEventBus};
use scenario_runtime::node::VariableTable;
use scenario_runtime::persistence::{MemoryResultStore, ResultPersistence, ResultSnapshot};
use scenario_runtime::registry::NodeRegistry;
use scenario_runtime::scenario::{RunOptions, RunReport, Scenario, ScenarioDefinition};

/// How one scenario should be run
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    pub scope: String,
    pub results: Option<PathBuf>,
    pub halt_on_error: bool,
    pub variables: Vec<(String, Value)>,
}

pub struct Executor {
    definition: ScenarioDefinition,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(definition: ScenarioDefinition, options: ExecutorOptions) -> Self {
        Self { definition, options }
    }

    /// Run the scenario to completion and save its results
    pub async fn execute(self) -> Result<RunReport> {
        let registry = NodeRegistry::with_builtins()?;

        let variables = VariableTable::new();
        for (name, value) in &self.options.variables {
            variables.set(name.as_str(), value.clone(), None);
        }

        let previous = self.read_previous().await?;
        let store = Arc::new(match &previous {
            Some(previous) => MemoryResultStore::with_previous(previous.clone()),
            None => MemoryResultStore::new(),
        });

        let options = RunOptions::builder()
            .scope(self.options.scope.clone())
            .event_bus(Arc::new(TracingEventBus) as Arc<dyn EventBus>)
            .results(Arc::clone(&store) as Arc<dyn ResultPersistence>)
            .variables(Some(variables))
            .halt_on_error(self.options.halt_on_error)
            .build();

        let scenario = Scenario::load(self.definition, &registry, options)?;
        tracing::info!("Running scenario {} as run {}", scenario.id(), scenario.run_id());

        let report = scenario.run().await;
        scenario.close().await;

        if let Some(path) = &self.options.results {
            let mut snapshot = previous.unwrap_or_default();
            snapshot.merge(store.snapshot());

            tokio::fs::write(path, snapshot.to_json()?)
                .await
                .wrap_err_with(|| format!("Failed to write results to {}", path.display()))?;
            tracing::debug!("Saved results to {}", path.display());
        }

        Ok(report)
    }

    async fn read_previous(&self) -> Result<Option<ResultSnapshot>> {
        let Some(path) = &self.options.results else {
            return Ok(None);
        };

        if !path.is_file() {
            tracing::debug!("No previous results at {}", path.display());
            return Ok(None);
        }

        let json = tokio::fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("Failed to read results from {}", path.display()))?;
        let snapshot = ResultSnapshot::from_json(&json)
            .wrap_err_with(|| format!("Invalid results file {}", path.display()))?;

        Ok(Some(snapshot))
    }
}
