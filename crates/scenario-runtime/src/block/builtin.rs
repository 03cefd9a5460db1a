//! Generic blocks every registry can offer

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::block::{BlockBehavior, BlockDefinition, BlockNode, FromSettings, Responder};
use crate::node::{EvaluationError, NodeId};
use crate::registry::{ConfigurationError, FieldDefinition, FieldSchema};

fn required_name(settings: &Map<String, Value>) -> Result<String, String> {
    let name = settings
        .get("name")
        .and_then(Value::as_str)
        .ok_or("Missing variable name")?;

    if name.is_empty() {
        return Err("Variable name cannot be empty".to_string());
    }

    Ok(name.to_string())
}

fn variable_schema() -> FieldSchema {
    FieldSchema::new()
        .field(FieldDefinition::new("name", "string").with_title("Variable"))
        .field(FieldDefinition::new("value", "any").with_title("Value"))
}

/// Entrance point of a scenario; always takes the true branch
#[derive(Debug, Default)]
pub struct Start;

impl FromSettings for Start {
    fn from_settings(_settings: &Map<String, Value>) -> Result<Self, String> {
        Ok(Start)
    }
}

#[async_trait]
impl BlockBehavior for Start {
    async fn evaluate(
        &self,
        _node: &BlockNode,
        _from: Option<&NodeId>,
        responder: Responder,
    ) -> Result<(), EvaluationError> {
        responder.ok(true);
        Ok(())
    }
}

/// Writes a run variable
#[derive(Debug)]
pub struct SetVariable {
    name: String,
    value: Value,
    var_type: Option<String>,
}

impl FromSettings for SetVariable {
    fn from_settings(settings: &Map<String, Value>) -> Result<Self, String> {
        Ok(SetVariable {
            name: required_name(settings)?,
            value: settings.get("value").cloned().unwrap_or(Value::Null),
            var_type: settings.get("type").and_then(Value::as_str).map(str::to_string),
        })
    }
}

#[async_trait]
impl BlockBehavior for SetVariable {
    async fn evaluate(
        &self,
        node: &BlockNode,
        _from: Option<&NodeId>,
        responder: Responder,
    ) -> Result<(), EvaluationError> {
        let stored = node.set(&self.name, self.value.clone(), self.var_type.as_deref());
        responder.ok(stored);
        Ok(())
    }

    async fn description(&self, _node: &BlockNode) -> String {
        format!("Set {} to {}", self.name, self.value)
    }
}

/// Checks whether a run variable equals a value
#[derive(Debug)]
pub struct CompareVariable {
    name: String,
    value: Value,
}

impl FromSettings for CompareVariable {
    fn from_settings(settings: &Map<String, Value>) -> Result<Self, String> {
        Ok(CompareVariable {
            name: required_name(settings)?,
            value: settings.get("value").cloned().unwrap_or(Value::Null),
        })
    }
}

#[async_trait]
impl BlockBehavior for CompareVariable {
    async fn evaluate(
        &self,
        node: &BlockNode,
        _from: Option<&NodeId>,
        responder: Responder,
    ) -> Result<(), EvaluationError> {
        let current = node.get(&self.name).unwrap_or(Value::Null);
        responder.ok(current == self.value);
        Ok(())
    }

    async fn description(&self, _node: &BlockNode) -> String {
        format!("Is {} equal to {}?", self.name, self.value)
    }
}

/// Logs a message and continues on the true branch
#[derive(Debug)]
pub struct Log {
    message: String,
}

impl FromSettings for Log {
    fn from_settings(settings: &Map<String, Value>) -> Result<Self, String> {
        Ok(Log {
            message: settings
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        })
    }
}

#[async_trait]
impl BlockBehavior for Log {
    async fn evaluate(
        &self,
        node: &BlockNode,
        from: Option<&NodeId>,
        responder: Responder,
    ) -> Result<(), EvaluationError> {
        match from {
            Some(from) => tracing::info!(block = %node.id(), %from, "{}", self.message),
            None => tracing::info!(block = %node.id(), "{}", self.message),
        }
        responder.ok(true);
        Ok(())
    }

    async fn description(&self, _node: &BlockNode) -> String {
        format!("Log \"{}\"", self.message)
    }
}

pub(crate) fn definitions() -> Result<Vec<BlockDefinition>, ConfigurationError> {
    Ok(vec![
        BlockDefinition::builder("start")
            .title("Start")
            .static_description("Start of the scenario")
            .category("flow")
            .entrance_point(true)
            .has_entrance(false)
            .has_settings(false)
            .exit_names(["true"])
            .behavior::<Start>()
            .build()?,
        BlockDefinition::builder("set_variable")
            .category("variables")
            .schema(variable_schema().field(FieldDefinition::new("type", "string").with_title("Type")))
            .behavior::<SetVariable>()
            .build()?,
        BlockDefinition::builder("compare_variable")
            .category("variables")
            .schema(variable_schema())
            .behavior::<CompareVariable>()
            .build()?,
        BlockDefinition::builder("log")
            .category("debug")
            .has_settings(false)
            .schema(FieldSchema::new().field(FieldDefinition::new("message", "string")))
            .behavior::<Log>()
            .build()?,
    ])
}
