//! Generic components every registry can offer

use std::sync::Arc;

use serde_json::Value;

use crate::component::{AnchorOptions, ComponentDefinition, ComponentNode, HandlerResult, Signal};
use crate::registry::{ConfigurationError, FieldDefinition, FieldSchema};

/// Forwards every signal it receives on `in` to `out`
pub struct RelayComponent;

impl RelayComponent {
    pub fn definition() -> Result<ComponentDefinition, ConfigurationError> {
        ComponentDefinition::builder("Relay")
            .description("Passes signals through unchanged")
            .category("flow")
            .input(relay, AnchorOptions::builder().name("in").title("In").build())
            .output_with(AnchorOptions::builder().name("out").title("Out").build())
            .build()
    }
}

async fn relay(component: Arc<ComponentNode>, signal: Signal) -> HandlerResult {
    component.output_signal("out", signal).await;
    Ok(())
}

/// Logs every signal it receives and counts them in its memory
pub struct LogComponent;

impl LogComponent {
    pub fn definition() -> Result<ComponentDefinition, ConfigurationError> {
        ComponentDefinition::builder("Log")
            .description("Writes received signals to the log")
            .category("debug")
            .schema(FieldSchema::new().field(FieldDefinition::new("prefix", "string").with_title("Prefix")))
            .input(log, AnchorOptions::builder().name("in").title("In").build())
            .build()
    }
}

async fn log(component: Arc<ComponentNode>, signal: Signal) -> HandlerResult {
    let prefix = component
        .settings()
        .get("prefix")
        .and_then(Value::as_str)
        .unwrap_or("signal");

    tracing::info!(
        component = %component.uid(),
        signal_type = %signal.signal_type,
        "{prefix}: {}",
        signal.value
    );

    if let Some(memory) = component.memory() {
        let count = memory.get("received").and_then(|v| v.as_u64()).unwrap_or(0);
        memory.set("received", Value::from(count + 1));
        memory.set("last", signal.value);
    }

    Ok(())
}

pub(crate) fn definitions() -> Result<Vec<ComponentDefinition>, ConfigurationError> {
    Ok(vec![RelayComponent::definition()?, LogComponent::definition()?])
}
