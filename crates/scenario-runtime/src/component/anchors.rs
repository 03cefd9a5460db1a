use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use typed_builder::TypedBuilder;

use crate::component::{ComponentNode, Signal};
use crate::registry::{AnchorDescriptor, ConfigurationError};

/// A named input or output port of a component type
#[derive(TS, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[ts(export)]
pub struct AnchorSpec {
    pub name: String,
    pub title: String,
    #[serde(rename = "type")]
    pub value_type: Option<String>,
}

impl From<&AnchorSpec> for AnchorDescriptor {
    fn from(spec: &AnchorSpec) -> Self {
        AnchorDescriptor {
            name: spec.name.clone(),
            title: spec.title.clone(),
            value_type: spec.value_type.clone(),
        }
    }
}

/// Options for defining an anchor
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct AnchorOptions {
    /// Overrides the name derived from the handler
    #[builder(default, setter(strip_option, into))]
    pub name: Option<String>,

    #[builder(default, setter(strip_option, into))]
    pub title: Option<String>,

    #[builder(default, setter(strip_option, into))]
    pub value_type: Option<String>,
}

impl AnchorOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// What an input handler returns
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Handler run when a signal arrives at an input anchor
///
/// Implemented for every `async fn(Arc<ComponentNode>, Signal)` style
/// closure or function.
#[async_trait]
pub trait InputHandler: Send + Sync {
    async fn handle(&self, component: Arc<ComponentNode>, signal: Signal) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> InputHandler for F
where
    F: Fn(Arc<ComponentNode>, Signal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, component: Arc<ComponentNode>, signal: Signal) -> HandlerResult {
        (self)(component, signal).await
    }
}

/// An input anchor: its spec plus the handler bound to it
#[derive(Clone)]
pub struct InputAnchor {
    spec: AnchorSpec,
    handler: Arc<dyn InputHandler>,
}

impl std::fmt::Debug for InputAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputAnchor").field("spec", &self.spec).finish()
    }
}

impl InputAnchor {
    pub fn spec(&self) -> &AnchorSpec {
        &self.spec
    }

    pub fn handler(&self) -> &Arc<dyn InputHandler> {
        &self.handler
    }
}

/// Name of a function item as the last path segment of its type name
///
/// Closures have no usable name.
fn handler_name<F>() -> Option<String> {
    let full = std::any::type_name::<F>();
    let path = full.split('<').next().unwrap_or(full);
    let name = path.rsplit("::").next().unwrap_or(path);

    if name.is_empty() || name.contains('{') {
        None
    } else {
        Some(name.to_string())
    }
}

/// Ordered input and output anchors of a component type
///
/// Defining an anchor under an existing name replaces the earlier definition
/// but keeps its position.
#[derive(Debug, Clone, Default)]
pub struct AnchorRegistry {
    inputs: IndexMap<String, InputAnchor>,
    outputs: IndexMap<String, AnchorSpec>,
}

impl AnchorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define an input anchor
    ///
    /// The name comes from `options.name`, or else from the handler's function
    /// name.
    ///
    /// # Errors
    /// [`ConfigurationError::MissingInputName`] when neither gives a name
    pub fn define_input<F>(&mut self, handler: F, options: AnchorOptions) -> Result<&AnchorSpec, ConfigurationError>
    where
        F: InputHandler + 'static,
    {
        let name = options
            .name
            .filter(|name| !name.is_empty())
            .or_else(handler_name::<F>)
            .ok_or_else(|| ConfigurationError::MissingInputName {
                handler: std::any::type_name::<F>().to_string(),
            })?;

        let spec = AnchorSpec {
            title: options.title.unwrap_or_else(|| name.clone()),
            name: name.clone(),
            value_type: options.value_type,
        };

        let anchor = InputAnchor {
            spec,
            handler: Arc::new(handler),
        };

        let (index, _) = self.inputs.insert_full(name, anchor);
        Ok(&self.inputs[index].spec)
    }

    /// Define an output anchor
    ///
    /// # Errors
    /// [`ConfigurationError::MissingOutputName`] when `options` has no name
    pub fn define_output(&mut self, options: AnchorOptions) -> Result<&AnchorSpec, ConfigurationError> {
        let name = options
            .name
            .filter(|name| !name.is_empty())
            .ok_or(ConfigurationError::MissingOutputName)?;

        let spec = AnchorSpec {
            title: options.title.unwrap_or_else(|| name.clone()),
            name: name.clone(),
            value_type: options.value_type,
        };

        let (index, _) = self.outputs.insert_full(name, spec);
        Ok(&self.outputs[index])
    }

    pub fn input(&self, name: &str) -> Option<&InputAnchor> {
        self.inputs.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&AnchorSpec> {
        self.outputs.get(name)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &AnchorSpec> {
        self.inputs.values().map(InputAnchor::spec)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &AnchorSpec> {
        self.outputs.values()
    }

    /// Take over every anchor of `parent`
    ///
    /// Parent anchors come first. Anchors already defined here win over the
    /// parent's anchors of the same name and keep the parent's position.
    pub(crate) fn inherit(&mut self, parent: &AnchorRegistry) {
        let mut inputs = parent.inputs.clone();
        for (name, input) in std::mem::take(&mut self.inputs) {
            inputs.insert(name, input);
        }
        self.inputs = inputs;

        let mut outputs = parent.outputs.clone();
        for (name, output) in std::mem::take(&mut self.outputs) {
            outputs.insert(name, output);
        }
        self.outputs = outputs;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    async fn trigger(_component: Arc<ComponentNode>, _signal: Signal) -> HandlerResult {
        Ok(())
    }

    async fn reset(_component: Arc<ComponentNode>, _signal: Signal) -> HandlerResult {
        Ok(())
    }

    fn names<'a>(specs: impl Iterator<Item = &'a AnchorSpec>) -> Vec<&'a str> {
        specs.map(|spec| spec.name.as_str()).collect()
    }

    #[test]
    fn test_input_name_from_function() {
        let mut anchors = AnchorRegistry::new();
        anchors.define_input(trigger, AnchorOptions::default()).unwrap();
        anchors
            .define_input(reset, AnchorOptions::builder().name("clear").title("Clear").build())
            .unwrap();

        assert_eq!(names(anchors.inputs()), vec!["trigger", "clear"]);
        assert_eq!(anchors.input("clear").unwrap().spec().title, "Clear");
        assert_eq!(anchors.input("trigger").unwrap().spec().title, "trigger");
    }

    #[test]
    fn test_closure_needs_explicit_name() {
        let mut anchors = AnchorRegistry::new();
        let err = anchors
            .define_input(
                |_c: Arc<ComponentNode>, _s: Signal| async { HandlerResult::Ok(()) },
                AnchorOptions::default(),
            )
            .unwrap_err();

        assert!(matches!(err, ConfigurationError::MissingInputName { .. }));

        anchors
            .define_input(
                |_c: Arc<ComponentNode>, _s: Signal| async { HandlerResult::Ok(()) },
                AnchorOptions::named("in"),
            )
            .unwrap();
        assert_eq!(names(anchors.inputs()), vec!["in"]);
    }

    #[test]
    fn test_redefinition_replaces_in_place() {
        let mut anchors = AnchorRegistry::new();
        anchors.define_output(AnchorOptions::named("a")).unwrap();
        anchors.define_output(AnchorOptions::named("b")).unwrap();
        anchors
            .define_output(AnchorOptions::builder().name("a").value_type("number").build())
            .unwrap();

        assert_eq!(names(anchors.outputs()), vec!["a", "b"]);
        assert_eq!(anchors.output("a").unwrap().value_type.as_deref(), Some("number"));
    }

    #[test]
    fn test_output_requires_name() {
        let mut anchors = AnchorRegistry::new();

        assert_eq!(
            anchors.define_output(AnchorOptions::default()).unwrap_err(),
            ConfigurationError::MissingOutputName
        );
        assert_eq!(
            anchors.define_output(AnchorOptions::named("")).unwrap_err(),
            ConfigurationError::MissingOutputName
        );
    }
}
