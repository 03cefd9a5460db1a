use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::component::{AnchorOptions, AnchorRegistry, ComponentNode, InputHandler};
use crate::node::BootError;
use crate::registry::{
    snake_case, titleize, AnchorDescriptor, ClientDescriptor, ConfigurationError, FieldSchema,
};

/// Boot hook of a component type
#[async_trait]
pub trait ComponentBoot: Send + Sync {
    async fn boot(&self, component: Arc<ComponentNode>) -> Result<(), BootError>;
}

#[async_trait]
impl<F, Fut> ComponentBoot for F
where
    F: Fn(Arc<ComponentNode>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BootError>> + Send + 'static,
{
    async fn boot(&self, component: Arc<ComponentNode>) -> Result<(), BootError> {
        (self)(component).await
    }
}

/// Class-level description of a component type
#[derive(Clone)]
pub struct ComponentDefinition {
    name: String,
    type_name: String,
    title: String,
    description: Option<String>,
    categories: Vec<String>,
    schema: FieldSchema,
    anchors: AnchorRegistry,
    parent: Option<String>,
    boot: Option<Arc<dyn ComponentBoot>>,
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("anchors", &self.anchors)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

impl ComponentDefinition {
    /// Start defining a component type called `name` (e.g. `"HttpRelay"`)
    pub fn builder(name: impl Into<String>) -> ComponentDefinitionBuilder {
        ComponentDefinitionBuilder::new(name.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name graph documents refer to this type by (e.g. `"http_relay"`)
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn anchors(&self) -> &AnchorRegistry {
        &self.anchors
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub(crate) fn boot_hook(&self) -> Option<&Arc<dyn ComponentBoot>> {
        self.boot.as_ref()
    }

    /// The projection a host exposes to its editor
    pub fn client_descriptor(&self) -> ClientDescriptor {
        ClientDescriptor {
            name: self.name.clone(),
            type_name: self.type_name.clone(),
            schema: self.schema.clone(),
            categories: self.categories.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            inputs: self.anchors.inputs().map(AnchorDescriptor::from).collect(),
            outputs: self.anchors.outputs().map(AnchorDescriptor::from).collect(),
            parent: self.parent.clone(),
        }
    }
}

/// Builder for [`ComponentDefinition`]
///
/// Anchor definition errors are kept and reported by
/// [`ComponentDefinitionBuilder::build`].
pub struct ComponentDefinitionBuilder {
    name: String,
    title: Option<String>,
    description: Option<String>,
    categories: Vec<String>,
    schema: FieldSchema,
    inherited_schema: FieldSchema,
    anchors: AnchorRegistry,
    parent: Option<String>,
    boot: Option<Arc<dyn ComponentBoot>>,
    error: Option<ConfigurationError>,
}

impl ComponentDefinitionBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            title: None,
            description: None,
            categories: Vec::new(),
            schema: FieldSchema::default(),
            inherited_schema: FieldSchema::default(),
            anchors: AnchorRegistry::new(),
            parent: None,
            boot: None,
            error: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        let category = category.into();
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
        self
    }

    /// This type's own configuration fields
    ///
    /// Inherited fields are kept; a field of the same name replaces them.
    pub fn schema(mut self, schema: FieldSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Inherit anchors, categories, schema fields and boot hook of `parent`
    ///
    /// This type's own anchors and fields override the inherited ones,
    /// whether they are defined before or after this call.
    pub fn extends(mut self, parent: &ComponentDefinition) -> Self {
        self.anchors.inherit(&parent.anchors);

        for category in &parent.categories {
            if !self.categories.contains(category) {
                self.categories.push(category.clone());
            }
        }

        self.inherited_schema = parent.schema.clone();

        if self.boot.is_none() {
            self.boot = parent.boot.clone();
        }

        self.parent = Some(parent.name.clone());
        self
    }

    pub fn input<F>(mut self, handler: F, options: AnchorOptions) -> Self
    where
        F: InputHandler + 'static,
    {
        if self.error.is_none() {
            if let Err(e) = self.anchors.define_input(handler, options) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn output(self, name: impl Into<String>) -> Self {
        self.output_with(AnchorOptions::named(name))
    }

    pub fn output_with(mut self, options: AnchorOptions) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.anchors.define_output(options) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn boot<B>(mut self, hook: B) -> Self
    where
        B: ComponentBoot + 'static,
    {
        self.boot = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<ComponentDefinition, ConfigurationError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        if self.name.is_empty() {
            return Err(ConfigurationError::MissingTypeName);
        }

        let type_name = snake_case(&self.name);
        let schema = self
            .schema
            .fields
            .into_iter()
            .fold(self.inherited_schema, FieldSchema::field);

        Ok(ComponentDefinition {
            title: self.title.unwrap_or_else(|| titleize(&type_name)),
            name: self.name,
            type_name,
            description: self.description,
            categories: self.categories,
            schema,
            anchors: self.anchors,
            parent: self.parent,
            boot: self.boot,
        })
    }
}
