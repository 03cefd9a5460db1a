use std::fmt;
use std::sync::Arc;

use crate::block::{BlockBehavior, BlockData, FromSettings};
use crate::registry::{titleize, ConfigurationError, FieldSchema};

/// Creates the behavior of one block instance from its document data
pub type BlockFactory =
    Arc<dyn Fn(&BlockData) -> Result<Arc<dyn BlockBehavior>, String> + Send + Sync>;

/// Class-level description of a block type
///
/// Immutable once built; shared by every instance of the type.
#[derive(Clone)]
pub struct BlockDefinition {
    type_name: String,
    title: String,
    description: Option<String>,
    static_description: Option<String>,
    categories: Vec<String>,
    schema: FieldSchema,
    entrance_point: bool,
    has_entrance: bool,
    has_settings: bool,
    force_description: bool,
    exit_names: Vec<String>,
    factory: BlockFactory,
}

impl fmt::Debug for BlockDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDefinition")
            .field("type_name", &self.type_name)
            .field("title", &self.title)
            .field("entrance_point", &self.entrance_point)
            .field("exit_names", &self.exit_names)
            .finish_non_exhaustive()
    }
}

impl BlockDefinition {
    pub fn builder(type_name: impl Into<String>) -> BlockDefinitionBuilder {
        BlockDefinitionBuilder::new(type_name.into())
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn static_description(&self) -> Option<&str> {
        self.static_description.as_deref()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Whether a run starts by evaluating blocks of this type
    pub fn entrance_point(&self) -> bool {
        self.entrance_point
    }

    /// Whether other blocks may point at blocks of this type
    pub fn has_entrance(&self) -> bool {
        self.has_entrance
    }

    pub fn has_settings(&self) -> bool {
        self.has_settings
    }

    pub fn force_description(&self) -> bool {
        self.force_description
    }

    pub fn exit_names(&self) -> &[String] {
        &self.exit_names
    }

    pub(crate) fn create_behavior(&self, data: &BlockData) -> Result<Arc<dyn BlockBehavior>, String> {
        (self.factory)(data)
    }
}

pub struct BlockDefinitionBuilder {
    type_name: String,
    title: Option<String>,
    description: Option<String>,
    static_description: Option<String>,
    categories: Vec<String>,
    schema: FieldSchema,
    entrance_point: bool,
    has_entrance: bool,
    has_settings: bool,
    force_description: bool,
    exit_names: Vec<String>,
    factory: Option<BlockFactory>,
}

impl BlockDefinitionBuilder {
    fn new(type_name: String) -> Self {
        Self {
            type_name,
            title: None,
            description: None,
            static_description: None,
            categories: Vec::new(),
            schema: FieldSchema::default(),
            entrance_point: false,
            has_entrance: true,
            has_settings: true,
            force_description: false,
            exit_names: vec!["true".to_string(), "false".to_string()],
            factory: None,
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

    pub fn static_description(mut self, description: impl Into<String>) -> Self {
        self.static_description = Some(description.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        let category = category.into();
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
        self
    }

    pub fn schema(mut self, schema: FieldSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn entrance_point(mut self, entrance_point: bool) -> Self {
        self.entrance_point = entrance_point;
        self
    }

    pub fn has_entrance(mut self, has_entrance: bool) -> Self {
        self.has_entrance = has_entrance;
        self
    }

    pub fn has_settings(mut self, has_settings: bool) -> Self {
        self.has_settings = has_settings;
        self
    }

    pub fn force_description(mut self, force: bool) -> Self {
        self.force_description = force;
        self
    }

    pub fn exit_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exit_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Build instances with a custom factory
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&BlockData) -> Result<Arc<dyn BlockBehavior>, String> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Build instances of `T` from each block's settings
    pub fn behavior<T>(self) -> Self
    where
        T: BlockBehavior + FromSettings,
    {
        self.factory(|data| {
            let behavior = T::from_settings(&data.settings)?;
            Ok(Arc::new(behavior) as Arc<dyn BlockBehavior>)
        })
    }

    pub fn build(self) -> Result<BlockDefinition, ConfigurationError> {
        if self.type_name.is_empty() {
            return Err(ConfigurationError::MissingTypeName);
        }

        let factory = self
            .factory
            .ok_or_else(|| ConfigurationError::MissingBehavior(self.type_name.clone()))?;

        Ok(BlockDefinition {
            title: self.title.unwrap_or_else(|| titleize(&self.type_name)),
            type_name: self.type_name,
            description: self.description,
            static_description: self.static_description.filter(|d| !d.is_empty()),
            categories: self.categories,
            schema: self.schema,
            entrance_point: self.entrance_point,
            has_entrance: self.has_entrance,
            has_settings: self.has_settings,
            force_description: self.force_description,
            exit_names: self.exit_names,
            factory,
        })
    }
}
