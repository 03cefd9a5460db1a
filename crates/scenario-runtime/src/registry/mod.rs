//! Node type registry
//!
//! Node types are registered explicitly, once, at startup. A run-context
//! looks block and component types up here by the `type` name stored in the
//! graph document. The registry also produces the projections a host hands
//! to its editor: per-type [`ClientDescriptor`]s and the [`CatalogEntry`]
//! listing.

mod descriptor;

use std::sync::Arc;

use indexmap::IndexMap;

pub use descriptor::{
    AnchorDescriptor, CatalogButton, CatalogEntry, ClientDescriptor, FieldDefinition, FieldSchema,
};

use crate::block::BlockDefinition;
use crate::component::ComponentDefinition;

/// Errors in node type definitions, raised when a type is defined or registered
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Each component output requires a valid name")]
    MissingOutputName,

    #[error("Input handler {handler} has no usable name, pass one in the input options")]
    MissingInputName { handler: String },

    #[error("Node types require a type name")]
    MissingTypeName,

    #[error("Block type {0} has no behavior")]
    MissingBehavior(String),

    #[error("Node type {0} is already registered")]
    DuplicateType(String),
}

/// Every node type known to a host
#[derive(Debug, Default, Clone)]
pub struct NodeRegistry {
    blocks: IndexMap<String, Arc<BlockDefinition>>,
    components: IndexMap<String, Arc<ComponentDefinition>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in blocks and components
    pub fn with_builtins() -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        registry.register_builtins()?;
        Ok(registry)
    }

    pub fn register_builtins(&mut self) -> Result<(), ConfigurationError> {
        for definition in crate::block::builtin::definitions()? {
            self.register_block(definition)?;
        }

        for definition in crate::component::builtin::definitions()? {
            self.register_component(definition)?;
        }

        Ok(())
    }

    /// # Errors
    /// Fails with [`ConfigurationError::DuplicateType`] when a block type with
    /// the same name is already registered
    pub fn register_block(&mut self, definition: BlockDefinition) -> Result<Arc<BlockDefinition>, ConfigurationError> {
        let type_name = definition.type_name().to_string();
        if self.blocks.contains_key(&type_name) {
            return Err(ConfigurationError::DuplicateType(type_name));
        }

        tracing::debug!("Registered block type {type_name}");
        let definition = Arc::new(definition);
        self.blocks.insert(type_name, Arc::clone(&definition));
        Ok(definition)
    }

    /// # Errors
    /// Fails with [`ConfigurationError::DuplicateType`] when a component type
    /// with the same name is already registered
    pub fn register_component(
        &mut self,
        definition: ComponentDefinition,
    ) -> Result<Arc<ComponentDefinition>, ConfigurationError> {
        let type_name = definition.type_name().to_string();
        if self.components.contains_key(&type_name) {
            return Err(ConfigurationError::DuplicateType(type_name));
        }

        tracing::debug!("Registered component type {type_name}");
        let definition = Arc::new(definition);
        self.components.insert(type_name, Arc::clone(&definition));
        Ok(definition)
    }

    pub fn block(&self, type_name: &str) -> Option<Arc<BlockDefinition>> {
        self.blocks.get(type_name).cloned()
    }

    pub fn component(&self, type_name: &str) -> Option<Arc<ComponentDefinition>> {
        self.components.get(type_name).cloned()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Arc<BlockDefinition>> {
        self.blocks.values()
    }

    pub fn components(&self) -> impl Iterator<Item = &Arc<ComponentDefinition>> {
        self.components.values()
    }

    /// Listing of every component type, in registration order
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.components
            .values()
            .map(|definition| CatalogEntry::from(&definition.client_descriptor()))
            .collect()
    }

    /// Client descriptor of every component type, keyed by type name
    pub fn client_info(&self) -> IndexMap<String, ClientDescriptor> {
        self.components
            .values()
            .map(|definition| (definition.name().to_string(), definition.client_descriptor()))
            .collect()
    }
}

/// `"compare_variable"` -> `"Compare Variable"`
pub(crate) fn titleize(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `"HttpRelay"` -> `"http_relay"`
pub(crate) fn snake_case(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 4);
    let mut previous_lower = false;

    for c in name.chars() {
        if c.is_uppercase() {
            if previous_lower {
                result.push('_');
            }
            result.extend(c.to_lowercase());
            previous_lower = false;
        } else if c == '-' || c.is_whitespace() {
            result.push('_');
            previous_lower = false;
        } else {
            result.push(c);
            previous_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }

    result
}
