use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// A configurable field of a node type
#[derive(TS, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[ts(export)]
pub struct FieldDefinition {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub default: Option<Value>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            title: None,
            default: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// The configuration schema of a node type
///
/// Only the shape is tracked here; validating settings against it is left to
/// the host.
#[derive(TS, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[ts(export)]
pub struct FieldSchema {
    pub fields: Vec<FieldDefinition>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing an earlier one with the same name
    pub fn field(mut self, field: FieldDefinition) -> Self {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// Client-facing projection of an anchor
#[derive(TS, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[ts(export)]
pub struct AnchorDescriptor {
    pub name: String,
    pub title: String,
    #[serde(rename = "type")]
    pub value_type: Option<String>,
}

/// What a host's editor needs to render a component type in its palette
#[derive(TS, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[ts(export)]
pub struct ClientDescriptor {
    pub name: String,
    pub type_name: String,
    pub schema: FieldSchema,
    pub categories: Vec<String>,
    pub title: String,
    pub description: Option<String>,
    pub inputs: Vec<AnchorDescriptor>,
    pub outputs: Vec<AnchorDescriptor>,

    /// Only present for types that extend another concrete type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub parent: Option<String>,
}

/// An action the editor offers on a catalog entry
#[derive(TS, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[ts(export)]
pub struct CatalogButton {
    pub name: String,
    pub title: String,
}

impl CatalogButton {
    pub(crate) fn config() -> Self {
        Self {
            name: "config".to_string(),
            title: "Config".to_string(),
        }
    }
}

/// One entry of the registry-wide component listing
#[derive(TS, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[ts(export)]
pub struct CatalogEntry {
    pub name: String,
    pub title: String,
    pub description: String,
    pub inputs: Vec<AnchorDescriptor>,
    pub outputs: Vec<AnchorDescriptor>,
    pub field_count: usize,
    pub schema: FieldSchema,
    pub buttons: Vec<CatalogButton>,
}

impl From<&ClientDescriptor> for CatalogEntry {
    fn from(descriptor: &ClientDescriptor) -> Self {
        let field_count = descriptor.schema.field_count();
        let buttons = if field_count > 0 {
            vec![CatalogButton::config()]
        } else {
            Vec::new()
        };

        Self {
            name: descriptor.name.clone(),
            title: descriptor.title.clone(),
            description: format!("{} component", descriptor.title),
            inputs: descriptor.inputs.clone(),
            outputs: descriptor.outputs.clone(),
            field_count,
            schema: descriptor.schema.clone(),
            buttons,
        }
    }
}
