use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named variable in a run's shared variable table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub value: Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub var_type: Option<String>,
}

/// The run-wide variable table (`name -> {value, type}`)
///
/// Cloning the table shares it; every node of a run sees the same entries.
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    entries: Arc<RwLock<HashMap<String, Variable>>>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The value of a variable, if set
    pub fn get(&self, name: &str) -> Option<Value> {
        self.entry(name).map(|variable| variable.value)
    }

    /// The full variable entry, including its type
    pub fn entry(&self, name: &str) -> Option<Variable> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Set (or replace) a variable
    pub fn set(&self, name: impl Into<String>, value: Value, var_type: Option<String>) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.into(), Variable { value, var_type });
    }

    pub fn remove(&self, name: &str) -> Option<Variable> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name)
    }

    /// A copy of every variable currently set
    pub fn snapshot(&self) -> HashMap<String, Variable> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl FromIterator<(String, Value)> for VariableTable {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let table = VariableTable::new();
        for (name, value) in iter {
            table.set(name, value, None);
        }
        table
    }
}
