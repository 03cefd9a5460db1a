use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{Map, Value};

#[derive(Debug, Default)]
struct MemoryInner {
    values: RwLock<Map<String, Value>>,
    children: Mutex<HashMap<String, Memory>>,
}

/// Key/value memory kept by a session for its components
///
/// Cloning shares the memory. Sub-memories are created on first use and the
/// same one is returned for the same key afterwards.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    inner: Arc<MemoryInner>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner
            .values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner
            .values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner
            .values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key)
    }

    /// The values stored directly in this memory
    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner
            .values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The child memory for `key`
    pub fn sub_memory(&self, key: &str) -> Memory {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Whether two handles refer to the same memory
    pub fn ptr_eq(&self, other: &Memory) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
