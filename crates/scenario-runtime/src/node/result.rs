use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors produced while evaluating a node
///
/// Evaluation errors are local to the node's callback chain. They are stored
/// as the node's `result_err` and handed to whoever started the evaluation;
/// they never abort sibling nodes or the run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("Evaluation failed: {0}")]
    Failed(String),

    #[error("Evaluation hook panicked: {0}")]
    Panicked(String),
}

impl From<Box<dyn std::error::Error + Send + Sync>> for EvaluationError {
    fn from(error: Box<dyn std::error::Error + Send + Sync>) -> Self {
        EvaluationError::Failed(error.to_string())
    }
}

impl From<&str> for EvaluationError {
    fn from(message: &str) -> Self {
        EvaluationError::Failed(message.to_string())
    }
}

impl From<String> for EvaluationError {
    fn from(message: String) -> Self {
        EvaluationError::Failed(message)
    }
}

/// The result a node keeps on itself for the remainder of the run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSlot {
    pub has_result_value: bool,
    pub has_silent_value: bool,
    pub result_value: Option<Value>,
    pub result_err: Option<EvaluationError>,
}

impl ResultSlot {
    pub(crate) fn record(
        &mut self,
        err: Option<EvaluationError>,
        value: Option<Value>,
        silent: bool,
    ) {
        self.has_result_value = true;
        self.has_silent_value = silent;
        self.result_value = value;
        self.result_err = err;
    }

    /// The form handed to the result persistence bridge
    pub fn to_stored(&self) -> StoredResult {
        StoredResult {
            value: self.result_value.clone(),
            error: self.result_err.as_ref().map(|e| e.to_string()),
            silent: self.has_silent_value,
        }
    }
}

/// A persisted result value, as kept per scope and node by the run-context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub silent: bool,
}

impl StoredResult {
    /// Whether anything was ever stored in this slot
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.error.is_none()
    }
}
