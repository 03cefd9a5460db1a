use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::node::EvaluationError;

/// A command a block sends to its run instead of (or before) completing
///
/// Commands never cause the block's exits to be followed. A command carrying
/// a `silent_value` still updates the block's stored result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silent_value: Option<Value>,
}

impl Default for Command {
    fn default() -> Self {
        Self::ignore()
    }
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            silent_value: None,
        }
    }

    /// The command used when a block has nothing specific to say
    pub fn ignore() -> Self {
        Self::new("ignore")
    }

    /// Record `value` without following any exit
    pub fn silent(value: Value) -> Self {
        Self {
            name: "ignore".to_string(),
            silent_value: Some(value),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Response {
    Done(Result<Value, EvaluationError>),
    Command(Command),
}

#[derive(Debug)]
struct Inner {
    tx: mpsc::UnboundedSender<Response>,
    done: AtomicBool,
    commanded: AtomicBool,
}

/// Completes one evaluation of a block
///
/// Cheap to clone; every clone refers to the same evaluation. Every
/// completion and command is delivered and updates the block's stored
/// result, but only the first of each fires the caller's callback; the two
/// are tracked independently. When every clone is dropped without completing,
/// the evaluation simply never completes.
#[derive(Debug, Clone)]
pub struct Responder {
    inner: Arc<Inner>,
}

impl Responder {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Response>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tx,
                done: AtomicBool::new(false),
                commanded: AtomicBool::new(false),
            }),
        }
    }

    /// Complete the evaluation
    ///
    /// Returns false if it was already completed; the new result is still
    /// stored but nothing downstream fires again.
    pub fn complete(&self, result: Result<Value, EvaluationError>) -> bool {
        let first = !self.inner.done.swap(true, Ordering::SeqCst);
        if !first {
            tracing::trace!("Repeated completion of an evaluation, storing result only");
        }

        // The receiving side is gone once the run was torn down
        let _ = self.inner.tx.send(Response::Done(result));
        first
    }

    pub fn ok(&self, value: impl Into<Value>) -> bool {
        self.complete(Ok(value.into()))
    }

    pub fn fail(&self, error: impl Into<EvaluationError>) -> bool {
        self.complete(Err(error.into()))
    }

    /// Send a command. Returns false if a command was already sent.
    ///
    /// Later commands still record their silent value.
    pub fn command(&self, command: Command) -> bool {
        let first = !self.inner.commanded.swap(true, Ordering::SeqCst);
        let _ = self.inner.tx.send(Response::Command(command));
        first
    }

    pub fn is_completed(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }
}
