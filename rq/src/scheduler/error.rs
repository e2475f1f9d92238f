//! Outcome error types

use thiserror::Error;

/// Why a submitted work item did not produce a value
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError<E> {
    /// The work item settled with its own error, passed through untouched
    #[error("work item failed: {0}")]
    Failed(E),

    /// The work item panicked while starting or while being polled
    #[error("work item panicked: {0}")]
    Panicked(String),

    /// The scheduler stopped before the work item ran
    #[error("scheduler closed before the work item ran")]
    Closed,
}

impl<E> TaskError<E> {
    /// The work item's own error, if that is what this is
    pub fn into_failure(self) -> Option<E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, TaskError::Closed)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }
}

/// Best-effort text from a panic payload
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
