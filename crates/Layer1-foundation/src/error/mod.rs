//! Error types for taskgate
//!
//! The engine distinguishes three terminal failure kinds: a user-cancellation
//! sentinel, a precondition (gate) failure wrapping the inner error, and the
//! opaque application error returned by the work closure. Cancellation is
//! checked via [`TaskError::is_cancelled`], never by string comparison.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for task outcomes
pub type TaskResult<V, E> = std::result::Result<V, TaskError<E>>;

/// A cloneable, type-erased error.
///
/// Condition trees and dependency tasks are heterogeneous, so their errors
/// are carried type-erased. `Arc` keeps them cheap to clone: every waiter on
/// a finished task observes the same recorded outcome.
pub type DynError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// taskgate error type for a task with application error `E`
#[derive(Debug, Clone, Error)]
pub enum TaskError<E> {
    /// The task was cancelled (explicitly, or by a gate that declined)
    #[error("task was cancelled")]
    Cancelled,

    /// A gate precondition failed while being evaluated
    #[error("{0}")]
    Condition(ConditionFailure),

    /// The application error produced by the work closure
    #[error("{0}")]
    App(E),
}

impl<E> TaskError<E> {
    /// Check whether this is the user-cancellation sentinel
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    /// Check whether this error came out of gate evaluation
    pub fn is_condition_failure(&self) -> bool {
        matches!(self, TaskError::Condition(_))
    }

    /// Get the application error, if that is what this is
    pub fn as_app(&self) -> Option<&E> {
        match self {
            TaskError::App(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<ConditionFailure> for TaskError<E> {
    fn from(failure: ConditionFailure) -> Self {
        TaskError::Condition(failure)
    }
}

/// An error produced while evaluating a task's gate
///
/// Wraps the inner error (a failed predicate or a failed dependency task)
/// behind an `Arc` so the failure can be observed by every waiter.
#[derive(Debug, Clone)]
pub struct ConditionFailure(DynError);

impl ConditionFailure {
    /// Wrap a concrete error
    pub fn new(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(error))
    }

    /// Wrap an already-erased error
    pub fn from_dyn(error: DynError) -> Self {
        Self(error)
    }

    /// The wrapped error
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl fmt::Display for ConditionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "condition evaluation failed: {}", self.0)
    }
}

impl std::error::Error for ConditionFailure {}
