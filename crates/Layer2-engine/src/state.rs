//! Task lifecycle state machine
//!
//! The transition table below is the mechanism that prevents double-execution
//! and double-finish races: every transition is checked, and an illegal one is
//! a programming error inside the engine, not a recoverable condition.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Lifecycle states of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Task has been constructed but not handed to the scheduler
    Initialized,

    /// Task has been handed to the scheduler
    Pending,

    /// Task's gate is being evaluated
    EvaluatingConditions,

    /// Task is ready to execute
    Ready,

    /// Task's work closure is running
    Executing,

    /// A result or cancellation has been recorded; observers are being notified
    Finishing,

    /// Observer dispatch is complete
    Finished,
}

impl TaskState {
    /// Check whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, next),
            (Initialized, Pending)
                | (Pending, EvaluatingConditions)
                | (Pending, Ready)
                | (Pending, Finishing)
                | (EvaluatingConditions, Ready)
                | (EvaluatingConditions, Finishing)
                | (Ready, Executing)
                | (Ready, Finishing)
                | (Executing, Finishing)
                | (Finishing, Finished)
        )
    }

    /// Check if this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished)
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskState::Initialized => "Initialized",
            TaskState::Pending => "Pending",
            TaskState::EvaluatingConditions => "EvaluatingConditions",
            TaskState::Ready => "Ready",
            TaskState::Executing => "Executing",
            TaskState::Finishing => "Finishing",
            TaskState::Finished => "Finished",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Thread-safe holder for a task's current state
///
/// `advance` is for transitions driven by a single thread (construction and
/// the finishing sequence, which only the result-cell winner runs) and panics
/// on an illegal edge. `try_advance` is for the driver, whose transitions
/// race with cancellation; it moves only when the current state still matches.
#[derive(Debug)]
pub(crate) struct StateCell {
    current: Mutex<TaskState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            current: Mutex::new(TaskState::Initialized),
        }
    }

    pub(crate) fn get(&self) -> TaskState {
        *self.current.lock()
    }

    /// Unconditionally advance to `next`, panicking on an illegal transition
    pub(crate) fn advance(&self, next: TaskState) {
        let mut current = self.current.lock();
        assert!(
            current.can_transition_to(next),
            "illegal task state transition: {} -> {}",
            *current,
            next
        );
        *current = next;
    }

    /// Advance from `from` to `to` only if the state has not moved on
    pub(crate) fn try_advance(&self, from: TaskState, to: TaskState) -> bool {
        let mut current = self.current.lock();
        if *current != from {
            return false;
        }
        debug_assert!(current.can_transition_to(to));
        *current = to;
        true
    }
}
