//! taskgate-engine - gated task/future engine
//!
//! Features:
//! - Write-once task outcomes with blocking waits and callback awaiters
//! - Seven-state lifecycle machine with observer hooks at every edge
//! - Composable cancellation tokens with run-once handler chains
//! - Condition gates: predicates, delays, boolean composition, lazily
//!   started dependency tasks
//! - Named mutual-exclusion categories with FIFO admission
//! - `all`/`any` combinators over groups of tasks
//!
//! Entry point is [`Engine`]: spawn work closures through it, wait on the
//! returned [`Task`] handles (or subscribe via [`TaskAwaiter`]), and compose
//! preconditions with [`Condition`].

pub mod awaiter;
pub mod cancellation;
pub mod cell;
pub mod combine;
pub mod condition;
pub mod engine;
pub mod exclusivity;
pub mod observer;
pub mod scheduler;
pub mod state;
pub mod task;

pub use awaiter::{CallbackContext, InlineContext, NonFailableTaskAwaiter, TaskAwaiter};
pub use cancellation::Cancellation;
pub use combine::{all, any};
pub use condition::{Condition, ConditionResult};
pub use engine::{Engine, EngineConfig, EngineStats, SpawnOptions};
pub use exclusivity::{CategoryLease, ExclusivityRegistry};
pub use observer::TaskObserver;
pub use scheduler::forbid_blocking_wait;
pub use state::TaskState;
pub use task::{NonFailableTask, Task, TaskHandle, WeakTask};

// Foundation re-exports so most callers need only this crate
pub use taskgate_foundation::{
    ConditionFailure, DynError, Priority, TaskError, TaskId, TaskResult,
};
