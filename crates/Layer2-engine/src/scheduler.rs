//! Scheduler adapter - maps the engine onto a tokio runtime
//!
//! Raw concurrency is an external collaborator: work closures run on tokio's
//! blocking pool, admission-bounded by a semaphore (the "execution lane").
//! Condition evaluation, mutual-exclusion acquisition and awaiter watchers
//! run on the same pool but *without* an execution permit (the "watcher
//! lane"), so a task blocked on its own gate can never starve the pool that
//! would run it.

use std::cell::Cell;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

thread_local! {
    static BLOCKING_FORBIDDEN: Cell<bool> = const { Cell::new(false) };
}

/// Mark the current thread as non-blockable.
///
/// A blocking `Task::wait` on a thread so marked is a deadlock hazard (the
/// thread may be needed to make progress on the very task being awaited);
/// after this call it panics instead. Typically called once from a UI or
/// event-loop thread.
pub fn forbid_blocking_wait() {
    BLOCKING_FORBIDDEN.with(|flag| flag.set(true));
}

pub(crate) fn assert_blocking_allowed() {
    BLOCKING_FORBIDDEN.with(|flag| {
        assert!(
            !flag.get(),
            "blocking wait called on a thread marked non-blockable; \
             use an awaiter subscription instead"
        );
    });
}

/// Adapter handing work to a bounded pool with a separate watcher lane
#[derive(Clone)]
pub(crate) struct Scheduler {
    handle: Handle,
    execution: Arc<Semaphore>,
}

impl Scheduler {
    pub(crate) fn new(handle: Handle, max_concurrent: usize) -> Self {
        debug!(max_concurrent, "scheduler created");
        Self {
            handle,
            execution: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Wait for an execution-lane slot
    pub(crate) async fn acquire_execution_slot(&self) -> OwnedSemaphorePermit {
        Arc::clone(&self.execution)
            .acquire_owned()
            .await
            .expect("execution semaphore closed")
    }

    /// Run a blocking closure on the watcher lane (no execution permit)
    pub(crate) fn run_blocking(&self, f: impl FnOnce() + Send + 'static) {
        self.handle.spawn_blocking(f);
    }

    /// Execution-lane slots currently free
    pub(crate) fn available_slots(&self) -> usize {
        self.execution.available_permits()
    }
}
