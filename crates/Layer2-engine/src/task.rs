//! Task - a handle to a unit of asynchronous work and its eventual outcome
//!
//! A task combines a result cell, a cancellation token, any category leases
//! its gate acquired, and an observer list, and drives itself through the
//! lifecycle state machine in `state`. Handles are cheap clones over a
//! shared core; the scheduler holds one for the whole flight, so a task that
//! is already executing runs to completion even if the caller drops every
//! handle.
//!
//! Concurrency contract: `finish`, `fail` and `cancel` may be called from
//! any thread and race freely; the result cell linearizes them and only the
//! winning outcome is ever observed. The finishing sequence (lease release,
//! observer dispatch, waiter wake-up) runs exactly once, on the winner's
//! thread.

use crate::cancellation::Cancellation;
use crate::cell::ResultCell;
use crate::exclusivity::CategoryLease;
use crate::observer::{ObserverList, TaskObserver};
use crate::scheduler::assert_blocking_allowed;
use crate::state::{StateCell, TaskState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::{Arc, Weak};
use std::time::Duration;
use taskgate_foundation::{TaskError, TaskId, TaskResult};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info};

/// How a task reached its terminal outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompletionKind {
    Success,
    Failure,
    Cancelled,
}

struct TaskTimes {
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// Shared state behind every task handle
pub(crate) struct Core<V, Err> {
    id: TaskId,
    state: StateCell,
    cell: ResultCell<V, Err>,
    observers: ObserverList,
    leases: Mutex<Vec<CategoryLease>>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    times: Mutex<TaskTimes>,
}

impl<V, Err> Core<V, Err> {
    pub(crate) fn new(observers: Vec<TaskObserver>) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::new(),
            state: StateCell::new(),
            cell: ResultCell::new(),
            observers: ObserverList::new(observers),
            leases: Mutex::new(Vec::new()),
            permit: Mutex::new(None),
            times: Mutex::new(TaskTimes {
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
            }),
        })
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state.get()
    }

    pub(crate) fn cell(&self) -> &ResultCell<V, Err> {
        &self.cell
    }

    pub(crate) fn advance(&self, next: TaskState) {
        self.state.advance(next);
    }

    pub(crate) fn try_advance(&self, from: TaskState, to: TaskState) -> bool {
        self.state.try_advance(from, to)
    }

    /// Keep the gate's category leases until the task finishes.
    ///
    /// The outcome check runs under the lease lock: if the task finished
    /// while its gate was still being evaluated, the freshly acquired leases
    /// are dropped (released) right here instead of being stored, and the
    /// finisher's own clearing pass cannot miss them.
    pub(crate) fn store_leases(&self, leases: Vec<CategoryLease>) {
        let mut held = self.leases.lock();
        if self.cell.has_outcome() {
            drop(leases);
            return;
        }
        *held = leases;
    }

    /// Hold the execution-lane permit until the task finishes
    pub(crate) fn store_permit(&self, permit: OwnedSemaphorePermit) {
        let mut held = self.permit.lock();
        if self.cell.has_outcome() {
            return;
        }
        *held = Some(permit);
    }

    /// Move `Ready -> Executing` and fire the start observers.
    ///
    /// Returns `false` when the task was finished (cancelled) first, in
    /// which case the work closure must not run.
    pub(crate) fn begin_executing(&self) -> bool {
        if !self.state.try_advance(TaskState::Ready, TaskState::Executing) {
            debug!(task = %self.id, "skipping execution: task already finishing");
            return false;
        }

        self.observers.will_start(self.id);
        self.times.lock().started_at = Some(Utc::now());
        self.observers.did_start(self.id);
        true
    }

    /// Record the outcome and, if this call won, run the finishing sequence.
    ///
    /// Sequence order: Finishing transition, category-lease release,
    /// will-finish observers, Finished transition, did-finish observers
    /// (plus did-cancel or did-finish-with-error), then waiter wake-up.
    /// The cell lock is never held across any of it.
    pub(crate) fn finish_with(&self, outcome: Result<V, Err>, kind: CompletionKind) -> bool {
        if !self.cell.try_finish(outcome) {
            return false;
        }

        self.state.advance(TaskState::Finishing);
        self.leases.lock().clear();
        self.permit.lock().take();
        self.times.lock().completed_at = Some(Utc::now());

        self.observers.will_finish(self.id);
        self.state.advance(TaskState::Finished);
        self.observers.did_finish(self.id);
        match kind {
            CompletionKind::Success => {}
            CompletionKind::Failure => self.observers.did_finish_with_error(self.id),
            CompletionKind::Cancelled => self.observers.did_cancel(self.id),
        }

        self.cell.seal();
        debug!(task = %self.id, ?kind, "task finished");
        true
    }

    /// Execution duration, if the task has started
    pub(crate) fn duration(&self) -> Option<Duration> {
        let times = self.times.lock();
        let start = times.started_at?;
        let end = times.completed_at.unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }

    pub(crate) fn created_at(&self) -> DateTime<Utc> {
        self.times.lock().created_at
    }
}

// ============================================================================
// Failable task
// ============================================================================

/// A failable task handle
///
/// `V` is the success value, `E` the opaque application error. Handles are
/// cheap to clone and all point at the same outcome.
pub struct Task<V, E> {
    core: Arc<Core<V, TaskError<E>>>,
    cancellation: Arc<Cancellation>,
}

impl<V, E> Clone for Task<V, E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            cancellation: Arc::clone(&self.cancellation),
        }
    }
}

impl<V, E> Task<V, E>
where
    V: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(observers: Vec<TaskObserver>) -> Self {
        Self {
            core: Core::new(observers),
            cancellation: Arc::new(Cancellation::new()),
        }
    }

    pub(crate) fn core(&self) -> &Arc<Core<V, TaskError<E>>> {
        &self.core
    }

    /// Diagnostic identifier (logs and stats only)
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Record success. No-op if a terminal outcome already exists.
    pub fn finish(&self, value: V) {
        self.core.finish_with(Ok(value), CompletionKind::Success);
    }

    /// Record failure with an application error. No-op after any outcome.
    pub fn fail(&self, error: E) {
        self.core
            .finish_with(Err(TaskError::App(error)), CompletionKind::Failure);
    }

    /// Record failure with an engine-level error (used by gates and combinators)
    pub(crate) fn fail_with(&self, error: TaskError<E>) {
        let kind = if error.is_cancelled() {
            CompletionKind::Cancelled
        } else {
            CompletionKind::Failure
        };
        self.core.finish_with(Err(error), kind);
    }

    /// Cancel the task: fire the cancellation token, then record the
    /// cancellation sentinel if no outcome exists yet.
    ///
    /// Idempotent. A cancellation racing a natural finish never overwrites
    /// the recorded outcome, though the handlers may still have run.
    pub fn cancel(&self) {
        self.cancellation.run();
        if self
            .core
            .finish_with(Err(TaskError::Cancelled), CompletionKind::Cancelled)
        {
            info!(task = %self.core.id(), "task cancelled");
        }
    }

    /// The task's cancellation token
    ///
    /// Parent/child cancellation is wired explicitly through this token:
    /// register a handler that cancels (a weak handle to) the other task, in
    /// whichever direction the call site needs.
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Check whether cancellation has been requested.
    ///
    /// This is what a running closure polls at safe points; it reflects the
    /// token, not the recorded outcome (a task can finish successfully even
    /// after a late cancellation request).
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.has_fired()
    }

    /// Check whether the task has fully finished (observers included)
    pub fn is_finished(&self) -> bool {
        self.core.cell().is_finished()
    }

    /// Execution duration, if the task has started
    pub fn duration(&self) -> Option<Duration> {
        self.core.duration()
    }

    /// Downgrade to a weak handle that does not keep the task alive
    pub fn downgrade(&self) -> WeakTask<V, E> {
        WeakTask {
            core: Arc::downgrade(&self.core),
            cancellation: Arc::downgrade(&self.cancellation),
        }
    }
}

impl<V, E> Task<V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Block the calling thread until the task finishes, then return the
    /// recorded outcome.
    ///
    /// Idempotent: repeated calls return the same outcome. Panics on a
    /// thread marked with [`crate::forbid_blocking_wait`] — blocking there
    /// risks deadlock against the task's own progress.
    pub fn wait(&self) -> TaskResult<V, E> {
        assert_blocking_allowed();
        self.core.cell().wait()
    }

    /// Read the outcome without blocking; `None` until the task finishes
    pub fn try_result(&self) -> Option<TaskResult<V, E>> {
        self.core.cell().try_get()
    }
}

/// Weak task handle, used by timers and cancellation wiring so that a
/// finished task does not outlive them
pub struct WeakTask<V, E> {
    core: Weak<Core<V, TaskError<E>>>,
    cancellation: Weak<Cancellation>,
}

impl<V, E> Clone for WeakTask<V, E> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
            cancellation: Weak::clone(&self.cancellation),
        }
    }
}

impl<V, E> WeakTask<V, E> {
    pub fn upgrade(&self) -> Option<Task<V, E>> {
        Some(Task {
            core: self.core.upgrade()?,
            cancellation: self.cancellation.upgrade()?,
        })
    }
}

// ============================================================================
// Non-failable task
// ============================================================================

/// A task that cannot fail and cannot be cancelled
///
/// The error slot is structurally `Infallible`: there is no way to record an
/// error, so `wait` returns the value directly. If the engine ever produced
/// an error here it would be a fatal bug, and the `match` on the
/// uninhabited type makes that unrepresentable rather than recoverable.
pub struct NonFailableTask<V> {
    core: Arc<Core<V, Infallible>>,
}

impl<V> Clone for NonFailableTask<V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<V> NonFailableTask<V>
where
    V: Send + 'static,
{
    pub(crate) fn new(observers: Vec<TaskObserver>) -> Self {
        Self {
            core: Core::new(observers),
        }
    }

    pub(crate) fn core(&self) -> &Arc<Core<V, Infallible>> {
        &self.core
    }

    /// Diagnostic identifier
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Record the value. No-op if already finished.
    pub fn finish(&self, value: V) {
        self.core.finish_with(Ok(value), CompletionKind::Success);
    }

    /// Check whether the task has fully finished
    pub fn is_finished(&self) -> bool {
        self.core.cell().is_finished()
    }

    /// Execution duration, if the task has started
    pub fn duration(&self) -> Option<Duration> {
        self.core.duration()
    }
}

impl<V> NonFailableTask<V>
where
    V: Clone + Send + 'static,
{
    /// Block until the task finishes and return its value.
    ///
    /// Same blocking-context rules as [`Task::wait`].
    pub fn wait(&self) -> V {
        assert_blocking_allowed();
        match self.core.cell().wait() {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Read the value without blocking; `None` until the task finishes
    pub fn try_value(&self) -> Option<V> {
        match self.core.cell().try_get() {
            Some(Ok(value)) => Some(value),
            Some(Err(never)) => match never {},
            None => None,
        }
    }
}

// ============================================================================
// Type-erased handle
// ============================================================================

mod sealed {
    pub trait Sealed {}
    impl<V, E> Sealed for super::Task<V, E> {}
    impl<V> Sealed for super::NonFailableTask<V> {}
}

/// Type-erased view of a task, for heterogeneous collections and gates
///
/// Sealed: only the two task variants implement it.
pub trait TaskHandle: sealed::Sealed + Send + Sync {
    /// Diagnostic identifier
    fn id(&self) -> TaskId;

    /// Current lifecycle state
    fn state(&self) -> TaskState;

    /// Check whether the task has fully finished
    fn is_finished(&self) -> bool;

    /// Block until the task finishes, without reading the outcome
    fn wait_until_finished(&self);
}

impl<V, E> TaskHandle for Task<V, E>
where
    V: Send + 'static,
    E: Send + 'static,
{
    fn id(&self) -> TaskId {
        self.core.id()
    }

    fn state(&self) -> TaskState {
        self.core.state()
    }

    fn is_finished(&self) -> bool {
        self.core.cell().is_finished()
    }

    fn wait_until_finished(&self) {
        assert_blocking_allowed();
        self.core.cell().wait_until_sealed();
    }
}

impl<V> TaskHandle for NonFailableTask<V>
where
    V: Send + 'static,
{
    fn id(&self) -> TaskId {
        self.core.id()
    }

    fn state(&self) -> TaskState {
        self.core.state()
    }

    fn is_finished(&self) -> bool {
        self.core.cell().is_finished()
    }

    fn wait_until_finished(&self) {
        assert_blocking_allowed();
        self.core.cell().wait_until_sealed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ready_task<V: Clone + Send + 'static, E: Clone + Send + 'static>(
        observers: Vec<TaskObserver>,
    ) -> Task<V, E> {
        let task = Task::new(observers);
        task.core().advance(TaskState::Pending);
        task.core().advance(TaskState::Ready);
        task
    }

    #[test]
    fn finish_is_first_write_wins() {
        let task: Task<i32, String> = ready_task(vec![]);

        task.finish(1);
        task.finish(2);
        task.fail("late".into());
        task.cancel();

        assert_eq!(task.try_result().unwrap().unwrap(), 1);
        assert_eq!(task.wait().unwrap(), 1);
        assert_eq!(task.wait().unwrap(), 1);
        assert_eq!(task.state(), TaskState::Finished);
    }

    #[test]
    fn cancel_is_idempotent_and_sets_the_sentinel() {
        let task: Task<i32, String> = ready_task(vec![]);

        task.cancel();
        task.cancel();

        match task.wait() {
            Err(err) => assert!(err.is_cancelled()),
            Ok(_) => panic!("expected cancellation"),
        }
    }

    #[test]
    fn cancel_after_finish_keeps_the_result_but_fires_handlers() {
        let fired = Arc::new(AtomicUsize::new(0));
        let task: Task<i32, String> = ready_task(vec![]);

        {
            let fired = Arc::clone(&fired);
            task.cancellation().add_handler(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        task.finish(9);
        task.cancel();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(task.is_cancelled()); // the token fired...
        assert_eq!(task.wait().unwrap(), 9); // ...but the outcome stands
    }

    #[test]
    fn observer_sequence_for_a_cancelled_task() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let observer = {
            let e1 = Arc::clone(&events);
            let e2 = Arc::clone(&events);
            let e3 = Arc::clone(&events);
            let e4 = Arc::clone(&events);
            TaskObserver::new()
                .on_will_finish(move |_| e1.lock().push("will_finish"))
                .on_did_finish(move |_| e2.lock().push("did_finish"))
                .on_did_cancel(move |_| e3.lock().push("did_cancel"))
                .on_did_finish_with_error(move |_| e4.lock().push("did_finish_with_error"))
        };

        let task: Task<i32, String> = ready_task(vec![observer]);
        task.cancel();

        assert_eq!(*events.lock(), vec!["will_finish", "did_finish", "did_cancel"]);
    }

    #[test]
    fn non_failable_task_returns_its_value() {
        let task: NonFailableTask<&'static str> = NonFailableTask::new(vec![]);
        task.core().advance(TaskState::Pending);
        task.core().advance(TaskState::Ready);

        assert_eq!(task.try_value(), None);
        task.finish("done");
        assert_eq!(task.wait(), "done");
        assert_eq!(task.try_value(), Some("done"));
    }

    #[test]
    fn weak_handles_do_not_keep_the_core_alive() {
        let task: Task<i32, String> = ready_task(vec![]);
        let weak = task.downgrade();

        assert!(weak.upgrade().is_some());
        drop(task);
        assert!(weak.upgrade().is_none());
    }
}
