//! Engine - spawns tasks and drives them through their lifecycle
//!
//! Each engine owns a scheduler (bounded execution lane over tokio's
//! blocking pool) and a mutual-exclusion registry. Spawning returns the task
//! handle immediately; a driver future walks the task through gate
//! evaluation, admission and execution, bailing out at every step if a
//! cancellation already recorded an outcome.

use crate::awaiter::{NonFailableTaskAwaiter, TaskAwaiter};
use crate::condition::{self, Condition, Verdict};
use crate::exclusivity::ExclusivityRegistry;
use crate::observer::TaskObserver;
use crate::scheduler::Scheduler;
use crate::state::TaskState;
use crate::task::{NonFailableTask, Task, WeakTask};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskgate_foundation::{ConditionFailure, Priority, TaskError};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("condition evaluation panicked")]
struct GatePanicked;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of work closures executing at once
    pub max_concurrent: usize,

    /// Priority assigned to tasks that do not specify one
    pub default_priority: Priority,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            default_priority: Priority::Normal,
        }
    }
}

/// Per-spawn options
#[derive(Default)]
pub struct SpawnOptions {
    condition: Option<Condition>,
    observers: Vec<TaskObserver>,
    priority: Option<Priority>,
    timeout: Option<Duration>,
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate the task on a condition, evaluated once before execution
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Attach a lifecycle observer; observers fire in registration order
    pub fn with_observer(mut self, observer: TaskObserver) -> Self {
        self.observers.push(observer);
        self
    }

    /// Scheduling priority (diagnostic metadata; execution order is
    /// admission order)
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Cancel the task if it has not finished within `timeout` of spawning
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A point-in-time snapshot of engine counters
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub tasks_spawned: u64,
    pub available_slots: usize,
    pub max_concurrent: usize,
}

/// Task engine bound to a tokio runtime
pub struct Engine {
    scheduler: Scheduler,
    exclusivity: Arc<ExclusivityRegistry>,
    config: EngineConfig,
    spawned: AtomicU64,
}

impl Engine {
    /// Create an engine on the current tokio runtime.
    ///
    /// Panics outside a runtime context; use [`Engine::with_handle`] to bind
    /// an explicit runtime.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_handle(config, Handle::current())
    }

    pub fn with_handle(config: EngineConfig, handle: Handle) -> Self {
        Self {
            scheduler: Scheduler::new(handle, config.max_concurrent),
            exclusivity: Arc::new(ExclusivityRegistry::new()),
            config,
            spawned: AtomicU64::new(0),
        }
    }

    /// The engine's mutual-exclusion registry
    pub fn exclusivity(&self) -> &Arc<ExclusivityRegistry> {
        &self.exclusivity
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            tasks_spawned: self.spawned.load(Ordering::Relaxed),
            available_slots: self.scheduler.available_slots(),
            max_concurrent: self.config.max_concurrent,
        }
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Spawn a failable task from a plain work closure
    pub fn spawn<V, E, F>(&self, options: SpawnOptions, work: F) -> Task<V, E>
    where
        V: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Result<V, E> + Send + 'static,
    {
        self.spawn_with(options, move |_| work())
    }

    /// Spawn a failable task whose closure receives its own handle, for
    /// polling [`Task::is_cancelled`] at safe points
    pub fn spawn_with<V, E, F>(&self, options: SpawnOptions, work: F) -> Task<V, E>
    where
        V: Send + 'static,
        E: Send + 'static,
        F: FnOnce(&Task<V, E>) -> Result<V, E> + Send + 'static,
    {
        let SpawnOptions {
            condition,
            observers,
            priority,
            timeout,
        } = options;

        let task = Task::new(observers);
        task.core().advance(TaskState::Pending);
        self.spawned.fetch_add(1, Ordering::Relaxed);

        let priority = priority.unwrap_or(self.config.default_priority);
        debug!(task = %task.id(), priority = priority.display_name(), "task spawned");

        if let Some(timeout) = timeout {
            self.arm_timeout(task.downgrade(), timeout);
        }

        let driver = task.clone();
        let scheduler = self.scheduler.clone();
        let registry = Arc::clone(&self.exclusivity);
        self.scheduler.handle().spawn(async move {
            let task = driver;

            // gate phase
            match condition {
                Some(condition) => {
                    if !task
                        .core()
                        .try_advance(TaskState::Pending, TaskState::EvaluatingConditions)
                    {
                        return;
                    }

                    let eval_registry = Arc::clone(&registry);
                    let verdict = scheduler
                        .handle()
                        .spawn_blocking(move || condition::evaluate(condition, &eval_registry))
                        .await;

                    match verdict {
                        Ok(Verdict::Satisfied(leases)) => {
                            task.core().store_leases(leases);
                            if !task
                                .core()
                                .try_advance(TaskState::EvaluatingConditions, TaskState::Ready)
                            {
                                return;
                            }
                        }
                        Ok(Verdict::NotSatisfied) => {
                            debug!(task = %task.id(), "gate declined; cancelling task");
                            task.cancel();
                            return;
                        }
                        Ok(Verdict::Failed(failure)) => {
                            task.fail_with(TaskError::Condition(failure));
                            return;
                        }
                        Err(join_error) => {
                            warn!(task = %task.id(), %join_error, "gate evaluation panicked");
                            task.fail_with(TaskError::Condition(ConditionFailure::new(
                                GatePanicked,
                            )));
                            return;
                        }
                    }
                }
                None => {
                    if !task.core().try_advance(TaskState::Pending, TaskState::Ready) {
                        return;
                    }
                }
            }

            // admission phase
            let permit = scheduler.acquire_execution_slot().await;
            if task.core().cell().has_outcome() {
                return;
            }
            task.core().store_permit(permit);

            // execution phase
            let worker = task.clone();
            scheduler.handle().spawn_blocking(move || {
                if !worker.core().begin_executing() {
                    return;
                }
                match work(&worker) {
                    Ok(value) => worker.finish(value),
                    Err(error) => worker.fail(error),
                }
            });
        });

        task
    }

    /// Spawn a task that cannot fail and cannot be cancelled
    pub fn spawn_nonfailable<V, F>(
        &self,
        observers: Vec<TaskObserver>,
        work: F,
    ) -> NonFailableTask<V>
    where
        V: Send + 'static,
        F: FnOnce() -> V + Send + 'static,
    {
        let task = NonFailableTask::new(observers);
        task.core().advance(TaskState::Pending);
        self.spawned.fetch_add(1, Ordering::Relaxed);
        debug!(task = %task.id(), "non-failable task spawned");

        let driver = task.clone();
        let scheduler = self.scheduler.clone();
        self.scheduler.handle().spawn(async move {
            // nothing can race a non-failable task into an early outcome
            driver.core().advance(TaskState::Ready);

            let permit = scheduler.acquire_execution_slot().await;
            driver.core().store_permit(permit);

            let worker = driver.clone();
            scheduler.handle().spawn_blocking(move || {
                if !worker.core().begin_executing() {
                    return;
                }
                worker.finish(work());
            });
        });

        task
    }

    /// Create a task with no work closure, to be finished, failed or
    /// cancelled explicitly by the caller
    pub fn manual<V, E>(&self, observers: Vec<TaskObserver>) -> Task<V, E>
    where
        V: Send + 'static,
        E: Send + 'static,
    {
        let task = Task::new(observers);
        task.core().advance(TaskState::Pending);
        task.core().advance(TaskState::Ready);
        self.spawned.fetch_add(1, Ordering::Relaxed);
        task
    }

    /// A task that finishes with `()` after the given duration
    pub fn sleep(&self, duration: Duration) -> NonFailableTask<()> {
        let task = NonFailableTask::new(vec![]);
        task.core().advance(TaskState::Pending);
        task.core().advance(TaskState::Ready);
        self.spawned.fetch_add(1, Ordering::Relaxed);

        let driver = task.clone();
        self.scheduler.handle().spawn(async move {
            tokio::time::sleep(duration).await;
            driver.finish(());
        });

        task
    }

    /// An already finished task holding `value`
    pub fn value<V, E>(&self, value: V) -> Task<V, E>
    where
        V: Send + 'static,
        E: Send + 'static,
    {
        let task = self.manual(vec![]);
        task.finish(value);
        task
    }

    /// An already failed task holding `error`
    pub fn error<V, E>(&self, error: E) -> Task<V, E>
    where
        V: Send + 'static,
        E: Send + 'static,
    {
        let task = self.manual(vec![]);
        task.fail(error);
        task
    }

    /// Callback-style subscription to a task's outcome
    pub fn awaiter<V, E>(&self, task: Task<V, E>) -> TaskAwaiter<V, E>
    where
        V: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        TaskAwaiter::new(self.scheduler.clone(), task)
    }

    /// Callback-style subscription to a non-failable task's value
    pub fn nonfailable_awaiter<V>(&self, task: NonFailableTask<V>) -> NonFailableTaskAwaiter<V>
    where
        V: Clone + Send + 'static,
    {
        NonFailableTaskAwaiter::new(self.scheduler.clone(), task)
    }

    fn arm_timeout<V, E>(&self, weak: WeakTask<V, E>, timeout: Duration)
    where
        V: Send + 'static,
        E: Send + 'static,
    {
        self.scheduler.handle().spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(task) = weak.upgrade() {
                if !task.is_finished() {
                    warn!(task = %task.id(), ?timeout, "task timed out; cancelling");
                    task.cancel();
                }
            }
        });
    }
}
