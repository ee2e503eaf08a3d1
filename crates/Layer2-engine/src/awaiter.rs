//! Awaiters - callback-style subscription to a task's outcome
//!
//! An awaiter parks a watcher on the watcher lane, blocks it until the task
//! seals its outcome, then delivers exactly one of the value/error/cancel
//! callbacks (plus an optional `finally`) through a callback context. The
//! default context runs callbacks inline on the watcher thread; an embedding
//! with a designated event thread supplies its own [`CallbackContext`] to
//! marshal them there.

use crate::scheduler::Scheduler;
use crate::task::{NonFailableTask, Task};
use std::sync::Arc;
use taskgate_foundation::TaskError;

/// Where awaiter callbacks run
pub trait CallbackContext: Send + Sync {
    fn dispatch(&self, callback: Box<dyn FnOnce() + Send + 'static>);
}

/// Runs callbacks inline on the watcher thread
pub struct InlineContext;

impl CallbackContext for InlineContext {
    fn dispatch(&self, callback: Box<dyn FnOnce() + Send + 'static>) {
        callback();
    }
}

/// Subscription to a failable task's outcome
///
/// Built via [`crate::Engine::awaiter`]; nothing happens until
/// [`TaskAwaiter::start`] is called.
pub struct TaskAwaiter<V, E> {
    scheduler: Scheduler,
    task: Task<V, E>,
    context: Arc<dyn CallbackContext>,
    on_value: Option<Box<dyn FnOnce(V) + Send + 'static>>,
    on_error: Option<Box<dyn FnOnce(TaskError<E>) + Send + 'static>>,
    on_cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
    on_finished: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl<V, E> TaskAwaiter<V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn new(scheduler: Scheduler, task: Task<V, E>) -> Self {
        Self {
            scheduler,
            task,
            context: Arc::new(InlineContext),
            on_value: None,
            on_error: None,
            on_cancel: None,
            on_finished: None,
        }
    }

    /// Called with the value on success
    pub fn on_value(mut self, callback: impl FnOnce(V) + Send + 'static) -> Self {
        self.on_value = Some(Box::new(callback));
        self
    }

    /// Called with the error on failure (and on cancellation, if no
    /// dedicated cancel callback is registered)
    pub fn on_error(mut self, callback: impl FnOnce(TaskError<E>) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Called on cancellation instead of the error callback
    pub fn on_cancel(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(callback));
        self
    }

    /// Called after the outcome callback, whichever one fired
    pub fn finally(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_finished = Some(Box::new(callback));
        self
    }

    /// Marshal callbacks through the given context instead of running them
    /// inline on the watcher thread
    pub fn callback_context(mut self, context: Arc<dyn CallbackContext>) -> Self {
        self.context = context;
        self
    }

    /// Start watching. Returns immediately; callbacks fire once the task
    /// finishes (or right away if it already has).
    pub fn start(self) {
        let Self {
            scheduler,
            task,
            context,
            on_value,
            on_error,
            on_cancel,
            on_finished,
        } = self;

        scheduler.run_blocking(move || {
            match task.wait() {
                Ok(value) => {
                    if let Some(callback) = on_value {
                        context.dispatch(Box::new(move || callback(value)));
                    }
                }
                Err(error) if error.is_cancelled() => match on_cancel {
                    Some(callback) => context.dispatch(callback),
                    None => {
                        if let Some(callback) = on_error {
                            context.dispatch(Box::new(move || callback(error)));
                        }
                    }
                },
                Err(error) => {
                    if let Some(callback) = on_error {
                        context.dispatch(Box::new(move || callback(error)));
                    }
                }
            }

            if let Some(callback) = on_finished {
                context.dispatch(callback);
            }
        });
    }
}

/// Subscription to a non-failable task's value
pub struct NonFailableTaskAwaiter<V> {
    scheduler: Scheduler,
    task: NonFailableTask<V>,
    context: Arc<dyn CallbackContext>,
    on_value: Option<Box<dyn FnOnce(V) + Send + 'static>>,
    on_finished: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl<V> NonFailableTaskAwaiter<V>
where
    V: Clone + Send + 'static,
{
    pub(crate) fn new(scheduler: Scheduler, task: NonFailableTask<V>) -> Self {
        Self {
            scheduler,
            task,
            context: Arc::new(InlineContext),
            on_value: None,
            on_finished: None,
        }
    }

    /// Called with the value once the task finishes
    pub fn on_value(mut self, callback: impl FnOnce(V) + Send + 'static) -> Self {
        self.on_value = Some(Box::new(callback));
        self
    }

    /// Called after the value callback
    pub fn finally(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_finished = Some(Box::new(callback));
        self
    }

    /// Marshal callbacks through the given context
    pub fn callback_context(mut self, context: Arc<dyn CallbackContext>) -> Self {
        self.context = context;
        self
    }

    /// Start watching; see [`TaskAwaiter::start`]
    pub fn start(self) {
        let Self {
            scheduler,
            task,
            context,
            on_value,
            on_finished,
        } = self;

        scheduler.run_blocking(move || {
            let value = task.wait();
            if let Some(callback) = on_value {
                context.dispatch(Box::new(move || callback(value)));
            }
            if let Some(callback) = on_finished {
                context.dispatch(callback);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskState;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;
    use tokio::runtime::Handle;

    fn ready_task<V: Clone + Send + 'static, E: Clone + Send + 'static>() -> Task<V, E> {
        let task = Task::new(vec![]);
        task.core().advance(TaskState::Pending);
        task.core().advance(TaskState::Ready);
        task
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn value_then_finally_in_order() {
        let scheduler = Scheduler::new(Handle::current(), 2);
        let task: Task<i32, String> = ready_task();

        let events = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel();
        {
            let e1 = Arc::clone(&events);
            let e2 = Arc::clone(&events);
            TaskAwaiter::new(scheduler, task.clone())
                .on_value(move |v| e1.lock().push(format!("value:{v}")))
                .on_error(|_| panic!("no error expected"))
                .finally(move || {
                    e2.lock().push("finally".to_string());
                    done_tx.send(()).ok();
                })
                .start();
        }

        task.finish(5);
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(*events.lock(), vec!["value:5", "finally"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_prefers_the_cancel_callback() {
        let scheduler = Scheduler::new(Handle::current(), 2);
        let task: Task<i32, String> = ready_task();
        task.cancel();

        let (done_tx, done_rx) = mpsc::channel();
        TaskAwaiter::new(scheduler, task)
            .on_value(|_| panic!("no value expected"))
            .on_error(|_| panic!("cancel callback should win"))
            .on_cancel(move || {
                done_tx.send(()).ok();
            })
            .start();

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_falls_back_to_the_error_callback() {
        let scheduler = Scheduler::new(Handle::current(), 2);
        let task: Task<i32, String> = ready_task();
        task.cancel();

        let (done_tx, done_rx) = mpsc::channel();
        TaskAwaiter::new(scheduler, task)
            .on_error(move |error| {
                assert!(error.is_cancelled());
                done_tx.send(()).ok();
            })
            .start();

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn custom_context_sees_every_callback() {
        struct Counting(AtomicUsize);
        impl CallbackContext for Counting {
            fn dispatch(&self, callback: Box<dyn FnOnce() + Send + 'static>) {
                self.0.fetch_add(1, Ordering::SeqCst);
                callback();
            }
        }

        let scheduler = Scheduler::new(Handle::current(), 2);
        let task: Task<i32, String> = ready_task();
        task.finish(1);

        let context = Arc::new(Counting(AtomicUsize::new(0)));
        let (done_tx, done_rx) = mpsc::channel();
        TaskAwaiter::new(scheduler, task)
            .on_value(|_| {})
            .finally(move || {
                done_tx.send(()).ok();
            })
            .callback_context(Arc::clone(&context) as Arc<dyn CallbackContext>)
            .start();

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(context.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_failable_awaiter_delivers_the_value() {
        let scheduler = Scheduler::new(Handle::current(), 2);
        let task: NonFailableTask<&'static str> = NonFailableTask::new(vec![]);
        task.core().advance(TaskState::Pending);
        task.core().advance(TaskState::Ready);

        let (value_tx, value_rx) = mpsc::channel();
        NonFailableTaskAwaiter::new(scheduler, task.clone())
            .on_value(move |v| {
                value_tx.send(v).ok();
            })
            .start();

        task.finish("hello");
        assert_eq!(value_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "hello");
    }
}
