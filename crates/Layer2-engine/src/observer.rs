//! Task observers - passive lifecycle hooks
//!
//! An observer is a bag of optional closures keyed by lifecycle event.
//! Observers are attached at task construction and notified synchronously,
//! in registration order, from whichever thread drives the transition
//! (scheduler thread for start events, the finishing thread for finish
//! events). They must not assume which thread invokes them.

use taskgate_foundation::TaskId;

type Callback = Box<dyn Fn(TaskId) + Send + Sync + 'static>;

/// Typed callback slots for the six task lifecycle events
#[derive(Default)]
pub struct TaskObserver {
    will_start: Option<Callback>,
    did_start: Option<Callback>,
    will_finish: Option<Callback>,
    did_finish: Option<Callback>,
    did_cancel: Option<Callback>,
    did_finish_with_error: Option<Callback>,
}

impl TaskObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run on the executing thread, immediately before the work closure
    pub fn on_will_start(mut self, f: impl Fn(TaskId) + Send + Sync + 'static) -> Self {
        self.will_start = Some(Box::new(f));
        self
    }

    /// Run once the task has entered `Executing`
    pub fn on_did_start(mut self, f: impl Fn(TaskId) + Send + Sync + 'static) -> Self {
        self.did_start = Some(Box::new(f));
        self
    }

    /// Run after the outcome is recorded, before the `Finished` transition
    pub fn on_will_finish(mut self, f: impl Fn(TaskId) + Send + Sync + 'static) -> Self {
        self.will_finish = Some(Box::new(f));
        self
    }

    /// Run after the `Finished` transition, for every outcome
    pub fn on_did_finish(mut self, f: impl Fn(TaskId) + Send + Sync + 'static) -> Self {
        self.did_finish = Some(Box::new(f));
        self
    }

    /// Run after `did_finish` when the task was cancelled
    pub fn on_did_cancel(mut self, f: impl Fn(TaskId) + Send + Sync + 'static) -> Self {
        self.did_cancel = Some(Box::new(f));
        self
    }

    /// Run after `did_finish` when the task failed with a non-cancellation error
    pub fn on_did_finish_with_error(mut self, f: impl Fn(TaskId) + Send + Sync + 'static) -> Self {
        self.did_finish_with_error = Some(Box::new(f));
        self
    }
}

/// The observers attached to one task, dispatched in registration order
pub(crate) struct ObserverList {
    observers: Vec<TaskObserver>,
}

impl ObserverList {
    pub(crate) fn new(observers: Vec<TaskObserver>) -> Self {
        Self { observers }
    }

    pub(crate) fn will_start(&self, id: TaskId) {
        for observer in &self.observers {
            if let Some(f) = &observer.will_start {
                f(id);
            }
        }
    }

    pub(crate) fn did_start(&self, id: TaskId) {
        for observer in &self.observers {
            if let Some(f) = &observer.did_start {
                f(id);
            }
        }
    }

    pub(crate) fn will_finish(&self, id: TaskId) {
        for observer in &self.observers {
            if let Some(f) = &observer.will_finish {
                f(id);
            }
        }
    }

    pub(crate) fn did_finish(&self, id: TaskId) {
        for observer in &self.observers {
            if let Some(f) = &observer.did_finish {
                f(id);
            }
        }
    }

    pub(crate) fn did_cancel(&self, id: TaskId) {
        for observer in &self.observers {
            if let Some(f) = &observer.did_cancel {
                f(id);
            }
        }
    }

    pub(crate) fn did_finish_with_error(&self, id: TaskId) {
        for observer in &self.observers {
            if let Some(f) = &observer.did_finish_with_error {
                f(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn dispatch_runs_in_registration_order() {
        let events = Arc::new(Mutex::new(Vec::new()));

        let mut observers = Vec::new();
        for i in 0..2 {
            let events = Arc::clone(&events);
            observers.push(
                TaskObserver::new().on_did_finish(move |_| events.lock().push(format!("obs{}", i))),
            );
        }

        let list = ObserverList::new(observers);
        list.did_finish(TaskId::new());

        assert_eq!(*events.lock(), vec!["obs0", "obs1"]);
    }

    #[test]
    fn empty_slots_are_skipped() {
        let list = ObserverList::new(vec![TaskObserver::new()]);
        // nothing registered; dispatch is a no-op
        list.will_start(TaskId::new());
        list.did_cancel(TaskId::new());
    }
}
