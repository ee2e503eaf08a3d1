//! Result cell - write-once outcome storage for a task
//!
//! The cell is the linearization point for concurrent `finish`/`cancel`
//! calls: `try_finish` test-and-sets the outcome under a narrow lock, and
//! only the winning caller goes on to run the finishing sequence. Waiters are
//! not woken when the outcome lands but when the cell is *sealed*, which the
//! winner does only after observer dispatch, so blocked waiters and awaiters
//! always observe a fully finished task.

use parking_lot::{Condvar, Mutex};

struct Inner<V, Err> {
    outcome: Option<Result<V, Err>>,
    sealed: bool,
}

/// Thread-safe, write-once-per-outcome storage of a task's value or error
pub struct ResultCell<V, Err> {
    inner: Mutex<Inner<V, Err>>,
    finished: Condvar,
}

impl<V, Err> ResultCell<V, Err> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                outcome: None,
                sealed: false,
            }),
            finished: Condvar::new(),
        }
    }

    /// Record the outcome if none has been recorded yet.
    ///
    /// Returns `true` for the first caller; every later call is a no-op.
    pub fn try_finish(&self, outcome: Result<V, Err>) -> bool {
        let mut inner = self.inner.lock();
        if inner.outcome.is_some() {
            return false;
        }
        inner.outcome = Some(outcome);
        true
    }

    /// Check whether an outcome has been recorded (it may not be sealed yet)
    pub fn has_outcome(&self) -> bool {
        self.inner.lock().outcome.is_some()
    }

    /// Seal the cell and wake every blocked waiter.
    ///
    /// Called by the `try_finish` winner once observer dispatch is complete.
    pub fn seal(&self) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.outcome.is_some(), "sealing a cell without an outcome");
        inner.sealed = true;
        self.finished.notify_all();
    }

    /// Check whether the cell has been sealed
    pub fn is_finished(&self) -> bool {
        self.inner.lock().sealed
    }

    /// Block until the cell is sealed, without reading the outcome
    pub fn wait_until_sealed(&self) {
        let mut inner = self.inner.lock();
        while !inner.sealed {
            self.finished.wait(&mut inner);
        }
    }
}

impl<V: Clone, Err: Clone> ResultCell<V, Err> {
    /// Block the calling thread until the cell is sealed, then read the outcome
    pub fn wait(&self) -> Result<V, Err> {
        let mut inner = self.inner.lock();
        while !inner.sealed {
            self.finished.wait(&mut inner);
        }
        inner
            .outcome
            .clone()
            .expect("sealed cell must hold an outcome")
    }

    /// Read the outcome without blocking; `None` until the cell is sealed
    pub fn try_get(&self) -> Option<Result<V, Err>> {
        let inner = self.inner.lock();
        if !inner.sealed {
            return None;
        }
        inner.outcome.clone()
    }
}

impl<V, Err> Default for ResultCell<V, Err> {
    fn default() -> Self {
        Self::new()
    }
}
