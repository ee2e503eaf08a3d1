//! Cancellation token - a run-once, composable handler chain
//!
//! Handlers accumulate until the token fires; firing invokes them exactly
//! once, in registration order, outside the lock (a handler may register on
//! the same token without deadlocking). A handler registered after the token
//! has fired runs immediately, so no handler is ever silently dropped.

use parking_lot::Mutex;
use tracing::debug;

type Handler = Box<dyn FnOnce() + Send + 'static>;

enum Chain {
    Armed(Vec<Handler>),
    Fired,
}

/// Run-once cancellation callback chain bound to one task
pub struct Cancellation {
    chain: Mutex<Chain>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            chain: Mutex::new(Chain::Armed(Vec::new())),
        }
    }

    /// Append a handler, or run it immediately if the token has already fired
    pub fn add_handler(&self, handler: impl FnOnce() + Send + 'static) {
        {
            let mut chain = self.chain.lock();
            if let Chain::Armed(handlers) = &mut *chain {
                handlers.push(Box::new(handler));
                return;
            }
        }

        // fail-safe semantics: late registrations observe the firing
        handler();
    }

    /// Fire the token, invoking every accumulated handler exactly once.
    ///
    /// Idempotent: a second call finds the chain already swapped out.
    pub fn run(&self) {
        let handlers = {
            let mut chain = self.chain.lock();
            match std::mem::replace(&mut *chain, Chain::Fired) {
                Chain::Armed(handlers) => handlers,
                Chain::Fired => return,
            }
        };

        if !handlers.is_empty() {
            debug!(count = handlers.len(), "running cancellation handlers");
        }

        // invoked outside the lock, in registration order
        for handler in handlers {
            handler();
        }
    }

    /// Check whether the token has fired
    pub fn has_fired(&self) -> bool {
        matches!(&*self.chain.lock(), Chain::Fired)
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
