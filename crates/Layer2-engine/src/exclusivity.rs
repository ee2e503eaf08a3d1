//! Mutual-exclusion category registry
//!
//! A category is a named FIFO ticket lock: at most one admitted task per
//! category runs at a time, and contenders are admitted in arrival order.
//! The registry is an explicit, injectable object owned by the engine (never
//! process-wide state), so tests can instantiate isolated registries.
//!
//! Lock discipline: the map lock is taken only to look up or drop a category
//! and to draw a ticket; blocking on the category itself always happens with
//! the map lock released. Map lock is always taken before a category lock.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

struct Tickets {
    next: u64,
    serving: u64,
}

struct Category {
    tickets: Mutex<Tickets>,
    admitted: Condvar,
}

/// Registry mapping category names to their exclusivity locks
///
/// A category exists only while some task is holding or waiting on it; the
/// entry is dropped when the last holder releases.
pub struct ExclusivityRegistry {
    categories: Mutex<HashMap<String, Arc<Category>>>,
}

impl ExclusivityRegistry {
    pub fn new() -> Self {
        Self {
            categories: Mutex::new(HashMap::new()),
        }
    }

    /// Block until the named category admits this caller, FIFO per category.
    ///
    /// The returned lease holds the category until dropped, which the owning
    /// task does when it finishes (not when gate evaluation returns).
    pub fn acquire(self: &Arc<Self>, name: &str) -> CategoryLease {
        let (category, ticket) = {
            let mut categories = self.categories.lock();
            let category = categories
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(Category {
                        tickets: Mutex::new(Tickets { next: 0, serving: 0 }),
                        admitted: Condvar::new(),
                    })
                })
                .clone();

            // ticket drawn under the map lock so that category removal can
            // check for emptiness without racing a fresh contender
            let ticket = {
                let mut tickets = category.tickets.lock();
                let ticket = tickets.next;
                tickets.next += 1;
                ticket
            };

            (category, ticket)
        };

        {
            let mut tickets = category.tickets.lock();
            while tickets.serving != ticket {
                category.admitted.wait(&mut tickets);
            }
        }

        debug!(category = name, ticket, "mutual-exclusion category acquired");

        CategoryLease {
            registry: Arc::clone(self),
            category: name.to_string(),
        }
    }

    fn release(&self, name: &str) {
        let mut categories = self.categories.lock();
        let category = match categories.get(name) {
            Some(category) => Arc::clone(category),
            None => {
                debug_assert!(false, "releasing an unknown category: {}", name);
                return;
            }
        };

        let empty = {
            let mut tickets = category.tickets.lock();
            tickets.serving += 1;
            debug_assert!(tickets.serving <= tickets.next, "waiter count went negative");
            tickets.serving == tickets.next
        };

        if empty {
            categories.remove(name);
            debug!(category = name, "mutual-exclusion category released and dropped");
        }
        drop(categories);

        category.admitted.notify_all();
    }

    /// Number of tasks currently waiting on (not holding) the category
    pub fn waiter_count(&self, name: &str) -> usize {
        let categories = self.categories.lock();
        match categories.get(name) {
            Some(category) => {
                let tickets = category.tickets.lock();
                // one of the outstanding tickets is the current holder
                (tickets.next - tickets.serving).saturating_sub(1) as usize
            }
            None => 0,
        }
    }

    /// Check whether the category currently exists (held or contended)
    pub fn is_active(&self, name: &str) -> bool {
        self.categories.lock().contains_key(name)
    }
}

impl Default for ExclusivityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Held admission into a mutual-exclusion category; releases on drop
pub struct CategoryLease {
    registry: Arc<ExclusivityRegistry>,
    category: String,
}

impl CategoryLease {
    /// The category this lease holds
    pub fn category(&self) -> &str {
        &self.category
    }
}

impl Drop for CategoryLease {
    fn drop(&mut self) {
        self.registry.release(&self.category);
    }
}
