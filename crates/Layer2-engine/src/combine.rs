//! Combinators over groups of tasks
//!
//! Aggregates are manual tasks resolved by watchers on the watcher lane, so
//! waiting on members never consumes an execution slot (an aggregate over
//! more members than slots would otherwise deadlock the lane).

use crate::engine::Engine;
use crate::task::Task;
use tracing::debug;

/// Resolve once every member has finished, with the values in member order.
///
/// The first member failure fails the aggregate with that error and later
/// members are not waited on (they keep running; the aggregate just stops
/// watching). A cancelled member cancels the aggregate. An empty input
/// finishes immediately with an empty vector.
pub fn all<V, E>(engine: &Engine, tasks: Vec<Task<V, E>>) -> Task<Vec<V>, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let aggregate: Task<Vec<V>, E> = engine.manual(vec![]);
    debug!(aggregate = %aggregate.id(), members = tasks.len(), "all() aggregate created");

    let resolver = aggregate.clone();
    engine.scheduler().run_blocking(move || {
        let mut values = Vec::with_capacity(tasks.len());
        for task in &tasks {
            match task.wait() {
                Ok(value) => values.push(value),
                Err(error) => {
                    if error.is_cancelled() {
                        resolver.cancel();
                    } else {
                        resolver.fail_with(error);
                    }
                    return;
                }
            }
        }
        resolver.finish(values);
    });

    aggregate
}

/// Resolve with the first member to finish, successful or not.
///
/// Success yields the winning member's handle (its value is readable without
/// blocking); a first-finishing failure or cancellation propagates instead.
/// Losing members keep running and can still be waited on individually.
pub fn any<V, E>(engine: &Engine, tasks: Vec<Task<V, E>>) -> Task<Task<V, E>, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    debug_assert!(!tasks.is_empty(), "any() over no tasks never resolves");

    let aggregate: Task<Task<V, E>, E> = engine.manual(vec![]);
    debug!(aggregate = %aggregate.id(), members = tasks.len(), "any() aggregate created");

    for task in tasks {
        let resolver = aggregate.clone();
        engine.scheduler().run_blocking(move || {
            // the aggregate's result cell arbitrates racing watchers
            match task.wait() {
                Ok(_) => resolver.finish(task),
                Err(error) => {
                    if error.is_cancelled() {
                        resolver.cancel();
                    } else {
                        resolver.fail_with(error);
                    }
                }
            }
        });
    }

    aggregate
}
