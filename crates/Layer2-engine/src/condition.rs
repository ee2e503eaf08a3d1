//! Gate (condition) engine - preconditions evaluated before a task may run
//!
//! A condition is a tree: boolean composition nodes (`all_of`, `any_of`,
//! `not`) over leaves (predicates, delays, mutual-exclusion categories), and
//! any node may carry a lazily started dependency task that is awaited
//! before the node's own evaluation. Ownership makes the tree acyclic by
//! construction.
//!
//! Evaluation happens once, on the watcher lane, the first time the owning
//! task reaches `EvaluatingConditions`. For a mutual-exclusion leaf,
//! "satisfied" means *lock acquired*: the returned leases are held by the
//! task until it finishes, not until evaluation returns.

use crate::exclusivity::{CategoryLease, ExclusivityRegistry};
use crate::task::Task;
use std::sync::Arc;
use std::time::Duration;
use taskgate_foundation::{ConditionFailure, DynError};
use tracing::debug;

/// Outcome of one evaluation function
pub enum ConditionResult {
    /// The condition was satisfied
    Satisfied,

    /// The condition declined; the task is cancelled, not failed
    NotSatisfied,

    /// An error occurred while evaluating; surfaces as a task failure
    Failed(DynError),
}

impl ConditionResult {
    /// Wrap a concrete error into the failed variant
    pub fn failed(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        ConditionResult::Failed(Arc::new(error))
    }
}

type EvalFn = Box<dyn FnOnce() -> ConditionResult + Send + 'static>;
type DependencyFn = Box<dyn FnOnce() -> Task<(), DynError> + Send + 'static>;

enum ConditionKind {
    Predicate(EvalFn),
    Delay(Duration),
    Not(Box<Condition>),
    AllOf(Vec<Condition>),
    AnyOf(Vec<Condition>),
    MutuallyExclusive(String),
}

/// A precondition that must hold before a task is allowed to execute
pub struct Condition {
    kind: ConditionKind,
    dependency: Option<DependencyFn>,
}

impl Condition {
    /// A condition backed by an arbitrary evaluation function.
    ///
    /// This is the extension point for external gate implementations
    /// (permission prompts, reachability checks): return
    /// satisfied/not-satisfied/failed, optionally after declaring a
    /// dependency task via [`Condition::with_dependency`].
    pub fn new(eval: impl FnOnce() -> ConditionResult + Send + 'static) -> Self {
        Self {
            kind: ConditionKind::Predicate(Box::new(eval)),
            dependency: None,
        }
    }

    /// A fixed boolean predicate
    pub fn boolean(satisfied: bool) -> Self {
        Self::new(move || {
            if satisfied {
                ConditionResult::Satisfied
            } else {
                ConditionResult::NotSatisfied
            }
        })
    }

    /// Satisfied after the given delay has elapsed
    pub fn delay(duration: Duration) -> Self {
        Self {
            kind: ConditionKind::Delay(duration),
            dependency: None,
        }
    }

    /// Inverts satisfied/not-satisfied; a failure still propagates as failure
    pub fn not(condition: Condition) -> Self {
        Self {
            kind: ConditionKind::Not(Box::new(condition)),
            dependency: None,
        }
    }

    /// Satisfied when every sub-condition is, evaluated in declaration
    /// order with short-circuit on the first decline or failure
    pub fn all_of(conditions: Vec<Condition>) -> Self {
        Self {
            kind: ConditionKind::AllOf(conditions),
            dependency: None,
        }
    }

    /// Satisfied by the first satisfied sub-condition, in declaration order
    pub fn any_of(conditions: Vec<Condition>) -> Self {
        Self {
            kind: ConditionKind::AnyOf(conditions),
            dependency: None,
        }
    }

    /// Admission into a named mutual-exclusion category.
    ///
    /// At most one admitted task per category executes at a time; contenders
    /// are admitted FIFO. The category is held until the task finishes.
    pub fn mutually_exclusive(category: impl Into<String>) -> Self {
        Self {
            kind: ConditionKind::MutuallyExclusive(category.into()),
            dependency: None,
        }
    }

    /// Declare a dependency task, started lazily at evaluation time and
    /// awaited before this node's own evaluation.
    ///
    /// A failed dependency fails the gate with that error; a cancelled
    /// dependency also fails the gate (cancellation does not pass through
    /// silently).
    pub fn with_dependency(
        mut self,
        dependency: impl FnOnce() -> Task<(), DynError> + Send + 'static,
    ) -> Self {
        self.dependency = Some(Box::new(dependency));
        self
    }
}

/// Result of evaluating a whole condition tree
pub(crate) enum Verdict {
    /// Gate open; any acquired category leases are handed to the task
    Satisfied(Vec<CategoryLease>),

    /// Gate declined; the task is cancelled
    NotSatisfied,

    /// Gate evaluation errored; the task fails with this error
    Failed(ConditionFailure),
}

/// Depth-first evaluation: sub-conditions (declaration order, short-circuit),
/// then the node's dependency task, then the node's own evaluation.
///
/// Blocking is allowed here; the caller runs this on the watcher lane.
pub(crate) fn evaluate(condition: Condition, registry: &Arc<ExclusivityRegistry>) -> Verdict {
    let Condition { kind, dependency } = condition;

    match kind {
        ConditionKind::AllOf(subconditions) => {
            let mut leases = Vec::new();
            for sub in subconditions {
                match evaluate(sub, registry) {
                    Verdict::Satisfied(more) => leases.extend(more),
                    // dropping `leases` releases anything already acquired
                    Verdict::NotSatisfied => return Verdict::NotSatisfied,
                    Verdict::Failed(failure) => return Verdict::Failed(failure),
                }
            }
            if let Some(verdict) = await_dependency(dependency) {
                return verdict;
            }
            Verdict::Satisfied(leases)
        }

        ConditionKind::AnyOf(subconditions) => {
            let mut first_failure = None;
            for sub in subconditions {
                match evaluate(sub, registry) {
                    Verdict::Satisfied(leases) => {
                        if let Some(verdict) = await_dependency(dependency) {
                            return verdict;
                        }
                        return Verdict::Satisfied(leases);
                    }
                    Verdict::NotSatisfied => {}
                    Verdict::Failed(failure) => {
                        first_failure.get_or_insert(failure);
                    }
                }
            }
            match first_failure {
                Some(failure) => Verdict::Failed(failure),
                None => Verdict::NotSatisfied,
            }
        }

        ConditionKind::Not(subcondition) => {
            let inverted = match evaluate(*subcondition, registry) {
                Verdict::Satisfied(leases) => {
                    drop(leases);
                    Verdict::NotSatisfied
                }
                Verdict::NotSatisfied => Verdict::Satisfied(Vec::new()),
                // a failed sub-result propagates as failed, not inverted
                Verdict::Failed(failure) => return Verdict::Failed(failure),
            };
            if let Some(verdict) = await_dependency(dependency) {
                return verdict;
            }
            inverted
        }

        ConditionKind::Predicate(eval) => {
            if let Some(verdict) = await_dependency(dependency) {
                return verdict;
            }
            match eval() {
                ConditionResult::Satisfied => Verdict::Satisfied(Vec::new()),
                ConditionResult::NotSatisfied => Verdict::NotSatisfied,
                ConditionResult::Failed(error) => {
                    Verdict::Failed(ConditionFailure::from_dyn(error))
                }
            }
        }

        ConditionKind::Delay(duration) => {
            if let Some(verdict) = await_dependency(dependency) {
                return verdict;
            }
            debug!(?duration, "delay condition sleeping");
            std::thread::sleep(duration);
            Verdict::Satisfied(Vec::new())
        }

        ConditionKind::MutuallyExclusive(category) => {
            if let Some(verdict) = await_dependency(dependency) {
                return verdict;
            }
            let lease = registry.acquire(&category);
            Verdict::Satisfied(vec![lease])
        }
    }
}

fn await_dependency(dependency: Option<DependencyFn>) -> Option<Verdict> {
    let start = dependency?;
    let task = start();
    match task.wait() {
        Ok(()) => None,
        // failure propagation, cancellation included
        Err(error) => Some(Verdict::Failed(ConditionFailure::new(error))),
    }
}
