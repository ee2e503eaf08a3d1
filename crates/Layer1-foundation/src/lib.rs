//! # taskgate-foundation
//!
//! Foundation layer for taskgate:
//! - Error: the task error taxonomy (cancellation sentinel, condition
//!   failures, application errors)
//! - Core: shared identifiers and scheduling hints

pub mod core;
pub mod error;

// ============================================================================
// Error
// ============================================================================
pub use error::{ConditionFailure, DynError, TaskError, TaskResult};

// ============================================================================
// Core (shared types)
// ============================================================================
pub use crate::core::{Priority, TaskId};
