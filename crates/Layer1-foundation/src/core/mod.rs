//! Core shared types

mod types;

pub use types::{Priority, TaskId};
