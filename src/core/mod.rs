//! Core types shared by every layer of kubedeps.
//!
//! The error taxonomy lives here so the graph builder, planner and runner
//! can report failures without depending on each other.

pub mod error;

pub use error::{ErrorContext, KubedepsError, NodeOperationError, user_friendly_error};
