//! Core value types for the host runtime
//!
//! This module provides the value type exchanged between script sessions,
//! timed sources and the task-graph engine.

pub mod runtime_value;
pub use runtime_value::*;
