//! Runtime system
//!
//! This module contains the script session boundary, the task-graph engine,
//! the event bridge and the timed sources that feed it.

pub mod bridge;
pub mod dag;
pub mod host;
pub mod session;
pub mod timer;
pub mod value;

pub use host::Host;
