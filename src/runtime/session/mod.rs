//! Script session boundary
//!
//! A session is the embedded scripting runtime. It has no internal locking and
//! must only ever be entered by one thread at a time, so every API in this crate
//! that runs script code takes `&mut dyn Session` on the owning thread:
//! - the event bridge consumer (`EventBridge::drain`, `run_until_idle`)
//! - the task-graph coordinator (`TaskGraph::run`, `run_node`)
//!
//! Script callables never leave the session. Other threads only carry
//! [`Callback`] handles, which the session resolves when asked to call them.

pub mod native;

pub use native::{Globals, NativeSession};

use std::fmt;

use crate::runtime::value::Value;

/// Opaque handle to a callable owned by a session.
///
/// Handles are plain ids (like a registry reference), so they are `Send` and
/// can be stored in graphs or queued from timer threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Callback(pub u32);

impl Callback {
    /// Returns the inner handle id.
    #[inline]
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Callback {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Callback({})", self.0)
    }
}

/// Errors raised while calling into a session
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// The callable raised an error
    #[error("{message}")]
    Raised { message: String },

    /// The handle does not name a callable in this session
    #[error("unknown callback: {0}")]
    UnknownCallback(Callback),

    /// The callable panicked; the panic was contained
    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl ScriptError {
    /// Create a script-level error from a message
    pub fn raised(message: impl Into<String>) -> Self {
        ScriptError::Raised {
            message: message.into(),
        }
    }
}

/// A non-reentrant scripting session.
///
/// Implementors need not be `Send` or `Sync`; the runtime guarantees calls
/// arrive one at a time from the thread that owns the session.
pub trait Session {
    /// Call a script callable with positional arguments.
    fn call(
        &mut self,
        callback: Callback,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError>;

    /// Human-readable name of a callable, for logs.
    fn callback_name(
        &self,
        callback: Callback,
    ) -> Option<String> {
        let _ = callback;
        None
    }
}

/// Turn a panic payload into a message
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
