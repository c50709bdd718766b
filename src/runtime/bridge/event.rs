//! Event bridge entries

use std::fmt;

use crate::runtime::session::{Callback, ScriptError, Session};
use crate::runtime::value::Value;

/// Closure marshaled onto the session thread.
pub type SessionTask = Box<dyn FnOnce(&mut dyn Session) -> Result<(), ScriptError> + Send>;

/// One queued unit of work for the session thread.
pub enum Event {
    /// Call a script callable with an optional payload argument
    Callback {
        callback: Callback,
        payload: Option<Value>,
    },
    /// Run a host closure with the session
    Task(SessionTask),
}

impl Event {
    /// Callback entry without payload
    pub fn callback(callback: Callback) -> Self {
        Event::Callback {
            callback,
            payload: None,
        }
    }

    /// Callback entry carrying one payload value
    pub fn with_payload(
        callback: Callback,
        payload: Value,
    ) -> Self {
        Event::Callback {
            callback,
            payload: Some(payload),
        }
    }

    /// Short description for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Callback { .. } => "callback",
            Event::Task(_) => "task",
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Event::Callback { callback, payload } => f
                .debug_struct("Callback")
                .field("callback", callback)
                .field("payload", payload)
                .finish(),
            Event::Task(_) => f.write_str("Task(..)"),
        }
    }
}
