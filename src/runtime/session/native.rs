//! In-process session backed by Rust closures
//!
//! `NativeSession` plays the role of the embedded interpreter for hosts that
//! register their callables directly from Rust (the CLI demo, tests, benches).
//! Like the bytecode executor it keeps a function table keyed by handle and a
//! global variable table, and it is deliberately not `Sync`: it is entered only
//! from the thread that owns it.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use indexmap::IndexMap;

use super::{panic_message, Callback, ScriptError, Session};
use crate::runtime::value::Value;

/// Global variables visible to every native callable
pub type Globals = IndexMap<String, Value>;

type NativeFn = Box<dyn FnMut(&mut Globals, Vec<Value>) -> Result<Value, ScriptError>>;

struct NativeFunction {
    name: String,
    func: NativeFn,
}

/// Closure-backed script session
pub struct NativeSession {
    /// Function table: Callback -> callable
    functions: HashMap<Callback, NativeFunction>,
    /// Next handle id to hand out
    next_id: u32,
    /// Global variables
    globals: Globals,
    /// Number of calls served (including failed ones)
    call_count: u64,
}

impl fmt::Debug for NativeSession {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("NativeSession")
            .field("functions", &self.functions.len())
            .field("globals", &self.globals)
            .field("call_count", &self.call_count)
            .finish()
    }
}

impl Default for NativeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeSession {
    /// Create an empty session
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
            next_id: 0,
            globals: Globals::new(),
            call_count: 0,
        }
    }

    /// Register a callable and return its handle
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        func: F,
    ) -> Callback
    where
        F: FnMut(&mut Globals, Vec<Value>) -> Result<Value, ScriptError> + 'static,
    {
        let callback = Callback(self.next_id);
        self.next_id += 1;
        self.functions.insert(
            callback,
            NativeFunction {
                name: name.into(),
                func: Box::new(func),
            },
        );
        callback
    }

    /// Remove a callable; later calls report `UnknownCallback`
    pub fn unregister(
        &mut self,
        callback: Callback,
    ) -> bool {
        self.functions.remove(&callback).is_some()
    }

    /// Number of registered callables
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if no callables are registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Read a global variable
    pub fn global(
        &self,
        name: &str,
    ) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Set a global variable
    pub fn set_global(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) {
        self.globals.insert(name.into(), value.into());
    }

    /// All globals
    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    /// Number of calls served so far
    pub fn call_count(&self) -> u64 {
        self.call_count
    }
}

impl Session for NativeSession {
    fn call(
        &mut self,
        callback: Callback,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        let function = self
            .functions
            .get_mut(&callback)
            .ok_or(ScriptError::UnknownCallback(callback))?;
        self.call_count += 1;

        let globals = &mut self.globals;
        match catch_unwind(AssertUnwindSafe(|| (function.func)(globals, args))) {
            Ok(result) => result,
            Err(payload) => Err(ScriptError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    fn callback_name(
        &self,
        callback: Callback,
    ) -> Option<String> {
        self.functions.get(&callback).map(|f| f.name.clone())
    }
}
