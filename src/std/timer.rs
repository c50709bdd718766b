//! Script surface for timed sources (`std.timer`)
//!
//! Delays and intervals arrive from scripts as milliseconds.

use std::time::Duration;

use super::ModuleExport;
use crate::runtime::session::Callback;
use crate::runtime::timer::{TimerError, TimerHandle, Timers};
use crate::runtime::value::Value;

/// `after(delayMs, callback) -> handle`
pub fn after(
    timers: &Timers,
    delay_ms: i64,
    callback: Callback,
) -> Result<TimerHandle, TimerError> {
    let delay = u64::try_from(delay_ms).map_err(|_| TimerError::InvalidInterval)?;
    timers.after(Duration::from_millis(delay), callback)
}

/// `every(intervalMs, callback) -> handle`
pub fn every(
    timers: &Timers,
    interval_ms: i64,
    callback: Callback,
) -> Result<TimerHandle, TimerError> {
    let interval = u64::try_from(interval_ms)
        .ok()
        .filter(|&ms| ms > 0)
        .ok_or(TimerError::InvalidInterval)?;
    timers.every(Duration::from_millis(interval), callback)
}

/// `schedule(calendarExpression, callback) -> handle`
pub fn schedule(
    timers: &Timers,
    expression: &str,
    callback: Callback,
) -> Result<TimerHandle, TimerError> {
    timers.schedule(expression, callback)
}

/// Script-facing view of a handle: `{id, kind, stopped, fired}`
pub fn handle_value(handle: &TimerHandle) -> Value {
    Value::from_pairs([
        ("id", Value::Int(handle.id() as i64)),
        ("kind", Value::from(handle.kind().as_str())),
        ("stopped", Value::Bool(handle.is_stopped())),
        ("fired", Value::Int(handle.fired() as i64)),
    ])
}

/// Exports of `std.timer`
pub fn exports() -> Vec<ModuleExport> {
    vec![
        ModuleExport {
            short_name: "after",
            qualified_name: "std.timer.after",
            signature: "(delay_ms: Int, callback: Fn) -> Timer",
        },
        ModuleExport {
            short_name: "every",
            qualified_name: "std.timer.every",
            signature: "(interval_ms: Int, callback: Fn) -> Timer",
        },
        ModuleExport {
            short_name: "schedule",
            qualified_name: "std.timer.schedule",
            signature: "(expression: String, callback: Fn) -> Timer",
        },
        ModuleExport {
            short_name: "Timer::stop",
            qualified_name: "std.timer.Timer.stop",
            signature: "(timer: Timer) -> Void",
        },
    ]
}
