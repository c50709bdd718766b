//! Timed sources: one-shot delays, repeating intervals and calendar schedules
//!
//! [`Timers`] is the per-session scheduler. It creates sources bound to one
//! event bridge and stops all of them on [`Timers::shutdown`] or drop.

pub mod cron;
pub mod source;

pub use cron::{parse_duration, CalendarSchedule, CronError, CronSchedule};
pub use source::{SourceKind, TimerHandle};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::runtime::bridge::EventBridge;
use crate::runtime::session::Callback;
use source::Trigger;

/// Timer registration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    /// Repeating sources need a non-zero interval
    #[error("interval must be greater than zero")]
    InvalidInterval,

    /// The schedule expression could not be parsed
    #[error("invalid schedule: {0}")]
    InvalidSchedule(#[from] CronError),

    /// The scheduler has been shut down
    #[error("timers have been shut down")]
    ShutDown,

    /// The timer thread could not be started
    #[error("failed to spawn timer thread: {0}")]
    Spawn(String),
}

/// Scheduler owning every timed source of one session.
#[derive(Debug)]
pub struct Timers {
    bridge: Arc<EventBridge>,
    sources: Mutex<Vec<TimerHandle>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl Timers {
    /// Create a scheduler delivering into `bridge`.
    pub fn new(bridge: Arc<EventBridge>) -> Self {
        Self {
            bridge,
            sources: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.bridge
    }

    /// Fire `callback` once after `delay`.
    pub fn after(
        &self,
        delay: Duration,
        callback: Callback,
    ) -> Result<TimerHandle, TimerError> {
        self.start(callback, Trigger::After(delay))
    }

    /// Fire `callback` every `interval` until stopped.
    pub fn every(
        &self,
        interval: Duration,
        callback: Callback,
    ) -> Result<TimerHandle, TimerError> {
        if interval.is_zero() {
            return Err(TimerError::InvalidInterval);
        }
        self.start(callback, Trigger::Every(interval))
    }

    /// Fire `callback` on a cron-style schedule.
    pub fn schedule(
        &self,
        expression: &str,
        callback: Callback,
    ) -> Result<TimerHandle, TimerError> {
        let schedule = CronSchedule::parse(expression)?;
        self.schedule_with(schedule, callback)
    }

    /// Fire `callback` on any calendar schedule.
    pub fn schedule_with<S>(
        &self,
        schedule: S,
        callback: Callback,
    ) -> Result<TimerHandle, TimerError>
    where
        S: CalendarSchedule + 'static,
    {
        self.start(callback, Trigger::Schedule(Box::new(schedule)))
    }

    fn start(
        &self,
        callback: Callback,
        trigger: Trigger,
    ) -> Result<TimerHandle, TimerError> {
        let mut sources = self.sources.lock();
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(TimerError::ShutDown);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = source::spawn(id, &self.bridge, callback, trigger)
            .map_err(|e| TimerError::Spawn(e.to_string()))?;

        sources.retain(|source| !source.is_stopped());
        sources.push(handle.clone());
        debug!(id, kind = %handle.kind(), %callback, "timer started");
        Ok(handle)
    }

    /// Sources that have not stopped yet.
    pub fn active(&self) -> Vec<TimerHandle> {
        self.sources
            .lock()
            .iter()
            .filter(|source| !source.is_stopped())
            .cloned()
            .collect()
    }

    /// Stop every source and refuse new ones. Idempotent.
    pub fn shutdown(&self) {
        let sources = {
            let mut sources = self.sources.lock();
            if self.shut_down.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *sources)
        };

        let stopped = sources.iter().filter(|source| !source.is_stopped()).count();
        for source in &sources {
            source.stop();
        }
        info!(stopped, "timers shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests;
