//! Timed sources and their handles
//!
//! Every source runs on its own thread and only ever touches the event bridge:
//! each firing enqueues the source's callback, which the session thread runs
//! on its next drain.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::cron::CalendarSchedule;
use crate::runtime::bridge::EventBridge;
use crate::runtime::session::Callback;

/// Shape of a timed source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Fires once after a delay
    After,
    /// Fires repeatedly on a fixed interval
    Every,
    /// Fires on a calendar schedule
    Schedule,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::After => "after",
            SourceKind::Every => "every",
            SourceKind::Schedule => "schedule",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared between a handle and its timer thread.
struct SourceShared {
    id: u64,
    kind: SourceKind,
    callback: Callback,
    bridge: Arc<EventBridge>,
    /// Holds the stop sender; dropping it wakes the timer thread.
    /// Firing and stopping both take this lock, so no firing is enqueued
    /// after `stop` returns.
    gate: Mutex<Option<Sender<()>>>,
    stopped: AtomicBool,
    fired: AtomicU64,
}

impl SourceShared {
    /// Enqueue one firing; returns false once the source should end.
    fn fire(&self) -> bool {
        let _gate = self.gate.lock();
        if self.stopped.load(Ordering::SeqCst) || self.bridge.is_closed() {
            return false;
        }
        if self.bridge.enqueue(self.callback, None) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
        trace!(id = self.id, kind = %self.kind, "timer fired");
        true
    }

    /// Stop the source; only the first call deregisters it from the bridge.
    fn release(&self) {
        let mut gate = self.gate.lock();
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(gate.take());
        self.bridge.mark_source_inactive();
        debug!(id = self.id, kind = %self.kind, "timer stopped");
    }
}

/// Handle to a running timed source.
///
/// Cloning the handle does not duplicate the source; every clone controls
/// the same timer.
#[derive(Clone)]
pub struct TimerHandle {
    shared: Arc<SourceShared>,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn kind(&self) -> SourceKind {
        self.shared.kind
    }

    pub fn callback(&self) -> Callback {
        self.shared.callback
    }

    /// Stop the timer. Idempotent.
    pub fn stop(&self) {
        self.shared.release();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Number of firings enqueued so far.
    pub fn fired(&self) -> u64 {
        self.shared.fired.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("stopped", &self.is_stopped())
            .field("fired", &self.fired())
            .finish()
    }
}

/// When a source fires.
pub(crate) enum Trigger {
    After(Duration),
    Every(Duration),
    Schedule(Box<dyn CalendarSchedule>),
}

impl Trigger {
    fn kind(&self) -> SourceKind {
        match self {
            Trigger::After(_) => SourceKind::After,
            Trigger::Every(_) => SourceKind::Every,
            Trigger::Schedule(_) => SourceKind::Schedule,
        }
    }
}

/// Register a source with the bridge and start its thread.
pub(crate) fn spawn(
    id: u64,
    bridge: &Arc<EventBridge>,
    callback: Callback,
    trigger: Trigger,
) -> std::io::Result<TimerHandle> {
    let (stop_tx, stop_rx) = channel::bounded::<()>(0);
    let shared = Arc::new(SourceShared {
        id,
        kind: trigger.kind(),
        callback,
        bridge: Arc::clone(bridge),
        gate: Mutex::new(Some(stop_tx)),
        stopped: AtomicBool::new(false),
        fired: AtomicU64::new(0),
    });
    bridge.mark_source_active();

    let worker = Arc::clone(&shared);
    let spawned = std::thread::Builder::new()
        .name(format!("timer-{}-{}", shared.kind, id))
        .spawn(move || {
            run(&worker, &stop_rx, trigger);
            worker.release();
        });

    match spawned {
        Ok(_) => Ok(TimerHandle { shared }),
        Err(err) => {
            shared.release();
            Err(err)
        }
    }
}

/// Timer thread body; returns when the source is done.
fn run(
    source: &SourceShared,
    stop: &Receiver<()>,
    trigger: Trigger,
) {
    match trigger {
        Trigger::After(delay) => {
            crossbeam::select! {
                recv(stop) -> _ => {}
                recv(channel::after(delay)) -> _ => {
                    source.fire();
                }
            }
        }
        Trigger::Every(interval) => {
            let ticker = channel::tick(interval);
            loop {
                crossbeam::select! {
                    recv(stop) -> _ => return,
                    recv(ticker) -> _ => {
                        if !source.fire() {
                            return;
                        }
                    }
                }
            }
        }
        Trigger::Schedule(schedule) => loop {
            let now = Utc::now();
            let Some(next) = schedule.next_after(now) else {
                debug!(id = source.id, "schedule has no further firing time");
                return;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            crossbeam::select! {
                recv(stop) -> _ => return,
                recv(channel::after(wait)) -> _ => {
                    if !source.fire() {
                        return;
                    }
                }
            }
        },
    }
}
