//! Event bridge: many producers, one session-owning consumer
//!
//! Timer threads and host code enqueue [`Event`]s from any thread. Only the
//! thread that owns the script session drains them, so script callbacks never
//! run anywhere else.
//!
//! Delivery is at-most-once and best-effort: a full or closed bridge drops
//! the entry instead of blocking the producer.

pub mod event;

pub use event::{Event, SessionTask};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, trace, warn};

use crate::runtime::session::{panic_message, Callback, ScriptError, Session};
use crate::runtime::value::Value;

/// Default number of buffered entries
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default wait between checks for exhausted sources
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bridge configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Maximum number of buffered entries; extra entries are dropped.
    pub capacity: usize,
    /// How long `wait_for_events` blocks before re-checking active sources.
    pub poll_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Bridge statistics.
#[derive(Debug, Default)]
pub struct BridgeStats {
    /// Entries accepted into the buffer.
    pub enqueued: AtomicU64,
    /// Entries rejected because the buffer was full or the bridge closed.
    pub dropped: AtomicU64,
    /// Entries executed by the consumer.
    pub dispatched: AtomicU64,
    /// Executed entries that returned an error or panicked.
    pub failed: AtomicU64,
}

impl BridgeStats {
    #[inline]
    fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_dispatched(
        &self,
        success: bool,
    ) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Plain-number copy of the counters.
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BridgeStatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub dispatched: u64,
    pub failed: u64,
}

/// Bounded delivery queue into the session thread.
#[derive(Debug)]
pub struct EventBridge {
    tx: Sender<Event>,
    rx: Receiver<Event>,
    config: BridgeConfig,
    /// Live asynchronous producers
    active_sources: AtomicUsize,
    closed: AtomicBool,
    stats: BridgeStats,
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::with_config(BridgeConfig::default())
    }
}

impl EventBridge {
    /// Create a bridge buffering at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self::with_config(BridgeConfig {
            capacity,
            ..BridgeConfig::default()
        })
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        // zero capacity would make a rendezvous channel
        let config = BridgeConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        let (tx, rx) = channel::bounded(config.capacity);
        Self {
            tx,
            rx,
            config,
            active_sources: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            stats: BridgeStats::default(),
        }
    }

    // ------------------------------------------------------------------
    // Producer side (any thread)
    // ------------------------------------------------------------------

    /// Queue a callback with an optional payload; returns false if dropped.
    pub fn enqueue(
        &self,
        callback: Callback,
        payload: Option<Value>,
    ) -> bool {
        self.push(Event::Callback { callback, payload })
    }

    /// Queue a closure to run with the session; returns false if dropped.
    pub fn enqueue_task<F>(
        &self,
        task: F,
    ) -> bool
    where
        F: FnOnce(&mut dyn Session) -> Result<(), ScriptError> + Send + 'static,
    {
        self.push(Event::Task(Box::new(task)))
    }

    /// Queue a prepared entry; returns false if dropped.
    pub fn push(
        &self,
        event: Event,
    ) -> bool {
        if self.is_closed() {
            self.stats.record_dropped();
            trace!(kind = event.kind(), "bridge closed, event dropped");
            return false;
        }

        match self.tx.try_send(event) {
            Ok(()) => {
                self.stats.record_enqueued();
                true
            }
            Err(TrySendError::Full(event)) => {
                self.stats.record_dropped();
                warn!(
                    kind = event.kind(),
                    capacity = self.config.capacity,
                    "event bridge full, event dropped"
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.record_dropped();
                false
            }
        }
    }

    /// Register a live producer.
    pub fn mark_source_active(&self) {
        self.active_sources.fetch_add(1, Ordering::SeqCst);
    }

    /// Deregister a producer; never goes below zero.
    pub fn mark_source_inactive(&self) {
        let _ = self
            .active_sources
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn active_sources(&self) -> usize {
        self.active_sources.load(Ordering::SeqCst)
    }

    /// Stop delivery and discard buffered entries. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let discarded = self.rx.try_iter().count();
        debug!(discarded, "event bridge closed");
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Consumer side (session thread only)
    // ------------------------------------------------------------------

    /// Block until an entry arrives.
    ///
    /// Returns `None` when the bridge is closed, or when a poll interval
    /// passes with no active sources and nothing buffered.
    pub fn wait_for_events(&self) -> Option<Event> {
        loop {
            if self.is_closed() {
                return None;
            }
            match self.rx.recv_timeout(self.config.poll_interval) {
                Ok(event) => {
                    if self.is_closed() {
                        return None;
                    }
                    return Some(event);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.active_sources() == 0 && self.rx.is_empty() {
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Execute one entry against the session.
    ///
    /// Errors and panics are logged and counted, never propagated. Returns
    /// whether the entry succeeded.
    pub fn dispatch(
        &self,
        session: &mut dyn Session,
        event: Event,
    ) -> bool {
        let kind = event.kind();
        let outcome = catch_unwind(AssertUnwindSafe(|| match event {
            Event::Callback { callback, payload } => {
                let args = payload.into_iter().collect();
                session.call(callback, args).map(|_| ())
            }
            Event::Task(task) => task(session),
        }));

        let success = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(kind, error = %err, "event failed");
                false
            }
            Err(payload) => {
                warn!(kind, panic = %panic_message(payload.as_ref()), "event panicked");
                false
            }
        };
        self.stats.record_dispatched(success);
        success
    }

    /// Execute every entry buffered right now without blocking.
    ///
    /// Entries enqueued while draining wait for the next call. Returns the
    /// number of entries executed.
    pub fn drain(
        &self,
        session: &mut dyn Session,
    ) -> usize {
        let mut executed = 0;
        for _ in 0..self.rx.len() {
            if self.is_closed() {
                break;
            }
            match self.rx.try_recv() {
                Ok(event) => {
                    self.dispatch(session, event);
                    executed += 1;
                }
                Err(_) => break,
            }
        }
        executed
    }

    /// Wait and dispatch until there is no more work.
    pub fn run_until_idle(
        &self,
        session: &mut dyn Session,
    ) -> usize {
        let mut executed = 0;
        while let Some(event) = self.wait_for_events() {
            self.dispatch(session, event);
            executed += 1;
        }
        debug!(executed, "event bridge idle");
        executed
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Entries currently buffered
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn config(&self) -> BridgeConfig {
        self.config
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }
}
