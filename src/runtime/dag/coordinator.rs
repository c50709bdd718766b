//! Coordinator: the single writer into the script session during a run
//!
//! Worker threads never touch the session. Each one sends an [`ExecRequest`]
//! (node, context snapshot, private reply channel) and blocks on the reply.
//! The coordinator runs on the thread that owns the session and serves
//! requests strictly one at a time, in arrival order.
//!
//! A reply channel carries [`Reply::Started`] followed by the outcome. Node
//! deadlines run from `Started`, so time spent queued behind a sibling does
//! not count. A request whose worker has already hung up is skipped.
//!
//! ```text
//! worker a ─┐                      ┌─► reply a
//! worker b ─┼─► requests ─► serve ─┼─► reply b
//! worker c ─┘      (FIFO)   (owner) └─► reply c
//! ```

use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use super::error::FailureCause;
use super::node_id::NodeId;
use crate::runtime::session::{Callback, ScriptError, Session};
use crate::runtime::value::Value;

/// A request to run one node's work inside the session.
#[derive(Debug)]
pub struct ExecRequest {
    pub node: NodeId,
    pub name: String,
    pub work: Callback,
    pub context: Value,
    pub reply: Sender<Reply>,
}

/// Messages sent back to a worker, in order.
#[derive(Debug)]
pub enum Reply {
    /// The coordinator has begun executing the work.
    Started,
    Finished(Result<Value, ScriptError>),
}

/// Receiving side, owned by the session thread for the duration of a batch.
#[derive(Debug)]
pub struct Coordinator {
    tx: Sender<ExecRequest>,
    rx: Receiver<ExecRequest>,
    served: u64,
}

/// Sending side, cloned into every worker.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: Sender<ExecRequest>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx, served: 0 }
    }

    /// Handle for a worker to send requests with.
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            tx: self.tx.clone(),
        }
    }

    /// Number of requests executed so far.
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Serve requests until `expected` reports have arrived on `reports`.
    ///
    /// Reports are returned in arrival order. Requests still queued when the
    /// last report arrives belong to workers that stopped waiting and are
    /// dropped unserved.
    pub fn serve<R>(
        &mut self,
        session: &mut dyn Session,
        reports: &Receiver<R>,
        expected: usize,
    ) -> Vec<R> {
        let mut received = Vec::with_capacity(expected);

        let mut workers_gone = false;
        while received.len() < expected && !workers_gone {
            crossbeam::select! {
                recv(self.rx) -> request => {
                    if let Ok(request) = request {
                        self.execute(session, request);
                    }
                }
                recv(reports) -> report => match report {
                    Ok(report) => received.push(report),
                    Err(_) => workers_gone = true,
                },
            }
        }

        received
    }

    /// Execute one request against the session.
    ///
    /// Returns false when the worker is gone and the work was not run.
    pub fn execute(
        &mut self,
        session: &mut dyn Session,
        request: ExecRequest,
    ) -> bool {
        if request.reply.send(Reply::Started).is_err() {
            debug!(node = %request.name, "worker gone, request skipped");
            return false;
        }

        debug!(node = %request.name, id = request.node.value(), "executing node work");
        let result = session.call(request.work, vec![request.context]);
        self.served += 1;

        if request.reply.send(Reply::Finished(result)).is_err() {
            debug!(node = %request.name, "worker stopped waiting, result discarded");
        }
        true
    }
}

impl CoordinatorHandle {
    /// Send a request and block until the coordinator replies.
    ///
    /// `timeout` is measured from the moment the coordinator starts the work.
    pub fn execute(
        &self,
        node: NodeId,
        name: &str,
        work: Callback,
        context: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, FailureCause> {
        let (reply, reply_rx) = channel::bounded(2);
        self.tx
            .send(ExecRequest {
                node,
                name: name.to_string(),
                work,
                context,
                reply,
            })
            .map_err(|_| FailureCause::Disconnected)?;

        // queued time is not charged against the deadline
        match reply_rx.recv() {
            Ok(Reply::Started) => {}
            Ok(Reply::Finished(result)) => return result.map_err(FailureCause::Script),
            Err(_) => return Err(FailureCause::Disconnected),
        }

        let reply = match timeout {
            Some(limit) => reply_rx.recv_timeout(limit).map_err(|e| match e {
                RecvTimeoutError::Timeout => FailureCause::TimedOut(limit),
                RecvTimeoutError::Disconnected => FailureCause::Disconnected,
            })?,
            None => reply_rx.recv().map_err(|_| FailureCause::Disconnected)?,
        };

        match reply {
            Reply::Finished(result) => result.map_err(FailureCause::Script),
            Reply::Started => Err(FailureCause::Disconnected),
        }
    }
}
