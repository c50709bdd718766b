//! Task graph: named nodes, a shared context and the batch scheduler
//!
//! # Run protocol
//!
//! 1. The ready set is every Pending node whose dependencies are Completed.
//! 2. Every ready node gets its own worker thread. A worker marks its node
//!    Running, snapshots the context and asks the [`Coordinator`] to execute
//!    the work, then records the result and merges it into the context.
//! 3. The calling thread serves as the coordinator until every worker of the
//!    batch has reported, so all session calls happen on the thread that owns
//!    the session, one at a time.
//! 4. The first failure of a batch aborts the run once the batch finishes.
//!    Cancellation is observed between batches.
//!
//! All graph state (nodes, status, context) lives behind one mutex, which is
//! never held while script code runs.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::coordinator::{Coordinator, CoordinatorHandle};
use super::error::{FailureCause, GraphError};
use super::node::{EdgeList, GraphNode, NodeInfo, NodeStatus};
use super::node_id::NodeId;
use crate::runtime::session::{Callback, Session};
use crate::runtime::value::Value;

/// Per-graph execution options (`newGraph(name, {timeout, retries})`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphOptions {
    /// Deadline for each node, measured from when the coordinator starts it.
    pub timeout: Option<Duration>,
    /// Extra attempts for a node whose work raised an error.
    pub retries: u32,
}

/// Lifecycle status of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl GraphStatus {
    /// Script-facing status name
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphStatus::Pending => "pending",
            GraphStatus::Running => "running",
            GraphStatus::Completed => "completed",
            GraphStatus::Failed => "failed",
            GraphStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for GraphStatus {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `status(graph)` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSummary {
    pub name: String,
    pub status: GraphStatus,
    pub node_count: usize,
}

impl GraphSummary {
    /// Script-facing map form: `{status, name, nodeCount}`
    pub fn to_value(&self) -> Value {
        Value::from_pairs([
            ("status", Value::from(self.status.as_str())),
            ("name", Value::from(self.name.as_str())),
            ("nodeCount", Value::from(self.node_count)),
        ])
    }
}

/// Mutable graph state, guarded by the graph mutex.
#[derive(Debug)]
struct GraphState {
    /// Node arena, indexed by `NodeId`
    nodes: Vec<GraphNode>,
    /// Name -> arena slot
    by_name: HashMap<String, NodeId>,
    /// Shared context visible to every node
    context: Value,
    status: GraphStatus,
    error_handler: Option<Callback>,
    /// Nodes dispatched per batch during the last run
    batches: Vec<Vec<NodeId>>,
    last_error: Option<GraphError>,
}

impl GraphState {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            by_name: HashMap::new(),
            context: Value::Nil,
            status: GraphStatus::Pending,
            error_handler: None,
            batches: Vec::new(),
            last_error: None,
        }
    }

    fn lookup(
        &self,
        name: &str,
    ) -> Result<NodeId, GraphError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode {
                name: name.to_string(),
            })
    }

    fn node(
        &self,
        id: NodeId,
    ) -> &GraphNode {
        &self.nodes[id.value()]
    }

    fn node_mut(
        &mut self,
        id: NodeId,
    ) -> &mut GraphNode {
        &mut self.nodes[id.value()]
    }

    fn names(
        &self,
        ids: &[NodeId],
    ) -> Vec<String> {
        ids.iter().map(|&id| self.node(id).name().to_string()).collect()
    }

    /// Rebuild every successor list from the dependency lists.
    fn recompute_successors(&mut self) {
        for node in &mut self.nodes {
            node.clear_successors();
        }
        for index in 0..self.nodes.len() {
            let id = NodeId(index);
            let dependencies: EdgeList = self.nodes[index].dependencies().iter().copied().collect();
            for dependency in dependencies {
                self.node_mut(dependency).add_successor(id);
            }
        }
    }

    /// Pending nodes whose dependencies have all completed, in declaration order.
    fn ready_set(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.status() == NodeStatus::Pending)
            .filter(|node| {
                node.dependencies()
                    .iter()
                    .all(|&dep| self.node(dep).status() == NodeStatus::Completed)
            })
            .map(GraphNode::id)
            .collect()
    }

    fn pending(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|node| node.status() == NodeStatus::Pending)
            .map(|node| node.name().to_string())
            .collect()
    }

    /// Depth-first execution order for `target`: every dependency that has
    /// not completed yet, then the target itself.
    fn plan_depth_first(
        &self,
        target: NodeId,
    ) -> Vec<NodeId> {
        let mut plan = Vec::new();
        let mut visited = HashSet::new();
        self.visit(target, &mut visited, &mut plan);
        plan
    }

    fn visit(
        &self,
        id: NodeId,
        visited: &mut HashSet<NodeId>,
        plan: &mut Vec<NodeId>,
    ) {
        if !visited.insert(id) {
            return;
        }
        for &dependency in self.node(id).dependencies() {
            if self.node(dependency).status() != NodeStatus::Completed {
                self.visit(dependency, visited, plan);
            }
        }
        plan.push(id);
    }

    fn info(
        &self,
        node: &GraphNode,
    ) -> NodeInfo {
        NodeInfo {
            name: node.name().to_string(),
            status: node.status(),
            dependencies: self.names(node.dependencies()),
            successors: self.names(node.successors()),
            result: node.result().cloned(),
            attempts: node.attempts(),
        }
    }
}

/// A named, mutable graph of script work sharing one context.
///
/// `TaskGraph` is `Sync`: introspection and `cancel` may be called from any
/// thread, including while another thread is inside `run`.
#[derive(Debug)]
pub struct TaskGraph {
    name: String,
    options: GraphOptions,
    state: Mutex<GraphState>,
    /// Separate from status: only takes effect at the next batch boundary
    cancelled: AtomicBool,
}

impl TaskGraph {
    /// Create an empty graph with default options.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, GraphOptions::default())
    }

    /// Create an empty graph.
    pub fn with_options(
        name: impl Into<String>,
        options: GraphOptions,
    ) -> Self {
        Self {
            name: name.into(),
            options,
            state: Mutex::new(GraphState::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn options(&self) -> GraphOptions {
        self.options
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Add a node whose dependencies must already be in the graph.
    pub fn add_node<I, S>(
        &self,
        name: &str,
        work: Callback,
        dependencies: I,
    ) -> Result<NodeId, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.lock();
        if state.by_name.contains_key(name) {
            return Err(GraphError::DuplicateNode {
                graph: self.name.clone(),
                name: name.to_string(),
            });
        }

        let mut edges = EdgeList::new();
        for dependency in dependencies {
            let dependency = dependency.as_ref();
            let dep_id = state.by_name.get(dependency).copied().ok_or_else(|| {
                GraphError::UnknownDependency {
                    node: name.to_string(),
                    dependency: dependency.to_string(),
                }
            })?;
            if !edges.contains(&dep_id) {
                edges.push(dep_id);
            }
        }

        let id = NodeId(state.nodes.len());
        state.nodes.push(GraphNode::new(id, name, work, edges));
        state.by_name.insert(name.to_string(), id);
        state.recompute_successors();

        debug!(graph = %self.name, node = name, %id, "node added");
        Ok(id)
    }

    /// Declare that `to` depends on `from`. Adding an existing edge is a no-op.
    pub fn add_edge(
        &self,
        from: &str,
        to: &str,
    ) -> Result<(), GraphError> {
        let mut state = self.state.lock();
        let from_id = state.lookup(from)?;
        let to_id = state.lookup(to)?;

        if state.node_mut(to_id).add_dependency(from_id) {
            state.recompute_successors();
            debug!(graph = %self.name, from, to, "edge added");
        }
        Ok(())
    }

    /// Register the callback invoked once when a run fails.
    pub fn on_error(
        &self,
        handler: Callback,
    ) {
        self.state.lock().error_handler = Some(handler);
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run every node in dependency order and return the final context.
    ///
    /// The calling thread must own `session`; it acts as the coordinator for
    /// the whole run and is blocked until the run ends.
    pub fn run(
        &self,
        session: &mut dyn Session,
        initial_context: Value,
    ) -> Result<Value, GraphError> {
        let node_count = {
            let mut state = self.state.lock();
            if state.status == GraphStatus::Running {
                return Err(GraphError::AlreadyRunning {
                    graph: self.name.clone(),
                });
            }
            if state.nodes.is_empty() {
                return Err(GraphError::EmptyGraph {
                    graph: self.name.clone(),
                });
            }

            for node in &mut state.nodes {
                node.reset();
            }
            state.context = context_from(initial_context);
            state.batches.clear();
            state.last_error = None;
            state.status = GraphStatus::Running;
            self.cancelled.store(false, Ordering::SeqCst);
            state.nodes.len()
        };

        info!(graph = %self.name, nodes = node_count, "graph run started");
        let started = Instant::now();

        let err = match self.schedule(session) {
            Ok(()) => {
                let mut state = self.state.lock();
                state.status = GraphStatus::Completed;
                info!(
                    graph = %self.name,
                    batches = state.batches.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "graph run completed"
                );
                return Ok(state.context.clone());
            }
            Err(err) => err,
        };

        let handler = {
            let mut state = self.state.lock();
            for node in &mut state.nodes {
                if node.status() == NodeStatus::Pending {
                    node.skip();
                }
            }
            state.last_error = Some(err.clone());

            if matches!(err, GraphError::Cancelled { .. }) {
                state.status = GraphStatus::Cancelled;
                info!(graph = %self.name, "graph run cancelled");
                None
            } else {
                state.status = GraphStatus::Failed;
                warn!(graph = %self.name, error = %err, "graph run failed");
                state.error_handler
            }
        };

        if let Some(handler) = handler {
            self.notify_error_handler(session, handler, &err);
        }
        Err(err)
    }

    /// Scheduling loop: one batch per iteration until nothing is pending.
    fn schedule(
        &self,
        session: &mut dyn Session,
    ) -> Result<(), GraphError> {
        loop {
            // a cancel during the final batch still ends the run as Cancelled
            if self.is_cancelled() {
                return Err(self.cancelled_error());
            }

            let ready = {
                let state = self.state.lock();
                let ready = state.ready_set();
                if ready.is_empty() {
                    let pending = state.pending();
                    if pending.is_empty() {
                        return Ok(());
                    }
                    error!(graph = %self.name, ?pending, "no runnable node left");
                    return Err(GraphError::Deadlock {
                        graph: self.name.clone(),
                        pending,
                    });
                }
                ready
            };

            self.run_batch(session, &ready)?;
        }
    }

    /// Execute one ready set concurrently; returns the first reported failure.
    fn run_batch(
        &self,
        session: &mut dyn Session,
        ready: &[NodeId],
    ) -> Result<(), GraphError> {
        let batch = {
            let mut state = self.state.lock();
            state.batches.push(ready.to_vec());
            state.batches.len()
        };
        debug!(graph = %self.name, batch, size = ready.len(), "dispatching batch");

        let mut coordinator = Coordinator::new();
        let (report_tx, report_rx) = channel::unbounded::<(NodeId, Result<Value, GraphError>)>();

        let reports = thread::scope(|scope| {
            for &id in ready {
                let handle = coordinator.handle();
                let worker_tx = report_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("graph-worker-{}", id.value()))
                    .spawn_scoped(scope, move || {
                        let outcome = self.run_worker(id, &handle);
                        let _ = worker_tx.send((id, outcome));
                    });

                if let Err(e) = spawned {
                    let _ = report_tx.send((id, Err(self.fail_unspawned(id, e))));
                }
            }
            drop(report_tx);

            coordinator.serve(session, &report_rx, ready.len())
        });
        debug!(graph = %self.name, batch, served = coordinator.served(), "batch finished");

        match reports.into_iter().find_map(|(_, outcome)| outcome.err()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Worker body: dispatch through the coordinator, retrying script errors.
    fn run_worker(
        &self,
        id: NodeId,
        coordinator: &CoordinatorHandle,
    ) -> Result<Value, GraphError> {
        let (name, work, context) = self.begin_node(id);
        let started = Instant::now();

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match coordinator.execute(id, &name, work, context.clone(), self.options.timeout) {
                Ok(value) => break Ok(value),
                Err(FailureCause::Script(err)) if attempts <= self.options.retries => {
                    warn!(graph = %self.name, node = %name, attempts, error = %err, "node failed, retrying");
                }
                Err(cause) => break Err(cause),
            }
        };

        self.finish_node(id, outcome, attempts, started.elapsed())
    }

    fn fail_unspawned(
        &self,
        id: NodeId,
        err: io::Error,
    ) -> GraphError {
        let mut state = self.state.lock();
        let node = state.node_mut(id);
        node.fail(0, Duration::ZERO);
        error!(graph = %self.name, node = node.name(), error = %err, "failed to spawn worker");
        GraphError::NodeFailure {
            node: node.name().to_string(),
            cause: FailureCause::Spawn(err.to_string()),
        }
    }

    /// Mark a node Running and capture what the work needs.
    fn begin_node(
        &self,
        id: NodeId,
    ) -> (String, Callback, Value) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let node = &mut state.nodes[id.value()];
        node.start();
        (node.name().to_string(), node.work(), state.context.clone())
    }

    /// Record an outcome; successful results are merged into the context.
    fn finish_node(
        &self,
        id: NodeId,
        outcome: Result<Value, FailureCause>,
        attempts: u32,
        elapsed: Duration,
    ) -> Result<Value, GraphError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let node = &mut state.nodes[id.value()];

        match outcome {
            Ok(value) => {
                node.complete(value.clone(), attempts, elapsed);
                merge_result(&mut state.context, node.name(), value.clone());
                debug!(
                    graph = %self.name,
                    node = node.name(),
                    elapsed_us = elapsed.as_micros() as u64,
                    "node completed"
                );
                Ok(value)
            }
            Err(cause) => {
                node.fail(attempts, elapsed);
                warn!(graph = %self.name, node = node.name(), error = %cause, "node failed");
                Err(GraphError::NodeFailure {
                    node: node.name().to_string(),
                    cause,
                })
            }
        }
    }

    /// Execute one node, running its unfinished dependencies first.
    ///
    /// Bypasses the batch scheduler: everything runs in order on the calling
    /// thread. Returns the node's result.
    pub fn run_node(
        &self,
        session: &mut dyn Session,
        name: &str,
    ) -> Result<Value, GraphError> {
        let (plan, previous) = {
            let mut state = self.state.lock();
            if state.status == GraphStatus::Running {
                return Err(GraphError::AlreadyRunning {
                    graph: self.name.clone(),
                });
            }
            let target = state.lookup(name)?;
            let plan = state.plan_depth_first(target);
            let previous = state.status;
            state.status = GraphStatus::Running;
            if state.context.as_map().is_none() {
                let context = std::mem::take(&mut state.context);
                state.context = context_from(context);
            }
            (plan, previous)
        };

        debug!(graph = %self.name, node = name, steps = plan.len(), "running node directly");
        let outcome = self.run_sequential(session, &plan);
        self.state.lock().status = previous;
        outcome
    }

    fn run_sequential(
        &self,
        session: &mut dyn Session,
        plan: &[NodeId],
    ) -> Result<Value, GraphError> {
        let mut last = Value::Nil;
        for &id in plan {
            let (_, work, context) = self.begin_node(id);
            let started = Instant::now();
            let outcome = session.call(work, vec![context]).map_err(FailureCause::Script);
            last = self.finish_node(id, outcome, 1, started.elapsed())?;
        }
        Ok(last)
    }

    fn notify_error_handler(
        &self,
        session: &mut dyn Session,
        handler: Callback,
        err: &GraphError,
    ) {
        let args = vec![Value::from(err.to_string()), Value::from(err.node())];
        if let Err(handler_err) = session.call(handler, args) {
            warn!(graph = %self.name, error = %handler_err, "error handler failed");
        }
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Request cancellation; observed at the next batch boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        info!(graph = %self.name, "cancellation requested");
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancelled_error(&self) -> GraphError {
        GraphError::Cancelled {
            graph: self.name.clone(),
        }
    }

    /// Return every node to Pending and clear results and context.
    pub fn reset(&self) -> Result<(), GraphError> {
        let mut state = self.state.lock();
        if state.status == GraphStatus::Running {
            return Err(GraphError::AlreadyRunning {
                graph: self.name.clone(),
            });
        }
        for node in &mut state.nodes {
            node.reset();
        }
        state.context = Value::Nil;
        state.status = GraphStatus::Pending;
        state.batches.clear();
        state.last_error = None;
        self.cancelled.store(false, Ordering::SeqCst);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn status(&self) -> GraphStatus {
        self.state.lock().status
    }

    pub fn summary(&self) -> GraphSummary {
        let state = self.state.lock();
        GraphSummary {
            name: self.name.clone(),
            status: state.status,
            node_count: state.nodes.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().nodes.is_empty()
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.state.lock().by_name.contains_key(name)
    }

    pub fn node_status(
        &self,
        name: &str,
    ) -> Result<NodeStatus, GraphError> {
        let state = self.state.lock();
        let id = state.lookup(name)?;
        Ok(state.node(id).status())
    }

    pub fn node_result(
        &self,
        name: &str,
    ) -> Result<Option<Value>, GraphError> {
        let state = self.state.lock();
        let id = state.lookup(name)?;
        Ok(state.node(id).result().cloned())
    }

    /// Snapshot of every node in declaration order.
    pub fn nodes(&self) -> Vec<NodeInfo> {
        let state = self.state.lock();
        state.nodes.iter().map(|node| state.info(node)).collect()
    }

    pub fn node(
        &self,
        name: &str,
    ) -> Result<NodeInfo, GraphError> {
        let state = self.state.lock();
        let id = state.lookup(name)?;
        Ok(state.info(state.node(id)))
    }

    /// Dependency edges as `(from, to)`: `to` depends on `from`.
    pub fn edges(&self) -> Vec<(String, String)> {
        let state = self.state.lock();
        state
            .nodes
            .iter()
            .flat_map(|node| {
                node.dependencies()
                    .iter()
                    .map(|&dep| (state.node(dep).name().to_string(), node.name().to_string()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn context(&self) -> Value {
        self.state.lock().context.clone()
    }

    /// Node names dispatched per batch during the last run.
    pub fn batches(&self) -> Vec<Vec<String>> {
        let state = self.state.lock();
        state.batches.iter().map(|batch| state.names(batch)).collect()
    }

    pub fn last_error(&self) -> Option<GraphError> {
        self.state.lock().last_error.clone()
    }
}

/// Normalise an initial context into a map.
fn context_from(initial: Value) -> Value {
    match initial {
        Value::Nil => Value::map(),
        Value::Map(_) => initial,
        other => Value::from_pairs([("input", other)]),
    }
}

/// Merge a node result into the shared context.
///
/// Map results contribute their fields; any other non-nil result is stored
/// under the node's name.
fn merge_result(
    context: &mut Value,
    node: &str,
    result: Value,
) {
    let Some(fields) = context.as_map_mut() else {
        return;
    };
    match result {
        Value::Nil => {}
        Value::Map(contributed) => fields.extend(contributed),
        other => {
            fields.insert(node.to_string(), other);
        }
    }
}
