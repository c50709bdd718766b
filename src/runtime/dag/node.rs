//! Graph node for the task graph
//!
//! Represents one named unit of work and its dependency edges.

use std::fmt;
use std::time::Duration;

use smallvec::SmallVec;

use super::node_id::NodeId;
use crate::runtime::session::Callback;
use crate::runtime::value::Value;

/// Edge list of a node; graphs are small, most nodes have a handful of edges.
pub type EdgeList = SmallVec<[NodeId; 4]>;

/// Execution status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    /// Waiting for its dependencies or for the next run.
    Pending,
    /// Dispatched to the coordinator.
    Running,
    /// Work returned successfully.
    Completed,
    /// Work raised an error, timed out or could not be dispatched.
    Failed,
    /// The run stopped before this node was dispatched.
    Skipped,
}

impl NodeStatus {
    /// Script-facing status name
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the task graph.
///
/// `dependencies` are declared by the script; `successors` are derived from
/// every other node's dependencies and recomputed whenever the graph changes.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Arena slot of this node
    id: NodeId,
    /// Unique name within the graph
    name: String,
    /// Script callable performing the work
    work: Callback,
    /// Nodes that must complete before this one
    dependencies: EdgeList,
    /// Nodes that depend on this one
    successors: EdgeList,
    /// Current status
    status: NodeStatus,
    /// Value produced by the last successful execution
    result: Option<Value>,
    /// Attempts made during the last execution (retries included)
    attempts: u32,
    /// Wall time of the last execution
    elapsed: Option<Duration>,
}

impl GraphNode {
    /// Create a pending node.
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        work: Callback,
        dependencies: EdgeList,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            work,
            dependencies,
            successors: EdgeList::new(),
            status: NodeStatus::Pending,
            result: None,
            attempts: 0,
            elapsed: None,
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn work(&self) -> Callback {
        self.work
    }

    #[inline]
    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    #[inline]
    pub fn successors(&self) -> &[NodeId] {
        &self.successors
    }

    #[inline]
    pub fn status(&self) -> NodeStatus {
        self.status
    }

    #[inline]
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[inline]
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// Check if this node depends on the given node.
    #[inline]
    pub fn depends_on(
        &self,
        node_id: NodeId,
    ) -> bool {
        self.dependencies.contains(&node_id)
    }

    /// Check if this node is a root (no dependencies).
    #[inline]
    pub fn is_root(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Add a dependency edge; returns false if it already existed.
    pub(crate) fn add_dependency(
        &mut self,
        dependency: NodeId,
    ) -> bool {
        if self.depends_on(dependency) {
            return false;
        }
        self.dependencies.push(dependency);
        true
    }

    pub(crate) fn clear_successors(&mut self) {
        self.successors.clear();
    }

    pub(crate) fn add_successor(
        &mut self,
        successor: NodeId,
    ) {
        self.successors.push(successor);
    }

    pub(crate) fn start(&mut self) {
        self.status = NodeStatus::Running;
        self.attempts = 0;
        self.elapsed = None;
    }

    pub(crate) fn complete(
        &mut self,
        result: Value,
        attempts: u32,
        elapsed: Duration,
    ) {
        self.status = NodeStatus::Completed;
        self.result = Some(result);
        self.attempts = attempts;
        self.elapsed = Some(elapsed);
    }

    pub(crate) fn fail(
        &mut self,
        attempts: u32,
        elapsed: Duration,
    ) {
        self.status = NodeStatus::Failed;
        self.attempts = attempts;
        self.elapsed = Some(elapsed);
    }

    pub(crate) fn skip(&mut self) {
        self.status = NodeStatus::Skipped;
    }

    /// Back to Pending with no result.
    pub(crate) fn reset(&mut self) {
        self.status = NodeStatus::Pending;
        self.result = None;
        self.attempts = 0;
        self.elapsed = None;
    }
}

impl fmt::Display for GraphNode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "GraphNode({}: {} [{}])", self.id, self.name, self.status)
    }
}

/// Read-only snapshot of a node, resolved to names.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub status: NodeStatus,
    pub dependencies: Vec<String>,
    pub successors: Vec<String>,
    pub result: Option<Value>,
    pub attempts: u32,
}

impl NodeInfo {
    /// Script-facing map form
    pub fn to_value(&self) -> Value {
        let names = |list: &[String]| {
            Value::List(list.iter().map(|n| Value::from(n.as_str())).collect())
        };
        Value::from_pairs([
            ("name", Value::from(self.name.as_str())),
            ("status", Value::from(self.status.as_str())),
            ("dependencies", names(&self.dependencies)),
            ("successors", names(&self.successors)),
            ("result", self.result.clone().unwrap_or_default()),
            ("attempts", Value::from(self.attempts)),
        ])
    }
}
