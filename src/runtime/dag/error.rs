//! Task graph errors

use std::time::Duration;

use crate::runtime::session::ScriptError;

/// Errors from building or running a task graph.
///
/// Construction errors (`DuplicateNode`, `UnknownDependency`, `UnknownNode`,
/// `InvalidOption`) are returned before the graph is touched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// A node with this name already exists
    #[error("node '{name}' already exists in graph '{graph}'")]
    DuplicateNode { graph: String, name: String },

    /// A declared dependency is not (yet) part of the graph
    #[error("node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    /// No node with this name
    #[error("unknown node '{name}'")]
    UnknownNode { name: String },

    /// No graph registered under this name
    #[error("unknown graph '{name}'")]
    UnknownGraph { name: String },

    /// A script-supplied option has the wrong shape
    #[error("invalid option '{option}': expected {expected}")]
    InvalidOption {
        option: String,
        expected: &'static str,
    },

    /// `run`, `runNode` or `reset` while a run is in progress
    #[error("graph '{graph}' is already running")]
    AlreadyRunning { graph: String },

    /// `run` on a graph without nodes
    #[error("graph '{graph}' has no nodes")]
    EmptyGraph { graph: String },

    /// Nodes remain pending but none can become ready
    #[error("deadlock in graph '{graph}': no runnable node among {pending:?}")]
    Deadlock { graph: String, pending: Vec<String> },

    /// A node's work did not complete
    #[error("node '{node}' failed: {cause}")]
    NodeFailure {
        node: String,
        #[source]
        cause: FailureCause,
    },

    /// The run observed a cancellation request between batches
    #[error("graph '{graph}' was cancelled")]
    Cancelled { graph: String },
}

impl GraphError {
    /// Name of the failed node, for node failures
    pub fn node(&self) -> Option<&str> {
        match self {
            GraphError::NodeFailure { node, .. } => Some(node),
            _ => None,
        }
    }
}

/// Why a node failed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureCause {
    /// The work callable raised
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// No reply within the graph's node timeout
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The coordinator went away before replying
    #[error("coordinator stopped before replying")]
    Disconnected,

    /// The worker thread could not be started
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
}
