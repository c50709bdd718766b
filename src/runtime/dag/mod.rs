//! Task graph execution engine
//!
//! Named units of script work, their dependency edges and a shared context,
//! executed batch by batch with independent nodes running concurrently.
//!
//! # Architecture
//!
//! - [`NodeId`](node_id::NodeId) - Arena slot of a node
//! - [`GraphNode`](node::GraphNode) - A single node: name, work, edges, status, result
//! - [`TaskGraph`](graph::TaskGraph) - The graph, its context and the scheduling loop
//! - [`Coordinator`](coordinator::Coordinator) - The only path from a worker into the session
//! - [`GraphError`](error::GraphError) - Construction and run errors

pub mod coordinator;
pub mod error;
pub mod graph;
pub mod node;
pub mod node_id;

pub use coordinator::{Coordinator, CoordinatorHandle, ExecRequest, Reply};
pub use error::{FailureCause, GraphError};
pub use graph::{GraphOptions, GraphStatus, GraphSummary, TaskGraph};
pub use node::{EdgeList, GraphNode, NodeInfo, NodeStatus};
pub use node_id::NodeId;
