//! Node ID for the task graph
//!
//! Nodes live in an arena owned by their graph; a `NodeId` is the node's slot
//! in that arena. Edges are stored as ids, never as references between nodes.

use std::fmt;

/// Index of a node within its graph's arena.
///
/// Ids are assigned in declaration order and stay valid for the lifetime of
/// the graph, since nodes are never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Create a new NodeId with the given value.
    ///
    /// # Examples
    ///
    /// ```
    /// use yaoxiang_flow::runtime::dag::NodeId;
    ///
    /// let id = NodeId::new(42);
    /// assert_eq!(id.value(), 42);
    /// ```
    #[inline]
    pub fn new(value: usize) -> Self {
        NodeId(value)
    }

    /// Returns the arena slot of the node.
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}
