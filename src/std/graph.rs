//! Script surface for task graphs (`std.graph`)
//!
//! Graphs are addressed by name, the way scripts refer to them. Every call
//! takes and returns [`Value`]s so a binding layer can forward script
//! arguments unchanged.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use super::ModuleExport;
use crate::runtime::dag::{GraphError, GraphOptions, TaskGraph};
use crate::runtime::session::{Callback, Session};
use crate::runtime::value::Value;

/// Named graphs of one session.
#[derive(Debug, Default)]
pub struct GraphModule {
    graphs: Mutex<IndexMap<String, Arc<TaskGraph>>>,
    defaults: GraphOptions,
}

impl GraphModule {
    /// Registry whose graphs default to `defaults` when created without options.
    pub fn new(defaults: GraphOptions) -> Self {
        Self {
            graphs: Mutex::new(IndexMap::new()),
            defaults,
        }
    }

    /// `newGraph(name, {timeout, retries})`
    ///
    /// `timeout` is in milliseconds. Reusing a name replaces the registered
    /// graph; handles to the old one stay usable.
    pub fn new_graph(
        &self,
        name: &str,
        options: &Value,
    ) -> Result<Arc<TaskGraph>, GraphError> {
        let options = parse_options(options, self.defaults)?;
        let graph = Arc::new(TaskGraph::with_options(name, options));
        self.graphs.lock().insert(name.to_string(), Arc::clone(&graph));
        debug!(graph = name, ?options, "graph registered");
        Ok(graph)
    }

    /// Look up a registered graph.
    pub fn get(
        &self,
        name: &str,
    ) -> Result<Arc<TaskGraph>, GraphError> {
        self.graphs
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownGraph {
                name: name.to_string(),
            })
    }

    /// Names of all registered graphs, in creation order.
    pub fn names(&self) -> Vec<String> {
        self.graphs.lock().keys().cloned().collect()
    }

    /// Drop a graph from the registry.
    pub fn remove(
        &self,
        name: &str,
    ) -> Option<Arc<TaskGraph>> {
        self.graphs.lock().shift_remove(name)
    }

    /// `node(graph, name, work, {depends_on: [names]})`
    pub fn node(
        &self,
        graph: &str,
        name: &str,
        work: Callback,
        options: &Value,
    ) -> Result<(), GraphError> {
        let dependencies = parse_dependencies(options)?;
        self.get(graph)?.add_node(name, work, dependencies)?;
        Ok(())
    }

    /// `edge(graph, from, to)`
    pub fn edge(
        &self,
        graph: &str,
        from: &str,
        to: &str,
    ) -> Result<(), GraphError> {
        self.get(graph)?.add_edge(from, to)
    }

    /// `run(graph, initialContext) -> finalContext`
    pub fn run(
        &self,
        session: &mut dyn Session,
        graph: &str,
        initial_context: Value,
    ) -> Result<Value, GraphError> {
        // the registry lock is released before any script code runs
        let graph = self.get(graph)?;
        graph.run(session, initial_context)
    }

    /// `cancel(graph)`
    pub fn cancel(
        &self,
        graph: &str,
    ) -> Result<(), GraphError> {
        self.get(graph)?.cancel();
        Ok(())
    }

    /// Cancel every registered graph.
    pub fn cancel_all(&self) {
        let graphs: Vec<_> = self.graphs.lock().values().cloned().collect();
        for graph in graphs {
            graph.cancel();
        }
    }

    /// `status(graph) -> {status, name, nodeCount}`
    pub fn status(
        &self,
        graph: &str,
    ) -> Result<Value, GraphError> {
        Ok(self.get(graph)?.summary().to_value())
    }

    /// `on_error(graph, handler)`
    pub fn on_error(
        &self,
        graph: &str,
        handler: Callback,
    ) -> Result<(), GraphError> {
        self.get(graph)?.on_error(handler);
        Ok(())
    }

    /// `getNodes(graph) -> [{name, status, dependencies, successors, result, attempts}]`
    pub fn get_nodes(
        &self,
        graph: &str,
    ) -> Result<Value, GraphError> {
        let nodes = self.get(graph)?.nodes();
        Ok(Value::List(nodes.iter().map(|node| node.to_value()).collect()))
    }

    /// `getEdges(graph) -> [{from, to}]`
    pub fn get_edges(
        &self,
        graph: &str,
    ) -> Result<Value, GraphError> {
        let edges = self
            .get(graph)?
            .edges()
            .into_iter()
            .map(|(from, to)| Value::from_pairs([("from", from), ("to", to)]))
            .collect();
        Ok(Value::List(edges))
    }

    /// `getNodeStatus(graph, name) -> "pending" | "running" | ...`
    pub fn get_node_status(
        &self,
        graph: &str,
        name: &str,
    ) -> Result<Value, GraphError> {
        let status = self.get(graph)?.node_status(name)?;
        Ok(Value::from(status.as_str()))
    }

    /// `runNode(graph, name) -> result`
    pub fn run_node(
        &self,
        session: &mut dyn Session,
        graph: &str,
        name: &str,
    ) -> Result<Value, GraphError> {
        let graph = self.get(graph)?;
        graph.run_node(session, name)
    }

    /// `reset(graph)`
    pub fn reset(
        &self,
        graph: &str,
    ) -> Result<(), GraphError> {
        self.get(graph)?.reset()
    }
}

fn parse_options(
    options: &Value,
    defaults: GraphOptions,
) -> Result<GraphOptions, GraphError> {
    let mut parsed = defaults;
    if options.is_nil() {
        return Ok(parsed);
    }
    let fields = options.as_map().ok_or_else(|| GraphError::InvalidOption {
        option: "options".to_string(),
        expected: "map",
    })?;

    if let Some(timeout) = fields.get("timeout") {
        parsed.timeout = match timeout {
            Value::Nil => None,
            other => {
                let millis = other
                    .to_float()
                    .filter(|ms| ms.is_finite() && *ms > 0.0)
                    .ok_or_else(|| GraphError::InvalidOption {
                        option: "timeout".to_string(),
                        expected: "positive number of milliseconds",
                    })?;
                Some(Duration::from_secs_f64(millis / 1000.0))
            }
        };
    }

    if let Some(retries) = fields.get("retries") {
        parsed.retries = retries
            .to_int()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| GraphError::InvalidOption {
                option: "retries".to_string(),
                expected: "non-negative integer",
            })?;
    }

    Ok(parsed)
}

fn parse_dependencies(options: &Value) -> Result<Vec<String>, GraphError> {
    let invalid = || GraphError::InvalidOption {
        option: "depends_on".to_string(),
        expected: "list of node names",
    };

    let depends_on = match options {
        Value::Nil => return Ok(Vec::new()),
        Value::Map(fields) => match fields.get("depends_on") {
            None | Some(Value::Nil) => return Ok(Vec::new()),
            Some(list) => list,
        },
        // a bare list is accepted as the dependency list
        Value::List(_) => options,
        _ => return Err(invalid()),
    };

    depends_on
        .as_list()
        .ok_or_else(invalid)?
        .iter()
        .map(|name| name.as_str().map(str::to_string).ok_or_else(invalid))
        .collect()
}

/// Exports of `std.graph`
pub fn exports() -> Vec<ModuleExport> {
    vec![
        ModuleExport {
            short_name: "newGraph",
            qualified_name: "std.graph.newGraph",
            signature: "(name: String, options: {timeout: Int, retries: Int}) -> Graph",
        },
        ModuleExport {
            short_name: "node",
            qualified_name: "std.graph.node",
            signature: "(graph: Graph, name: String, work: Fn, options: {depends_on: [String]}) -> Void",
        },
        ModuleExport {
            short_name: "edge",
            qualified_name: "std.graph.edge",
            signature: "(graph: Graph, from: String, to: String) -> Void",
        },
        ModuleExport {
            short_name: "run",
            qualified_name: "std.graph.run",
            signature: "(graph: Graph, context: Any) -> Map",
        },
        ModuleExport {
            short_name: "cancel",
            qualified_name: "std.graph.cancel",
            signature: "(graph: Graph) -> Void",
        },
        ModuleExport {
            short_name: "status",
            qualified_name: "std.graph.status",
            signature: "(graph: Graph) -> {status: String, name: String, nodeCount: Int}",
        },
        ModuleExport {
            short_name: "on_error",
            qualified_name: "std.graph.on_error",
            signature: "(graph: Graph, handler: Fn) -> Void",
        },
        ModuleExport {
            short_name: "getNodes",
            qualified_name: "std.graph.getNodes",
            signature: "(graph: Graph) -> [Map]",
        },
        ModuleExport {
            short_name: "getEdges",
            qualified_name: "std.graph.getEdges",
            signature: "(graph: Graph) -> [{from: String, to: String}]",
        },
        ModuleExport {
            short_name: "getNodeStatus",
            qualified_name: "std.graph.getNodeStatus",
            signature: "(graph: Graph, name: String) -> String",
        },
        ModuleExport {
            short_name: "runNode",
            qualified_name: "std.graph.runNode",
            signature: "(graph: Graph, name: String) -> Any",
        },
        ModuleExport {
            short_name: "reset",
            qualified_name: "std.graph.reset",
            signature: "(graph: Graph) -> Void",
        },
    ]
}
