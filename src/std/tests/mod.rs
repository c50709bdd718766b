//! std 模块单元测试

use std::sync::Arc;
use std::time::Duration;

use crate::runtime::bridge::EventBridge;
use crate::runtime::dag::{GraphError, GraphOptions, GraphStatus};
use crate::runtime::session::{Callback, NativeSession};
use crate::runtime::timer::{TimerError, Timers};
use crate::runtime::value::Value;
use crate::std::{get_module_exports, timer, GraphModule};

#[cfg(test)]
mod graph_surface_tests {
    use super::*;

    fn deps(names: &[&str]) -> Value {
        Value::from_pairs([(
            "depends_on",
            Value::List(names.iter().map(|&n| Value::from(n)).collect()),
        )])
    }

    #[test]
    fn test_build_and_run_by_name() {
        let mut session = NativeSession::new();
        let fetch = session.register("fetch", |_, _| Ok(Value::from_pairs([("rows", 3)])));
        let count = session.register("count", |_, args| {
            let rows = args[0].get("rows").and_then(Value::to_int).unwrap_or(0);
            Ok(Value::Int(rows * 2))
        });

        let graphs = GraphModule::default();
        graphs.new_graph("etl", &Value::Nil).unwrap();
        graphs.node("etl", "fetch", fetch, &Value::Nil).unwrap();
        graphs.node("etl", "count", count, &deps(&["fetch"])).unwrap();

        let context = graphs.run(&mut session, "etl", Value::Nil).unwrap();
        assert_eq!(context.get("count"), Some(&Value::Int(6)));

        let status = graphs.status("etl").unwrap();
        assert_eq!(status.get("status"), Some(&Value::from("completed")));
        assert_eq!(status.get("nodeCount"), Some(&Value::Int(2)));
        assert_eq!(
            graphs.get_node_status("etl", "count").unwrap(),
            Value::from("completed")
        );
        assert_eq!(
            graphs.get_edges("etl").unwrap(),
            Value::List(vec![Value::from_pairs([("from", "fetch"), ("to", "count")])])
        );
        assert_eq!(graphs.get_nodes("etl").unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_graph() {
        let graphs = GraphModule::default();
        assert_eq!(
            graphs.cancel("ghost"),
            Err(GraphError::UnknownGraph {
                name: "ghost".to_string()
            })
        );
    }

    #[test]
    fn test_options() {
        let graphs = GraphModule::new(GraphOptions {
            timeout: None,
            retries: 1,
        });

        let defaulted = graphs.new_graph("a", &Value::Nil).unwrap();
        assert_eq!(defaulted.options().retries, 1);

        let options = Value::from_pairs([("timeout", Value::Int(250)), ("retries", Value::Int(3))]);
        let graph = graphs.new_graph("b", &options).unwrap();
        assert_eq!(graph.options().timeout, Some(Duration::from_millis(250)));
        assert_eq!(graph.options().retries, 3);

        let bad = Value::from_pairs([("retries", Value::Int(-1))]);
        assert!(matches!(
            graphs.new_graph("c", &bad),
            Err(GraphError::InvalidOption { .. })
        ));
        assert!(matches!(
            graphs.new_graph("d", &Value::Int(1)),
            Err(GraphError::InvalidOption { .. })
        ));
        assert_eq!(graphs.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_invalid_dependency_list() {
        let graphs = GraphModule::default();
        graphs.new_graph("g", &Value::Nil).unwrap();

        let bad = Value::from_pairs([("depends_on", Value::Int(1))]);
        assert!(matches!(
            graphs.node("g", "a", Callback(0), &bad),
            Err(GraphError::InvalidOption { .. })
        ));

        graphs.node("g", "a", Callback(0), &Value::Nil).unwrap();
        let bare = Value::List(vec![Value::from("a")]);
        graphs.node("g", "b", Callback(0), &bare).unwrap();
        assert_eq!(graphs.get("g").unwrap().edges().len(), 1);
    }

    #[test]
    fn test_run_node_reset_and_cancel_all() {
        let mut session = NativeSession::new();
        let one = session.register("one", |_, _| Ok(Value::Int(1)));
        let graphs = GraphModule::default();
        graphs.new_graph("g", &Value::Nil).unwrap();
        graphs.node("g", "one", one, &Value::Nil).unwrap();

        assert_eq!(graphs.run_node(&mut session, "g", "one"), Ok(Value::Int(1)));
        graphs.reset("g").unwrap();
        assert_eq!(graphs.get_node_status("g", "one").unwrap(), Value::from("pending"));

        graphs.cancel_all();
        assert!(graphs.get("g").unwrap().is_cancelled());
        assert_eq!(graphs.get("g").unwrap().status(), GraphStatus::Pending);
    }

    #[test]
    fn test_error_handler_by_name() {
        let mut session = NativeSession::new();
        let fail = session.register("fail", |_, _| Err(crate::runtime::session::ScriptError::raised("x")));
        let handler = session.register("handler", |globals, args| {
            globals.insert("failed_node".to_string(), args[1].clone());
            Ok(Value::Nil)
        });

        let graphs = GraphModule::default();
        graphs.new_graph("g", &Value::Nil).unwrap();
        graphs.node("g", "bad", fail, &Value::Nil).unwrap();
        graphs.on_error("g", handler).unwrap();

        assert!(graphs.run(&mut session, "g", Value::Nil).is_err());
        assert_eq!(session.global("failed_node"), Some(&Value::from("bad")));
    }
}

#[cfg(test)]
mod timer_surface_tests {
    use super::*;

    #[test]
    fn test_millisecond_validation() {
        let timers = Timers::new(Arc::new(EventBridge::new(16)));

        assert_eq!(
            timer::after(&timers, -1, Callback(0)).unwrap_err(),
            TimerError::InvalidInterval
        );
        assert_eq!(
            timer::every(&timers, 0, Callback(0)).unwrap_err(),
            TimerError::InvalidInterval
        );
        assert!(matches!(
            timer::schedule(&timers, "not a schedule", Callback(0)),
            Err(TimerError::InvalidSchedule(_))
        ));

        let handle = timer::every(&timers, 60_000, Callback(0)).unwrap();
        let value = timer::handle_value(&handle);
        assert_eq!(value.get("kind"), Some(&Value::from("every")));
        assert_eq!(value.get("stopped"), Some(&Value::Bool(false)));
        handle.stop();
        assert_eq!(
            timer::handle_value(&handle).get("stopped"),
            Some(&Value::Bool(true))
        );
    }
}

#[cfg(test)]
mod export_tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let std_exports = get_module_exports("std").unwrap();
        assert_eq!(std_exports.len(), 2);

        let graph = get_module_exports("std.graph").unwrap();
        for name in [
            "newGraph",
            "node",
            "edge",
            "run",
            "cancel",
            "status",
            "on_error",
            "getNodes",
            "getEdges",
            "getNodeStatus",
            "runNode",
            "reset",
        ] {
            assert!(graph.iter().any(|e| e.short_name == name), "{}", name);
        }

        let timer = get_module_exports("std.timer").unwrap();
        assert!(timer.iter().all(|e| e.qualified_name.starts_with("std.timer.")));
        assert!(get_module_exports("std.io").is_none());
    }
}
