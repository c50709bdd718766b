//! End-to-end graph runs through a native session

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use yaoxiang_flow::runtime::dag::{GraphError, GraphStatus, NodeStatus, TaskGraph};
use yaoxiang_flow::{NativeSession, Value};

/// A four-stage pipeline: extract -> (clean, enrich) -> join -> publish.
#[test]
fn test_layered_pipeline() {
    let mut session = NativeSession::new();
    let extract = session.register("extract", |_, _| {
        Ok(Value::from_pairs([(
            "raw",
            Value::List((1..=5i64).map(Value::from).collect()),
        )]))
    });
    let clean = session.register("clean", |_, args| {
        let raw = args[0].get("raw").and_then(Value::as_list).unwrap_or(&[]);
        let even: Vec<Value> = raw
            .iter()
            .filter(|v| v.to_int().is_some_and(|n| n % 2 == 0))
            .cloned()
            .collect();
        Ok(Value::from_pairs([("clean", even)]))
    });
    let enrich = session.register("enrich", |_, _| {
        Ok(Value::from_pairs([("source", "ledger")]))
    });
    let join = session.register("join", |_, args| {
        let context = &args[0];
        let count = context.get("clean").map(Value::len).unwrap_or(0);
        let source = context.get("source").and_then(Value::as_str).unwrap_or("?");
        Ok(Value::from(format!("{} rows from {}", count, source)))
    });
    let publish = session.register("publish", |globals, args| {
        globals.insert("published".to_string(), args[0].get("join").cloned().unwrap_or_default());
        Ok(Value::Nil)
    });

    let graph = TaskGraph::new("pipeline");
    graph.add_node("extract", extract, Vec::<&str>::new()).unwrap();
    graph.add_node("clean", clean, ["extract"]).unwrap();
    graph.add_node("enrich", enrich, ["extract"]).unwrap();
    graph.add_node("join", join, ["clean", "enrich"]).unwrap();
    graph.add_node("publish", publish, ["join"]).unwrap();

    let context = graph.run(&mut session, Value::from_pairs([("run", 1)])).unwrap();

    assert_eq!(context.get("run"), Some(&Value::Int(1)));
    assert_eq!(context.get("join"), Some(&Value::from("2 rows from ledger")));
    assert_eq!(session.global("published"), Some(&Value::from("2 rows from ledger")));
    assert_eq!(graph.batches().len(), 4);
    assert_eq!(graph.batches()[1].len(), 2);
    assert!(graph
        .nodes()
        .iter()
        .all(|node| node.status == NodeStatus::Completed));
}

/// Introspection from another thread never blocks a run.
#[test]
fn test_introspection_during_run() {
    let mut session = NativeSession::new();
    let slow = session.register("slow", |_, _| {
        thread::sleep(Duration::from_millis(30));
        Ok(Value::Nil)
    });

    let graph = Arc::new(TaskGraph::new("observed"));
    for i in 0..4 {
        let name = format!("n{}", i);
        let deps: Vec<String> = if i == 0 { vec![] } else { vec![format!("n{}", i - 1)] };
        graph.add_node(&name, slow, deps).unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let saw_running = Arc::new(AtomicBool::new(false));
    let observer = {
        let graph = Arc::clone(&graph);
        let done = Arc::clone(&done);
        let saw_running = Arc::clone(&saw_running);
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                if graph.status() == GraphStatus::Running {
                    saw_running.store(true, Ordering::SeqCst);
                }
                let _ = graph.nodes();
                let _ = graph.edges();
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    assert!(graph.run(&mut session, Value::Nil).is_ok());
    done.store(true, Ordering::SeqCst);
    observer.join().unwrap();

    assert!(saw_running.load(Ordering::SeqCst));
    assert_eq!(graph.status(), GraphStatus::Completed);
}

/// Cancelling from another thread stops the run at the next batch boundary.
#[test]
fn test_cancel_from_another_thread() {
    let mut session = NativeSession::new();
    let slow = session.register("slow", |_, _| {
        thread::sleep(Duration::from_millis(40));
        Ok(Value::Nil)
    });

    let graph = Arc::new(TaskGraph::new("long"));
    graph.add_node("first", slow, Vec::<&str>::new()).unwrap();
    graph.add_node("second", slow, ["first"]).unwrap();
    graph.add_node("third", slow, ["second"]).unwrap();

    let canceller = {
        let graph = Arc::clone(&graph);
        thread::spawn(move || {
            while graph.node_status("first") != Ok(NodeStatus::Running) {
                thread::sleep(Duration::from_millis(1));
            }
            graph.cancel();
        })
    };

    let result = graph.run(&mut session, Value::Nil);
    canceller.join().unwrap();

    assert!(result.is_err());
    assert_eq!(graph.status(), GraphStatus::Cancelled);
    assert_eq!(graph.node_status("first"), Ok(NodeStatus::Completed));
    assert_eq!(graph.node_status("third"), Ok(NodeStatus::Skipped));
}

/// A cancel that lands during the last batch still ends the run as Cancelled.
#[test]
fn test_cancel_during_last_batch() {
    let mut session = NativeSession::new();
    let slow = session.register("slow", |_, _| {
        thread::sleep(Duration::from_millis(40));
        Ok(Value::from_pairs([("slow", true)]))
    });

    let graph = Arc::new(TaskGraph::new("short"));
    graph.add_node("slow", slow, Vec::<&str>::new()).unwrap();

    let canceller = {
        let graph = Arc::clone(&graph);
        thread::spawn(move || {
            while graph.node_status("slow") != Ok(NodeStatus::Running) {
                thread::sleep(Duration::from_millis(1));
            }
            graph.cancel();
        })
    };

    let result = graph.run(&mut session, Value::Nil);
    canceller.join().unwrap();

    assert!(matches!(result, Err(GraphError::Cancelled { .. })));
    assert_eq!(graph.status(), GraphStatus::Cancelled);
    assert_eq!(graph.node_status("slow"), Ok(NodeStatus::Completed));
    assert_eq!(graph.context().get("slow"), Some(&Value::Bool(true)));
}
