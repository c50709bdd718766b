//! Host run loop: timers, bridge tasks and graphs on one session thread

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use yaoxiang_flow::runtime::dag::GraphStatus;
use yaoxiang_flow::util::config::RuntimeConfig;
use yaoxiang_flow::{Host, NativeSession, ScriptError, Value};

fn config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.bridge.capacity = 64;
    config.bridge.poll_interval_ms = 10;
    config
}

fn counter(session: &mut NativeSession) -> yaoxiang_flow::Callback {
    session.register("count", |globals, _| {
        let n = globals.get("count").and_then(Value::to_int).unwrap_or(0);
        globals.insert("count".to_string(), Value::Int(n + 1));
        Ok(Value::Nil)
    })
}

#[test]
fn test_one_shot_timers_run_until_idle() {
    let mut session = NativeSession::new();
    let count = counter(&mut session);
    let mut host = Host::new(session, &config());

    for delay in [5, 10, 15] {
        host.timers().after(Duration::from_millis(delay), count).unwrap();
    }

    assert_eq!(host.run_until_idle(), 3);
    assert_eq!(host.session().global("count"), Some(&Value::Int(3)));
    assert_eq!(host.bridge().active_sources(), 0);
}

#[test]
fn test_producer_thread_triggers_graph_run() {
    let mut session = NativeSession::new();
    let work = session.register("work", |_, args| {
        let input = args[0].get("input").cloned().unwrap_or_default();
        Ok(Value::from_pairs([("echo", input)]))
    });
    let mut host = Host::new(session, &config());

    let graph = host.graphs().new_graph("on-demand", &Value::Nil).unwrap();
    graph.add_node("work", work, Vec::<&str>::new()).unwrap();

    let bridge = Arc::clone(host.bridge());
    bridge.mark_source_active();
    let producer = {
        let graph = Arc::clone(&graph);
        thread::spawn(move || {
            bridge.enqueue_task(move |session| {
                graph
                    .run(session, Value::Int(7))
                    .map(|_| ())
                    .map_err(|e| ScriptError::raised(e.to_string()))
            });
            bridge.mark_source_inactive();
        })
    };

    assert_eq!(host.run_until_idle(), 1);
    producer.join().unwrap();

    assert_eq!(graph.status(), GraphStatus::Completed);
    assert_eq!(graph.context().get("echo"), Some(&Value::Int(7)));
}

#[test]
fn test_run_graph_by_name() {
    let mut session = NativeSession::new();
    let a = session.register("a", |_, _| Ok(Value::Int(1)));
    let b = session.register("b", |_, args| {
        Ok(Value::Int(args[0].get("a").and_then(Value::to_int).unwrap_or(0) + 1))
    });
    let mut host = Host::new(session, &config());

    host.graphs().new_graph("g", &Value::Nil).unwrap();
    host.graphs().node("g", "a", a, &Value::Nil).unwrap();
    host.graphs().node("g", "b", b, &Value::List(vec![Value::from("a")])).unwrap();

    let context = host.run_graph("g", Value::Nil).unwrap();
    assert_eq!(context.get("b"), Some(&Value::Int(2)));
    assert_eq!(host.run_node("g", "b"), Ok(Value::Int(2)));
}

#[test]
fn test_failing_callbacks_do_not_stop_the_loop() {
    let mut session = NativeSession::new();
    let fail = session.register("fail", |_, _| Err(ScriptError::raised("bad timer")));
    let count = counter(&mut session);
    let mut host = Host::new(session, &config());

    host.timers().after(Duration::from_millis(5), fail).unwrap();
    host.timers().after(Duration::from_millis(15), count).unwrap();

    assert_eq!(host.run_until_idle(), 2);
    assert_eq!(host.session().global("count"), Some(&Value::Int(1)));
    assert_eq!(host.bridge().stats().snapshot().failed, 1);
}

#[test]
fn test_shutdown() {
    let mut session = NativeSession::new();
    let count = counter(&mut session);
    let mut host = Host::new(session, &config());

    let ticker = host.timers().every(Duration::from_millis(5), count).unwrap();
    host.graphs().new_graph("g", &Value::Nil).unwrap();

    host.shutdown();
    host.shutdown();

    assert!(host.is_shut_down());
    assert!(ticker.is_stopped());
    assert!(host.bridge().is_closed());
    assert!(host.graphs().get("g").unwrap().is_cancelled());
    assert!(!host.wait_and_dispatch());
    assert_eq!(host.drain(), 0);
}

#[test]
fn test_drop_stops_timers() {
    let mut session = NativeSession::new();
    let count = counter(&mut session);
    let host = Host::new(session, &config());
    let ticker = host.timers().every(Duration::from_millis(5), count).unwrap();
    let bridge = Arc::clone(host.bridge());

    drop(host);
    assert!(ticker.is_stopped());
    assert!(bridge.is_closed());
    assert_eq!(bridge.active_sources(), 0);
}
