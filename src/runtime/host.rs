//! Session host: one session with its bridge, timers and graphs
//!
//! The host is created on, and never leaves, the thread that owns the
//! session. Its run-loop methods are the only places where queued callbacks
//! and graph work execute.
//!
//! ```text
//! timer threads ──► EventBridge ──► Host::drain / run_until_idle ──► session
//! graph workers ──► Coordinator ──► Host::run_graph ───────────────► session
//! ```

use std::sync::Arc;

use tracing::info;

use crate::runtime::bridge::EventBridge;
use crate::runtime::dag::GraphError;
use crate::runtime::session::Session;
use crate::runtime::timer::Timers;
use crate::runtime::value::Value;
use crate::std::GraphModule;
use crate::util::config::RuntimeConfig;

/// Owner of a session and every asynchronous source registered against it.
pub struct Host<S: Session> {
    session: S,
    bridge: Arc<EventBridge>,
    timers: Timers,
    graphs: GraphModule,
    shut_down: bool,
}

impl<S: Session> Host<S> {
    /// Build the bridge, timer scheduler and graph registry for `session`.
    pub fn new(
        session: S,
        config: &RuntimeConfig,
    ) -> Self {
        let bridge = Arc::new(EventBridge::with_config(config.bridge_config()));
        let timers = Timers::new(Arc::clone(&bridge));
        let graphs = GraphModule::new(config.graph_options());
        info!(
            capacity = bridge.capacity(),
            poll_ms = bridge.config().poll_interval.as_millis() as u64,
            "host started"
        );
        Self {
            session,
            bridge,
            timers,
            graphs,
            shut_down: false,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.bridge
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn graphs(&self) -> &GraphModule {
        &self.graphs
    }

    /// Run every queued entry without blocking.
    pub fn drain(&mut self) -> usize {
        self.bridge.drain(&mut self.session)
    }

    /// Block for one entry and run it; false when there is no more work.
    pub fn wait_and_dispatch(&mut self) -> bool {
        match self.bridge.wait_for_events() {
            Some(event) => {
                self.bridge.dispatch(&mut self.session, event);
                true
            }
            None => false,
        }
    }

    /// Run entries until the bridge closes or every source is exhausted.
    pub fn run_until_idle(&mut self) -> usize {
        self.bridge.run_until_idle(&mut self.session)
    }

    /// Run a registered graph against this host's session.
    pub fn run_graph(
        &mut self,
        name: &str,
        initial_context: Value,
    ) -> Result<Value, GraphError> {
        self.graphs.run(&mut self.session, name, initial_context)
    }

    /// Run one node of a registered graph, dependencies first.
    pub fn run_node(
        &mut self,
        graph: &str,
        node: &str,
    ) -> Result<Value, GraphError> {
        self.graphs.run_node(&mut self.session, graph, node)
    }

    /// Stop timers, cancel graphs and close the bridge. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.timers.shutdown();
        self.graphs.cancel_all();
        self.bridge.close();
        info!("host shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl<S: Session> Drop for Host<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<S: Session> std::fmt::Debug for Host<S> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("bridge", &self.bridge)
            .field("timers", &self.timers)
            .field("graphs", &self.graphs.names())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}
