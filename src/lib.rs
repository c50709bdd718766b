//! YaoXiang Flow
//!
//! Host runtime for an embedded, single-threaded script session: dependency
//! ordered task graphs, timers and cron schedules, all funnelled into the one
//! thread allowed to run script code.
//!
//! # Example
//!
//! ```no_run
//! use yaoxiang_flow::runtime::session::NativeSession;
//! use yaoxiang_flow::runtime::value::Value;
//! use yaoxiang_flow::runtime::Host;
//! use yaoxiang_flow::util::config::RuntimeConfig;
//!
//! let mut session = NativeSession::new();
//! let load = session.register("load", |_, _| Ok(Value::from_pairs([("rows", 3)])));
//!
//! let mut host = Host::new(session, &RuntimeConfig::default());
//! host.graphs().new_graph("etl", &Value::Nil).unwrap();
//! host.graphs().node("etl", "load", load, &Value::Nil).unwrap();
//! let context = host.run_graph("etl", Value::Nil).unwrap();
//! assert_eq!(context.get("rows"), Some(&Value::Int(3)));
//! ```

#![doc(html_root_url = "https://docs.rs/yaoxiang-flow")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod runtime;
pub mod std;

// Utility modules
pub mod util;

// Re-exports
pub use runtime::bridge::EventBridge;
pub use runtime::dag::{GraphError, TaskGraph};
pub use runtime::session::{Callback, NativeSession, ScriptError, Session};
pub use runtime::timer::{CronSchedule, TimerError, TimerHandle, Timers};
pub use runtime::value::Value;
pub use runtime::Host;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime name
pub const NAME: &str = "YaoXiang Flow (爻象)";
