//! YaoXiang Flow - CLI

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use yaoxiang_flow::runtime::value::Value;
use yaoxiang_flow::util::{config, logger};
use yaoxiang_flow::{CronSchedule, Host, NativeSession, ScriptError, NAME, VERSION};

/// Task graphs, timers and cron schedules for embedded script sessions
#[derive(Parser, Debug)]
#[command(name = "yaoxiang-flow")]
#[command(author = "YaoXiang Team")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to yaoxiang-flow.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a sample graph and a few timers through a native session
    Demo,

    /// Print the next firing times of a schedule expression
    Cron {
        /// Schedule expression, e.g. "*/5 * * * *" or "@every 1h"
        #[arg(value_name = "EXPR")]
        expression: String,

        /// Number of firing times to print
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path = args.config.clone().unwrap_or_else(config::config_path);
    let runtime_config = config::load_from(&path)
        .with_context(|| format!("Failed to load config: {}", path.display()))?;

    let level = if args.verbose {
        logger::LogLevel::Debug
    } else {
        runtime_config.log_level()
    };
    logger::init_with_level(level);

    match args.command {
        Commands::Demo => demo(&runtime_config)?,
        Commands::Cron { expression, count } => {
            let schedule = CronSchedule::parse(&expression)
                .with_context(|| format!("Invalid schedule: {}", expression))?;
            for time in schedule.upcoming(Utc::now(), count) {
                println!("{}", time.to_rfc3339());
            }
        }
        Commands::Config => {
            println!("# {}", path.display());
            print!("{}", runtime_config.to_toml()?);
        }
    }

    Ok(())
}

fn demo(runtime_config: &config::RuntimeConfig) -> Result<()> {
    let mut session = NativeSession::new();

    let fetch = session.register("fetch", |_, _| {
        Ok(Value::from_pairs([(
            "orders",
            Value::List((1..=4i64).map(Value::from).collect()),
        )]))
    });
    let total = session.register("total", |_, args| {
        let orders = args[0]
            .get("orders")
            .and_then(Value::as_list)
            .ok_or_else(|| ScriptError::raised("no orders"))?;
        let sum: i64 = orders.iter().filter_map(Value::to_int).sum();
        Ok(Value::from_pairs([("total", sum)]))
    });
    let count = session.register("count", |_, args| {
        let orders = args[0].get("orders").map(Value::len).unwrap_or(0);
        Ok(Value::from_pairs([("count", orders)]))
    });
    let report = session.register("report", |_, args| {
        println!("report: {}", args[0]);
        Ok(Value::Nil)
    });
    let tick = session.register("tick", |globals, _| {
        let ticks = globals.get("ticks").and_then(Value::to_int).unwrap_or(0) + 1;
        globals.insert("ticks".to_string(), Value::Int(ticks));
        println!("tick {}", ticks);
        Ok(Value::Nil)
    });

    let mut host = Host::new(session, runtime_config);

    let graphs = host.graphs();
    graphs.new_graph("orders", &Value::Nil)?;
    graphs.node("orders", "fetch", fetch, &Value::Nil)?;
    let after_fetch = Value::from_pairs([("depends_on", Value::List(vec![Value::from("fetch")]))]);
    graphs.node("orders", "total", total, &after_fetch)?;
    graphs.node("orders", "count", count, &after_fetch)?;
    graphs.node(
        "orders",
        "report",
        report,
        &Value::List(vec![Value::from("total"), Value::from("count")]),
    )?;

    let context = host.run_graph("orders", Value::Nil)?;
    println!("context: {}", context);
    println!("batches: {:?}", host.graphs().get("orders")?.batches());

    let ticker = host.timers().every(Duration::from_millis(50), tick)?;
    host.timers().after(Duration::from_millis(180), tick)?;
    while host.session().global("ticks").and_then(Value::to_int).unwrap_or(0) < 4 {
        if !host.wait_and_dispatch() {
            break;
        }
    }
    ticker.stop();
    host.run_until_idle();

    let stats = host.bridge().stats().snapshot();
    println!(
        "events: enqueued={} dispatched={} dropped={} failed={}",
        stats.enqueued, stats.dispatched, stats.dropped, stats.failed
    );
    host.shutdown();
    Ok(())
}
