//! Sleep-then-callback demo.
//!
//! Models a thin binding layer in front of the host: raw string arguments are
//! validated (count and types) before anything reaches the core, then
//! dispatched to the synchronous or asynchronous variant.
//!
//! ```text
//! cargo run --example sleep_callback -- 50 log 10 count
//! cargo run --example sleep_callback -- --sync 20 log
//! RUST_LOG=spindle_rs=debug cargo run --example sleep_callback -- --spindle-worker-threads 2 5 log
//! ```

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use clap::Parser;
use spindle_rs::{Callback, SpindleArgs, SpindleBuilder, SpindleError, SpindleRuntime};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Offload sleeps and call back on the host thread")]
struct Cli {
    /// Use the synchronous variant (blocks the host for each sleep)
    #[arg(long)]
    sync: bool,

    /// Pairs of `<sleep-ms> <callback>`; callback is `log` or `count`
    args: Vec<String>,

    #[command(flatten)]
    spindle: SpindleArgs,
}

/// Named callbacks the binding layer knows how to resolve.
#[derive(Debug, Clone, Copy)]
enum CallbackName {
    Log,
    Count,
}

/// One validated call.
#[derive(Debug)]
struct SleepCall {
    sleep_ms: u32,
    callback: CallbackName,
}

fn parse_call(args: &[String]) -> spindle_rs::Result<SleepCall> {
    let [sleep, callback] = args else {
        return Err(SpindleError::InvalidArguments(
            "you must pass in the sleep time and a callback function".to_string(),
        ));
    };

    let sleep_ms = sleep.parse::<u32>().map_err(|_| {
        SpindleError::InvalidArguments(format!(
            "first argument must be an unsigned integer, got {:?}",
            sleep
        ))
    })?;

    let callback = match callback.as_str() {
        "log" => CallbackName::Log,
        "count" => CallbackName::Count,
        other => {
            return Err(SpindleError::InvalidArguments(format!(
                "second argument must be a callback (log|count), got {:?}",
                other
            )))
        }
    };

    Ok(SleepCall { sleep_ms, callback })
}

fn parse_calls(args: &[String]) -> spindle_rs::Result<Vec<SleepCall>> {
    if args.is_empty() {
        return Err(SpindleError::InvalidArguments(
            "you must pass in the sleep time and a callback function".to_string(),
        ));
    }
    args.chunks(2).map(parse_call).collect()
}

fn resolve(call: &SleepCall, started: Instant, counter: &Rc<Cell<u32>>) -> Callback {
    let sleep_ms = call.sleep_ms;
    match call.callback {
        CallbackName::Log => Callback::new(move || {
            info!(
                sleep_ms,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "callback fired"
            );
        }),
        CallbackName::Count => {
            let counter = counter.clone();
            Callback::new(move || counter.set(counter.get() + 1))
        }
    }
}

fn run(runtime: &SpindleRuntime, calls: &[SleepCall], sync: bool) -> spindle_rs::Result<u32> {
    let counter = Rc::new(Cell::new(0));
    let started = Instant::now();

    for call in calls {
        let callback = resolve(call, started, &counter);
        if sync {
            runtime.block_then_call(call.sleep_ms, callback)?;
        } else {
            let token = runtime.offload_blocking(call.sleep_ms, callback)?;
            info!(%token, sleep_ms = call.sleep_ms, "queued");
        }
    }
    info!(
        host_blocked_ms = started.elapsed().as_millis() as u64,
        in_flight = runtime.in_flight(),
        "all calls submitted"
    );

    runtime.run_until_idle();
    Ok(counter.get())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let calls = parse_calls(&cli.args)?;

    let runtime = SpindleBuilder::new()
        .prefix("demo")
        .env_prefix("SPINDLE")
        .with_cli_args(&cli.spindle)
        .build()?;
    info!(%runtime, "host ready");

    let counted = run(&runtime, &calls, cli.sync)?;
    info!(counted, "done");
    Ok(())
}
