//! # spindle-rs
//!
//! **Offload blocking work, call back on the host**
//!
//! A single-threaded host execution context that hands blocking operations to
//! worker threads and runs each caller-supplied callback exactly once, back on
//! the host, after the work has finished.
//!
//! ## Features
//!
//! - **Host never blocks**: `offload_blocking()` returns as soon as the work is queued
//! - **Callbacks stay home**: callbacks are `!Send` and only ever run on the host thread
//! - **Exactly once**: every accepted offload dispatches its callback once, or is
//!   released with an error log if the host is torn down first
//! - **Contained failures**: a panicking worker operation becomes a failed completion
//! - **Flexible Configuration**: Configure via files (TOML/YAML/JSON), environment variables, or code
//! - **CLI Integration**: Built-in clap support for command-line overrides
//!
//! ## Quick Start
//!
//! ```ignore
//! use spindle_rs::SpindleBuilder;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = SpindleBuilder::new().prefix("addon").build()?;
//!
//!     // Async variant: returns immediately, callback runs later on this thread
//!     runtime.offload_blocking(50, || println!("slept 50ms"))?;
//!     runtime.offload_blocking(10, || println!("slept 10ms"))?;
//!
//!     // Sync variant: blocks this thread, callback runs before it returns
//!     runtime.block_then_call(5, || println!("slept 5ms, synchronously"))?;
//!
//!     runtime.run_until_idle();
//!     Ok(())
//! }
//! ```
//!
//! ## Ergonomic Access
//!
//! Inside `block_on` or a callback, the host is reachable without passing it
//! around:
//!
//! ```ignore
//! runtime.block_on(async {
//!     spindle_rs::offload_blocking(20, || println!("done"))?;
//!     let rt = spindle_rs::current_runtime().unwrap();
//!     rt.idle().await;
//!     Ok::<_, spindle_rs::SpindleError>(())
//! })?;
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in order (later sources override earlier):
//!
//! 1. Default values
//! 2. Config files (via `.file()`)
//! 3. Environment variables (via `.env_prefix()`)
//! 4. Programmatic overrides
//! 5. CLI arguments (via `.with_cli_args()`)
//!
//! ### Config File Example (TOML)
//!
//! ```toml
//! prefix = "addon"
//! worker_threads = 4
//! ```
//!
//! ### Environment Variables
//!
//! With `.env_prefix("SPINDLE")`:
//! - `SPINDLE_PREFIX=addon`
//! - `SPINDLE_WORKER_THREADS=4`
//! - `SPINDLE_WORKER_STACK_SIZE=1048576`
//!
//! ## Thread Naming
//!
//! Threads are named with the configured prefix:
//! - Dedicated workers: `{prefix}-worker-0000`, `{prefix}-worker-0001`, ...
//! - Pooled workers: `{prefix}-rayon-0000`, `{prefix}-rayon-0001`, ...

pub(crate) mod arena;
pub(crate) mod bridge;
pub mod builder;
pub mod config;
pub(crate) mod context;
pub mod descriptor;
pub(crate) mod dispatcher;
pub mod error;
pub(crate) mod executor;
pub mod metrics;
pub mod runtime;

pub use builder::{SpindleArgs, SpindleBuilder};
pub use config::SpindleConfig;
pub use context::current_runtime;
pub use descriptor::{Callback, RequestToken, TaskPhase};
pub use error::{Result, SpindleError};
pub use metrics::SpindleMetrics;
pub use runtime::SpindleRuntime;

pub use spindle_macros::test;

fn no_host() -> SpindleError {
    SpindleError::InvalidCallback("no host execution context on this thread".to_string())
}

/// Offload a blocking wait through the current host.
///
/// This is a convenience function for
/// `spindle_rs::current_runtime()?.offload_blocking(duration_ms, callback)`.
///
/// # Errors
///
/// Returns `InvalidCallback` if called outside a host context (i.e., not
/// within `block_on` or a callback dispatched by the host), in addition to the
/// errors of `SpindleRuntime::offload_blocking()`.
///
/// # Example
///
/// ```ignore
/// runtime.block_on(async {
///     spindle_rs::offload_blocking(50, || println!("done")).unwrap();
/// });
/// ```
pub fn offload_blocking(duration_ms: u32, callback: impl Into<Callback>) -> Result<RequestToken> {
    current_runtime()
        .ok_or_else(no_host)?
        .offload_blocking(duration_ms, callback)
}

/// Offload a blocking closure through the current host.
///
/// Like `offload_blocking()`, but runs `job` on the worker instead of a wait.
pub fn offload_with<F>(job: F, callback: impl Into<Callback>) -> Result<RequestToken>
where
    F: FnOnce() + Send + 'static,
{
    current_runtime()
        .ok_or_else(no_host)?
        .offload_with(job, callback)
}
