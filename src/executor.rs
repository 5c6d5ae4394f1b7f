//! Worker executors.
//!
//! An executor takes a [`WorkOrder`] (token plus plain-data [`Job`]) and runs it
//! off the host thread, then reports through a [`CompletionSender`]. Executors
//! never see the descriptor or its callback.
//!
//! | Executor | Threads | Used by |
//! |----------|---------|---------|
//! | [`ThreadPerTask`] | one named OS thread per order | default `offload_*` |
//! | [`RayonExecutor`] | fixed rayon pool | `worker_threads = Some(n)` |
//! | [`InlineExecutor`] | the calling thread | `block_then_call` |

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, error};

use crate::bridge::{Completion, CompletionSender};
use crate::config::SpindleConfig;
use crate::descriptor::{Job, RequestToken};
use crate::error::{Result, SpindleError};

/// One unit of work handed to an executor.
#[derive(Debug)]
pub(crate) struct WorkOrder {
    pub token: RequestToken,
    pub job: Job,
}

/// Run an order on the current thread and report its completion.
///
/// The job runs under `catch_unwind` so a faulting operation becomes a failed
/// completion instead of tearing down the worker or the host.
pub(crate) fn run_order(order: WorkOrder, done: &CompletionSender) {
    let WorkOrder { token, job } = order;
    let started = Instant::now();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run()))
        .map_err(|payload| SpindleError::WorkerPanic(panic_message(payload.as_ref())));
    let elapsed = started.elapsed();

    if let Err(ref e) = outcome {
        error!(%token, %e, "blocking operation panicked");
    } else {
        debug!(%token, elapsed_ms = elapsed.as_millis() as u64, "worker done");
    }

    done.on_worker_done(Completion {
        token,
        outcome,
        elapsed,
    });
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs work orders off the host thread.
pub(crate) trait WorkerExecutor {
    /// Start running `order`. Must not block the caller on the job itself,
    /// except for [`InlineExecutor`].
    fn execute(&self, order: WorkOrder, done: CompletionSender) -> Result<()>;

    /// Short name for logs and `Display`.
    fn name(&self) -> &'static str;
}

/// One dedicated thread per offloaded call.
pub(crate) struct ThreadPerTask {
    prefix: Arc<str>,
    stack_size: Option<usize>,
    counter: AtomicUsize,
}

impl ThreadPerTask {
    pub fn new(prefix: &str, stack_size: Option<usize>) -> Self {
        Self {
            prefix: prefix.into(),
            stack_size,
            counter: AtomicUsize::new(0),
        }
    }
}

impl WorkerExecutor for ThreadPerTask {
    fn execute(&self, order: WorkOrder, done: CompletionSender) -> Result<()> {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new().name(format!("{}-worker-{:04}", self.prefix, id));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        builder
            .spawn(move || run_order(order, &done))
            .map(drop)
            .map_err(SpindleError::WorkerSpawn)
    }

    fn name(&self) -> &'static str {
        "thread-per-task"
    }
}

/// Offloaded work runs on a fixed rayon pool.
pub(crate) struct RayonExecutor {
    pool: rayon::ThreadPool,
}

impl RayonExecutor {
    pub fn new(prefix: &str, num_threads: usize, stack_size: Option<usize>) -> Result<Self> {
        let name_prefix: Arc<str> = prefix.into();
        let start_prefix = Arc::clone(&name_prefix);

        let mut builder = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("{}-rayon-{:04}", name_prefix, i))
            .start_handler(move |thread_index| {
                debug!(thread_index, %start_prefix, "rayon worker starting");
            });
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }
        let pool = builder.build()?;

        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl WorkerExecutor for RayonExecutor {
    fn execute(&self, order: WorkOrder, done: CompletionSender) -> Result<()> {
        self.pool.spawn(move || run_order(order, &done));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rayon"
    }
}

/// Zero worker threads: the job runs on the calling thread.
///
/// Only valid when the caller is already on the context the job may block.
pub(crate) struct InlineExecutor;

impl WorkerExecutor for InlineExecutor {
    fn execute(&self, order: WorkOrder, done: CompletionSender) -> Result<()> {
        run_order(order, &done);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

/// Build the executor selected by configuration.
pub(crate) fn from_config(config: &SpindleConfig) -> Result<Box<dyn WorkerExecutor>> {
    match config.worker_threads {
        Some(n) => {
            let pool = RayonExecutor::new(&config.prefix, n, config.worker_stack_size)?;
            debug!(threads = pool.num_threads(), "rayon worker pool ready");
            Ok(Box::new(pool))
        }
        None => Ok(Box::new(ThreadPerTask::new(
            &config.prefix,
            config.worker_stack_size,
        ))),
    }
}
