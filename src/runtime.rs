//! Spindle host runtime.
//!
//! The runtime is the single-threaded host execution context. It owns the
//! descriptor arena, the completion queue and a tokio current-thread runtime
//! that drives the host loop. Blocking work runs on worker threads; callbacks
//! run only here.
//!
//! # Thread Architecture
//!
//! ```text
//! ┌───────────────────────────── host thread ─────────────────────────────┐
//! │ SpindleRuntime (Rc, !Send)                                            │
//! │   offload_*() ──▶ CompletionDispatcher::admit ──▶ arena[token]        │
//! │        │                                              ▲               │
//! │        │ WorkOrder { token, job }                     │ dispatch()    │
//! │        ▼                                              │               │
//! └────────┼──────────────────────────────────────────────┼───────────────┘
//!          │                                              │
//!   ┌──────▼──────────┐   Completion { token, outcome }   │
//!   │ worker thread   │ ──────────▶ CompletionQueue ──────┘
//!   │ job.run()       │   (SegQueue + DiatomicWaker)
//!   └─────────────────┘
//! ```
//!
//! # Ordering
//!
//! Dispatches are serialized with all other host work: they only run inside
//! [`SpindleRuntime::turn`], [`SpindleRuntime::block_on`] or
//! [`SpindleRuntime::run_until_idle`], on the host thread. Completions of
//! independent tasks are dispatched in arrival order, not submission order.

use std::cell::Cell;
use std::future::Future;
use std::mem::ManuallyDrop;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bridge::CompletionQueue;
use crate::config::SpindleConfig;
use crate::context;
use crate::descriptor::{Callback, Job, RequestToken, WorkDescriptor};
use crate::dispatcher::CompletionDispatcher;
use crate::error::{Result, SpindleError};
use crate::executor::{self, InlineExecutor, WorkOrder, WorkerExecutor};
use crate::metrics::SpindleMetrics;

/// A single-threaded host that offloads blocking work and calls back on itself.
///
/// The handle is cheap to clone and deliberately `!Send`: callbacks captured by
/// it may hold host-only state, so neither the handle nor any callback can
/// leave the host thread.
///
/// Pending callbacks are owned by the host. A callback that captures a clone
/// of its own `SpindleRuntime` therefore keeps the host alive until it is
/// dispatched: if every other handle is dropped without driving the loop to
/// idle, the host and the callback are leaked. Drive the host with
/// [`run_until_idle`](Self::run_until_idle) before releasing it, or reach the
/// host from the callback through [`current_runtime`](crate::current_runtime)
/// instead of capturing it.
///
/// | Method | Blocks host | Callback runs |
/// |--------|-------------|---------------|
/// | `offload_blocking()` | No | later, on host |
/// | `offload_with()` | No | later, on host |
/// | `block_then_call()` | Yes, for the duration | before it returns |
///
/// # Examples
///
/// ```ignore
/// use spindle_rs::SpindleBuilder;
///
/// let runtime = SpindleBuilder::new().prefix("addon").build()?;
///
/// runtime.offload_blocking(50, || println!("slow one"))?;
/// runtime.offload_blocking(10, || println!("fast one"))?;
///
/// // Drive the host loop until both callbacks have run
/// runtime.run_until_idle();
/// ```
#[derive(Clone)]
pub struct SpindleRuntime {
    inner: Rc<RuntimeInner>,
}

/// Host state shared with the thread-local context.
pub(crate) struct RuntimeInner {
    config: SpindleConfig,
    /// Shut down in the background on drop; a host may be released inside
    /// another host's `block_on`, where a blocking drop would panic.
    host: ManuallyDrop<tokio::runtime::Runtime>,
    executor: Box<dyn WorkerExecutor>,
    queue: Arc<CompletionQueue>,
    dispatcher: CompletionDispatcher,
    closed: Cell<bool>,
    metrics: SpindleMetrics,
}

impl SpindleRuntime {
    /// Create a runtime from a configuration.
    ///
    /// This is typically called via `SpindleBuilder::build()`.
    pub(crate) fn from_config(config: SpindleConfig) -> Result<Self> {
        config.validate()?;

        let host = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let executor = executor::from_config(&config)?;

        let metrics = SpindleMetrics::with_prefix(&config.prefix);
        if let Some(ref registry) = config.prometheus_registry {
            if let Err(e) = metrics.register(registry) {
                warn!(%e, "failed to register prometheus metrics");
            }
        }

        info!(
            prefix = %config.prefix,
            executor = executor.name(),
            worker_threads = ?config.worker_threads,
            "building spindle host"
        );

        Ok(Self {
            inner: Rc::new(RuntimeInner {
                dispatcher: CompletionDispatcher::new(metrics.clone()),
                config,
                host: ManuallyDrop::new(host),
                executor,
                queue: Arc::new(CompletionQueue::new()),
                closed: Cell::new(false),
                metrics,
            }),
        })
    }

    pub(crate) fn from_inner(inner: Rc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<RuntimeInner> {
        &self.inner
    }

    /// Get the resolved configuration.
    pub fn config(&self) -> &SpindleConfig {
        &self.inner.config
    }

    /// Get the metrics for this host.
    pub fn metrics(&self) -> &SpindleMetrics {
        &self.inner.metrics
    }

    /// Name of the executor running offloaded work.
    pub fn executor_name(&self) -> &'static str {
        self.inner.executor.name()
    }

    /// Offload a blocking wait of `duration_ms` milliseconds.
    ///
    /// Returns as soon as the work is handed to a worker. `callback` runs
    /// exactly once, on this host, during a later [`turn`](Self::turn),
    /// [`block_on`](Self::block_on) or [`run_until_idle`](Self::run_until_idle),
    /// no earlier than `duration_ms` after this call.
    ///
    /// # Errors
    ///
    /// - `InvalidCallback` if the host has been shut down
    /// - `WorkerSpawn` if no worker thread could be started
    pub fn offload_blocking(
        &self,
        duration_ms: u32,
        callback: impl Into<Callback>,
    ) -> Result<RequestToken> {
        self.inner.submit(
            Job::sleep_ms(duration_ms),
            callback.into(),
            self.inner.executor.as_ref(),
        )
    }

    /// Offload an arbitrary blocking closure.
    ///
    /// `job` runs on a worker thread and must not touch host state; only its
    /// completion crosses back. A panic in `job` is contained and reported to
    /// the callback as `SpindleError::WorkerPanic`.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// runtime.offload_with(
    ///     || std::fs::remove_dir_all("/tmp/scratch").unwrap(),
    ///     Callback::with_outcome(|outcome| println!("cleanup: {:?}", outcome)),
    /// )?;
    /// ```
    pub fn offload_with<F>(&self, job: F, callback: impl Into<Callback>) -> Result<RequestToken>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.submit(
            Job::blocking(job),
            callback.into(),
            self.inner.executor.as_ref(),
        )
    }

    /// Block this host for `duration_ms` milliseconds, then run `callback`.
    ///
    /// This is the synchronous variant: the same bridge with zero worker
    /// threads. The caller is already on the host, so the wait happens here
    /// and the callback runs before this returns. Any other completions
    /// that arrived in the meantime are dispatched too.
    pub fn block_then_call(&self, duration_ms: u32, callback: impl Into<Callback>) -> Result<()> {
        let token = self
            .inner
            .submit(Job::sleep_ms(duration_ms), callback.into(), &InlineExecutor)?;
        let dispatched = self.turn();
        debug!(%token, dispatched, "synchronous offload complete");
        Ok(())
    }

    /// Dispatch every completion that has already arrived. Never waits.
    ///
    /// Returns the number of completions dispatched.
    pub fn turn(&self) -> usize {
        let _ctx = context::enter(&self.inner);
        let mut dispatched = 0;
        while let Some(completion) = self.inner.queue.try_next() {
            self.inner.dispatcher.dispatch(completion);
            dispatched += 1;
        }
        dispatched
    }

    /// Run a future on the host thread, dispatching completions while it runs.
    ///
    /// The current host is available via `spindle_rs::current_runtime()` within
    /// the future.
    ///
    /// # Panics
    ///
    /// Panics if called from inside another `block_on` (including from a
    /// callback). Use [`idle`](Self::idle) to wait from async code.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let _ctx = context::enter(&self.inner);
        let inner = &self.inner;
        inner.host.block_on(async {
            tokio::pin!(future);
            loop {
                tokio::select! {
                    biased;
                    output = &mut future => return output,
                    completion = inner.queue.next() => {
                        inner.dispatcher.dispatch(completion);
                    }
                }
            }
        })
    }

    /// Wait until no offloaded call is in flight, dispatching as completions arrive.
    pub async fn idle(&self) {
        let mut logged = false;
        while self.inner.dispatcher.in_flight() > 0 {
            if !logged {
                debug!(
                    in_flight = self.inner.dispatcher.in_flight(),
                    "waiting for offloaded tasks"
                );
                logged = true;
            }
            let completion = self.inner.queue.next().await;
            self.inner.dispatcher.dispatch(completion);
        }
    }

    /// Drive the host loop until every in-flight call has been dispatched.
    pub fn run_until_idle(&self) {
        self.block_on(self.idle());
    }

    /// Stop accepting new offloads.
    ///
    /// In-flight calls still complete and dispatch; later submissions fail
    /// with `InvalidCallback`.
    pub fn shutdown(&self) {
        if !self.inner.closed.replace(true) {
            debug!(prefix = %self.inner.config.prefix, "host closed to new offloads");
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Number of offloaded calls whose callback has not run yet.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.inner.dispatcher.in_flight()
    }

    /// Whether nothing is in flight.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }
}

impl RuntimeInner {
    fn submit(
        &self,
        job: Job,
        callback: Callback,
        executor: &dyn WorkerExecutor,
    ) -> Result<RequestToken> {
        if self.closed.get() {
            return Err(SpindleError::InvalidCallback(
                "host is shut down; callback cannot be registered".to_string(),
            ));
        }

        let duration_ms = job.duration().map(|d| d.as_millis() as u64);
        let token = self
            .dispatcher
            .admit(WorkDescriptor::new(&job, callback))?;

        if let Err(e) = self.dispatcher.mark_running(token) {
            self.dispatcher.rollback(token);
            return Err(e);
        }

        if let Err(e) = executor.execute(WorkOrder { token, job }, self.queue.sender()) {
            error!(%token, %e, executor = executor.name(), "executor rejected work order");
            self.dispatcher.rollback(token);
            return Err(e);
        }

        debug!(%token, ?duration_ms, executor = executor.name(), "offload submitted");
        Ok(token)
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        let abandoned = self.dispatcher.abandon_all();
        if abandoned > 0 {
            error!(
                prefix = %self.config.prefix,
                abandoned,
                "host torn down with offloads in flight; their callbacks will not run"
            );
        }
        // SAFETY: `host` is never touched again after this point.
        let host = unsafe { ManuallyDrop::take(&mut self.host) };
        host.shutdown_background();
    }
}

impl std::fmt::Debug for SpindleRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpindleRuntime")
            .field("config", &self.inner.config)
            .field("executor", &self.inner.executor.name())
            .field("in_flight", &self.in_flight())
            .field("queued", &self.inner.queue.pending())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for SpindleRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SpindleRuntime[{}]: executor({}) in_flight={}",
            self.inner.config.prefix,
            self.inner.executor.name(),
            self.in_flight(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::time::{Duration, Instant};

    fn test_config() -> SpindleConfig {
        SpindleConfig {
            prefix: "test".to_string(),
            ..Default::default()
        }
    }

    fn runtime() -> SpindleRuntime {
        SpindleRuntime::from_config(test_config()).unwrap()
    }

    fn counter() -> (Rc<Cell<u32>>, impl FnOnce() + 'static) {
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        (hits, move || h.set(h.get() + 1))
    }

    #[test]
    fn test_runtime_creation() {
        let runtime = runtime();
        assert_eq!(runtime.config().prefix, "test");
        assert_eq!(runtime.executor_name(), "thread-per-task");
        assert!(runtime.is_idle());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SpindleConfig {
            worker_threads: Some(0),
            ..test_config()
        };
        assert!(matches!(
            SpindleRuntime::from_config(config),
            Err(SpindleError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_duration_invoked_once() {
        let runtime = runtime();
        let (hits, cb) = counter();

        runtime.offload_blocking(0, cb).unwrap();
        assert_eq!(runtime.in_flight(), 1);

        runtime.run_until_idle();
        assert_eq!(hits.get(), 1);
        assert!(runtime.is_idle());

        // Nothing more to dispatch
        assert_eq!(runtime.turn(), 0);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_submit_does_not_block_host() {
        let runtime = runtime();
        let (hits, cb) = counter();

        let start = Instant::now();
        runtime.offload_blocking(200, cb).unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));

        // Not dispatched before the host turns
        assert_eq!(hits.get(), 0);
        runtime.run_until_idle();
        assert_eq!(hits.get(), 1);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_turn_does_not_wait() {
        let runtime = runtime();
        let (hits, cb) = counter();
        runtime.offload_blocking(200, cb).unwrap();

        let start = Instant::now();
        assert_eq!(runtime.turn(), 0);
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(hits.get(), 0);

        runtime.run_until_idle();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_callback_runs_on_host_thread() {
        let runtime = runtime();
        let host = std::thread::current().id();
        let seen = Rc::new(Cell::new(None));
        let s = seen.clone();

        runtime
            .offload_blocking(5, move || s.set(Some(std::thread::current().id())))
            .unwrap();
        runtime.run_until_idle();

        assert_eq!(seen.get(), Some(host));
    }

    #[test]
    fn test_block_then_call_runs_before_return() {
        let runtime = runtime();
        let (hits, cb) = counter();

        let start = Instant::now();
        runtime.block_then_call(20, cb).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(hits.get(), 1);
        assert!(runtime.is_idle());
    }

    #[test]
    fn test_shutdown_rejects_new_offloads() {
        let runtime = runtime();
        let (hits, cb) = counter();
        runtime.offload_blocking(5, cb).unwrap();

        runtime.shutdown();
        assert!(runtime.is_closed());

        let err = runtime.offload_blocking(5, || {}).unwrap_err();
        assert!(matches!(err, SpindleError::InvalidCallback(_)));
        assert!(matches!(
            runtime.block_then_call(0, || {}),
            Err(SpindleError::InvalidCallback(_))
        ));

        // In-flight work still completes
        runtime.run_until_idle();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_worker_panic_delivered_as_failure() {
        let runtime = runtime();
        let outcome = Rc::new(RefCell::new(None));
        let o = outcome.clone();

        runtime
            .offload_with(
                || panic!("bad sector"),
                Callback::with_outcome(move |r| *o.borrow_mut() = Some(r)),
            )
            .unwrap();
        runtime.run_until_idle();

        let outcome = outcome.borrow_mut().take().expect("callback ran");
        assert!(matches!(outcome, Err(SpindleError::WorkerPanic(ref m)) if m == "bad sector"));
        assert_eq!(runtime.metrics().worker_panics.get(), 1);
    }

    #[test]
    fn test_callback_may_offload_again() {
        let runtime = runtime();
        let (hits, cb) = counter();

        let rt = runtime.clone();
        runtime
            .offload_blocking(1, move || {
                rt.offload_blocking(1, cb).unwrap();
            })
            .unwrap();

        runtime.run_until_idle();
        assert_eq!(hits.get(), 1);
        assert_eq!(runtime.metrics().submitted.get(), 2);
        assert_eq!(runtime.metrics().dispatched.get(), 2);
    }

    #[test]
    fn test_block_on_dispatches_concurrently() {
        let runtime = runtime();
        let (hits, cb) = counter();

        runtime.offload_blocking(5, cb).unwrap();
        runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_rayon_backed_runtime() {
        let config = SpindleConfig {
            worker_threads: Some(2),
            ..test_config()
        };
        let runtime = SpindleRuntime::from_config(config).unwrap();
        assert_eq!(runtime.executor_name(), "rayon");

        let hits = Rc::new(Cell::new(0));
        for _ in 0..8 {
            let h = hits.clone();
            runtime
                .offload_blocking(2, move || h.set(h.get() + 1))
                .unwrap();
        }
        runtime.run_until_idle();
        assert_eq!(hits.get(), 8);
    }

    #[test]
    fn test_teardown_skips_callbacks() {
        let flag = Rc::new(Cell::new(false));
        let f = flag.clone();
        {
            let runtime = runtime();
            runtime.offload_blocking(30, move || f.set(true)).unwrap();
            assert_eq!(runtime.in_flight(), 1);
        }
        // Let the orphaned worker finish against a dead host
        std::thread::sleep(Duration::from_millis(60));
        assert!(!flag.get());
        // The callback (and its captured Rc) was released with the host
        assert_eq!(Rc::strong_count(&flag), 1);
    }

    #[test]
    fn test_display() {
        let runtime = runtime();
        let display = format!("{}", runtime);
        assert!(display.starts_with("SpindleRuntime[test]:"));
        assert!(display.contains("executor(thread-per-task)"));
    }

    #[test]
    fn test_drop_host_inside_block_on() {
        let outer = runtime();
        let finished = outer.block_on(async {
            let inner = runtime();
            inner.offload_blocking(5, || {}).unwrap();
            drop(inner);
            true
        });
        assert!(finished);
    }

    #[test]
    fn test_callback_may_drop_another_host() {
        let outer = runtime();
        let other = Rc::new(RefCell::new(Some(runtime())));
        let done = Rc::new(Cell::new(false));

        let o = other.clone();
        let d = done.clone();
        outer
            .offload_blocking(1, move || {
                if let Some(host) = o.borrow_mut().take() {
                    host.offload_blocking(5, || {}).unwrap();
                    drop(host);
                }
                d.set(true);
            })
            .unwrap();
        outer.run_until_idle();

        assert!(done.get());
        assert!(other.borrow().is_none());
        assert_eq!(outer.metrics().callback_panics.get(), 0);
        assert_eq!(outer.metrics().dispatched.get(), 1);
    }

    #[test]
    fn test_spawn_failure_rolls_back() {
        let config = SpindleConfig {
            worker_stack_size: Some(usize::MAX / 2),
            ..test_config()
        };
        let runtime = SpindleRuntime::from_config(config).unwrap();
        let marker = Rc::new(());
        let held = marker.clone();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();

        let err = runtime
            .offload_blocking(1, move || {
                drop(held);
                h.set(1);
            })
            .unwrap_err();

        assert!(matches!(err, SpindleError::WorkerSpawn(_)));
        assert_eq!(runtime.in_flight(), 0);
        assert_eq!(runtime.metrics().inflight_tasks.get(), 0);
        // Callback released without running
        assert_eq!(Rc::strong_count(&marker), 1);
        assert_eq!(hits.get(), 0);
        assert_eq!(runtime.turn(), 0);
    }

    #[test]
    fn test_self_capturing_callback_released_after_idle() {
        let marker = Rc::new(());
        {
            let runtime = runtime();
            let rt = runtime.clone();
            let held = marker.clone();
            runtime
                .offload_blocking(1, move || {
                    let _keep = (&rt, &held);
                })
                .unwrap();
            assert_eq!(Rc::strong_count(&runtime.inner), 2);

            runtime.run_until_idle();
            // The dispatched callback gave its handle back
            assert_eq!(Rc::strong_count(&runtime.inner), 1);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }
}
