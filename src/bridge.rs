//! Worker-to-host completion bridge.
//!
//! This is the only channel across which notification crosses from a worker
//! thread back to the host. Workers push plain-data [`Completion`]s onto a
//! lock-free queue and wake the host loop; the host drains the queue on its own
//! thread and hands each completion to the dispatcher.
//!
//! ```text
//!  worker thread                         host thread
//!  ─────────────                         ───────────
//!  job.run()
//!  CompletionSender::on_worker_done ──▶  SegQueue ──▶ NextCompletion::poll
//!        (push = release)                (pop = acquire)     │
//!        waker.notify() ─────────────────────────────────────┘
//! ```
//!
//! # Performance
//!
//! - `SegQueue` push/pop: lock-free, no allocation per completion in steady state
//! - Uses `diatomic-waker` for cross-thread waking instead of a channel
//!
//! # Teardown
//!
//! Senders hold a `Weak` to the queue. Once the host drops its queue, late
//! completions are discarded on the worker thread and never reach a callback.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use diatomic_waker::DiatomicWaker;
use tracing::debug;

use crate::descriptor::RequestToken;
use crate::error::Result;

/// Completion notification for one descriptor.
///
/// Carries only plain data; the callback never leaves the host.
#[derive(Debug)]
pub(crate) struct Completion {
    /// Token of the descriptor that finished.
    pub token: RequestToken,
    /// `Ok` when the blocking operation returned, `Err` when it faulted.
    pub outcome: Result<()>,
    /// Wall-clock time spent in the blocking operation.
    pub elapsed: Duration,
}

/// Host-owned queue of completions waiting for dispatch.
pub(crate) struct CompletionQueue {
    ready: SegQueue<Completion>,
    waker: DiatomicWaker,
    /// Completions pushed but not yet popped.
    pending: AtomicUsize,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self {
            ready: SegQueue::new(),
            waker: DiatomicWaker::new(),
            pending: AtomicUsize::new(0),
        }
    }

    /// Create a sender for a worker.
    pub fn sender(self: &Arc<Self>) -> CompletionSender {
        CompletionSender {
            queue: Arc::downgrade(self),
        }
    }

    /// Pop the next completion without waiting.
    #[inline]
    pub fn try_next(&self) -> Option<Completion> {
        let completion = self.ready.pop()?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(completion)
    }

    /// Wait for the next completion.
    ///
    /// Cancel-safe: dropping the future never loses a completion.
    pub fn next(&self) -> NextCompletion<'_> {
        NextCompletion { queue: self }
    }

    /// Number of completions delivered but not yet drained.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn push(&self, completion: Completion) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.ready.push(completion);
        self.waker.notify();
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`CompletionQueue::next`].
pub(crate) struct NextCompletion<'a> {
    queue: &'a CompletionQueue,
}

impl Future for NextCompletion<'_> {
    type Output = Completion;

    #[inline]
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Completion> {
        // Try to take a completion first
        if let Some(completion) = self.queue.try_next() {
            return Poll::Ready(completion);
        }

        // Register/update waker
        // SAFETY: the queue is owned by a single host and only polled from the
        // host thread, so register() is never called concurrently.
        unsafe {
            self.queue.waker.register(cx.waker());
        }

        // Check again in case a worker pushed between our first check and registration
        match self.queue.try_next() {
            Some(completion) => Poll::Ready(completion),
            None => Poll::Pending,
        }
    }
}

/// Handle a worker uses to report back to the host.
#[derive(Clone)]
pub(crate) struct CompletionSender {
    queue: Weak<CompletionQueue>,
}

impl CompletionSender {
    /// Deliver a completion to the host.
    ///
    /// Called exactly once per work order, from the thread that ran the job.
    /// Returns `false` when the host has been torn down; the completion is
    /// dropped here and no callback runs.
    pub fn on_worker_done(&self, completion: Completion) -> bool {
        match self.queue.upgrade() {
            Some(queue) => {
                queue.push(completion);
                true
            }
            None => {
                debug!(
                    token = %completion.token,
                    "host torn down before completion; discarding"
                );
                false
            }
        }
    }

    /// Whether the host queue still exists.
    pub fn is_connected(&self) -> bool {
        self.queue.strong_count() > 0
    }
}

impl std::fmt::Debug for CompletionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSender")
            .field("connected", &self.is_connected())
            .finish()
    }
}
