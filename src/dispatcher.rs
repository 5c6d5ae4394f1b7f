//! Completion dispatcher.
//!
//! Runs on the host thread only. For each drained [`Completion`] it resolves
//! the descriptor, moves it to `Dispatched`, and invokes its callback exactly
//! once. The arena borrow is released before the callback runs so callbacks
//! may submit new work.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use crate::arena::DescriptorArena;
use crate::bridge::Completion;
use crate::descriptor::{RequestToken, TaskPhase, WorkDescriptor};
use crate::error::Result;
use crate::executor::panic_message;
use crate::metrics::SpindleMetrics;

/// What happened to a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// The callback ran and returned.
    Invoked,
    /// The callback ran and panicked; the panic was contained.
    CallbackPanicked,
    /// No live descriptor matched the token.
    Dropped,
}

pub(crate) struct CompletionDispatcher {
    arena: RefCell<DescriptorArena>,
    metrics: SpindleMetrics,
}

impl CompletionDispatcher {
    pub fn new(metrics: SpindleMetrics) -> Self {
        Self {
            arena: RefCell::new(DescriptorArena::new()),
            metrics,
        }
    }

    /// Number of descriptors not yet dispatched.
    pub fn in_flight(&self) -> usize {
        self.arena.borrow().len()
    }

    /// Register a freshly created descriptor and return its token.
    pub fn admit(&self, descriptor: WorkDescriptor) -> Result<RequestToken> {
        let mut arena = self.arena.borrow_mut();
        let token = arena.insert(descriptor);
        let bound = match arena.get_mut(token) {
            Some(d) => d.bind(token),
            None => Ok(()),
        };
        if let Err(e) = bound {
            if let Some(d) = arena.remove(token) {
                d.disarm();
            }
            return Err(e);
        }
        self.metrics.record_submitted(arena.len());
        Ok(token)
    }

    /// Record that the descriptor was handed to an executor.
    pub fn mark_running(&self, token: RequestToken) -> Result<()> {
        match self.arena.borrow_mut().get_mut(token) {
            Some(d) => d.advance(TaskPhase::Running),
            None => Ok(()),
        }
    }

    /// Undo an admission whose executor rejected the order.
    pub fn rollback(&self, token: RequestToken) {
        let mut arena = self.arena.borrow_mut();
        if let Some(d) = arena.remove(token) {
            d.disarm();
        }
        self.metrics.set_inflight(arena.len());
    }

    /// Dispatch one completion. Must be called on the host thread.
    pub fn dispatch(&self, completion: Completion) -> Dispatch {
        let Completion {
            token,
            outcome,
            elapsed,
        } = completion;

        // Resolve and detach under the borrow, invoke after releasing it.
        let detached = {
            let mut arena = self.arena.borrow_mut();
            let detached = match arena.get_mut(token) {
                Some(d) => d.advance(TaskPhase::Completed).and_then(|_| d.take_callback()),
                None => {
                    error!(%token, "completion for unknown request token; dropping");
                    self.metrics.record_dropped();
                    return Dispatch::Dropped;
                }
            };
            let descriptor = arena.remove(token);
            self.metrics.set_inflight(arena.len());
            detached.map(|callback| (callback, descriptor))
        };

        let (callback, descriptor) = match detached {
            Ok(pair) => pair,
            Err(e) => {
                error!(%token, %e, "descriptor not dispatchable; dropping");
                self.metrics.record_dropped();
                return Dispatch::Dropped;
            }
        };

        if let Err(ref e) = outcome {
            error!(%token, %e, "offloaded task failed");
            self.metrics.record_worker_panic();
        }
        debug!(
            %token,
            elapsed_ms = elapsed.as_millis() as u64,
            failed = outcome.is_err(),
            "dispatching completion"
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| callback.invoke(outcome)));

        // Released only after the callback has returned.
        if let Some(descriptor) = descriptor {
            release(token, descriptor);
        }

        match result {
            Ok(()) => {
                self.metrics.record_dispatched();
                Dispatch::Invoked
            }
            Err(payload) => {
                error!(
                    %token,
                    panic = %panic_message(payload.as_ref()),
                    "callback panicked"
                );
                self.metrics.record_callback_panic();
                Dispatch::CallbackPanicked
            }
        }
    }

    /// Release every pending descriptor without invoking callbacks.
    pub fn abandon_all(&self) -> usize {
        if self.arena.borrow().is_empty() {
            return 0;
        }
        let drained = self.arena.borrow_mut().drain();
        let count = drained.len();
        for _ in 0..count {
            self.metrics.record_dropped();
        }
        self.metrics.set_inflight(0);
        // Each descriptor logs its own error on drop.
        drop(drained);
        count
    }
}

/// Move a dispatched descriptor to its terminal phase and drop it.
///
/// Returns `false` if the descriptor was not `Completed`.
fn release(token: RequestToken, mut descriptor: WorkDescriptor) -> bool {
    match descriptor.advance(TaskPhase::Dispatched) {
        Ok(()) => true,
        Err(e) => {
            error!(%token, %e, "descriptor released in unexpected phase");
            false
        }
    }
}
