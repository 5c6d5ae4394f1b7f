//! Work descriptors: the host-side record of one offloaded call.
//!
//! A `WorkDescriptor` is created on the host thread when a caller offloads a
//! blocking operation. It keeps the caller's [`Callback`] for the whole time the
//! operation is in flight. Only the `Job` (plain `Send` data) ever leaves the
//! host thread; the descriptor itself stays in the host's arena until the
//! completion dispatcher consumes it.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──▶ Submitted ──▶ Running ──▶ Completed ──▶ Dispatched
//!  (new)      (in arena)    (handed to   (completion    (callback
//!                            executor)    drained)       returned)
//! ```
//!
//! No phase may be skipped and no descriptor re-enters `Running`.
//!
//! Descriptors and jobs are owned by the host; callers only ever hold a
//! [`RequestToken`]:
//!
//! ```compile_fail
//! use spindle_rs::descriptor::WorkDescriptor;
//! ```
//!
//! ```compile_fail
//! use spindle_rs::descriptor::Job;
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use tracing::error;

use crate::error::{Result, SpindleError};

/// Opaque handle correlating a worker's completion with exactly one descriptor.
///
/// The generation makes tokens unique even when arena slots are reused, so a
/// late or duplicated completion can never resolve to the wrong descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl RequestToken {
    /// Arena slot index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this token was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Lifecycle phase of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPhase {
    Created,
    Submitted,
    Running,
    Completed,
    Dispatched,
}

impl TaskPhase {
    /// The only phase reachable from this one, if any.
    pub fn next(self) -> Option<TaskPhase> {
        match self {
            TaskPhase::Created => Some(TaskPhase::Submitted),
            TaskPhase::Submitted => Some(TaskPhase::Running),
            TaskPhase::Running => Some(TaskPhase::Completed),
            TaskPhase::Completed => Some(TaskPhase::Dispatched),
            TaskPhase::Dispatched => None,
        }
    }

    /// Whether the phase is terminal.
    pub fn is_terminal(self) -> bool {
        self == TaskPhase::Dispatched
    }
}

/// The blocking operation a worker runs.
///
/// This is the only part of an offloaded call that crosses to a worker thread.
pub(crate) enum Job {
    /// Block the worker thread for the given duration.
    Sleep(Duration),
    /// Run an arbitrary blocking closure.
    Blocking(Box<dyn FnOnce() + Send + 'static>),
}

impl Job {
    /// Build a sleep job from a millisecond count.
    pub fn sleep_ms(duration_ms: u32) -> Self {
        Job::Sleep(Duration::from_millis(u64::from(duration_ms)))
    }

    /// Wrap a blocking closure.
    pub fn blocking<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Job::Blocking(Box::new(f))
    }

    /// Requested duration, for sleep jobs.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Job::Sleep(d) => Some(*d),
            Job::Blocking(_) => None,
        }
    }

    /// Run the job on the current thread.
    pub(crate) fn run(self) {
        match self {
            Job::Sleep(d) => {
                if !d.is_zero() {
                    std::thread::sleep(d);
                }
            }
            Job::Blocking(f) => f(),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Sleep(d) => f.debug_tuple("Sleep").field(d).finish(),
            Job::Blocking(_) => f.write_str("Blocking(<closure>)"),
        }
    }
}

enum CallbackKind {
    Plain(Box<dyn FnOnce() + 'static>),
    WithOutcome(Box<dyn FnOnce(Result<()>) + 'static>),
}

/// A completion callback owned by the host thread.
///
/// `Callback` is deliberately `!Send`: it may capture `Rc`s and other
/// host-only state, and the compiler keeps it on the thread that registered it.
pub struct Callback {
    kind: CallbackKind,
}

impl Callback {
    /// A zero-argument callback.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            kind: CallbackKind::Plain(Box::new(f)),
        }
    }

    /// A callback that receives the outcome of the blocking operation.
    pub fn with_outcome<F>(f: F) -> Self
    where
        F: FnOnce(Result<()>) + 'static,
    {
        Self {
            kind: CallbackKind::WithOutcome(Box::new(f)),
        }
    }

    /// Whether this callback observes failures.
    pub fn wants_outcome(&self) -> bool {
        matches!(self.kind, CallbackKind::WithOutcome(_))
    }

    pub(crate) fn invoke(self, outcome: Result<()>) {
        match self.kind {
            CallbackKind::Plain(f) => f(),
            CallbackKind::WithOutcome(f) => f(outcome),
        }
    }
}

impl<F> From<F> for Callback
where
    F: FnOnce() + 'static,
{
    fn from(f: F) -> Self {
        Callback::new(f)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("wants_outcome", &self.wants_outcome())
            .finish()
    }
}

/// Host-side record of one offloaded call.
///
/// Exposes no mutation of its inputs after construction; only the phase moves.
pub(crate) struct WorkDescriptor {
    token: Option<RequestToken>,
    duration: Option<Duration>,
    callback: Option<Callback>,
    phase: TaskPhase,
    created_at: Instant,
}

impl WorkDescriptor {
    /// Create a descriptor for a job that will report back to `callback`.
    pub fn new(job: &Job, callback: Callback) -> Self {
        Self {
            token: None,
            duration: job.duration(),
            callback: Some(callback),
            phase: TaskPhase::Created,
            created_at: Instant::now(),
        }
    }

    /// Token assigned on submission.
    pub fn token(&self) -> Option<RequestToken> {
        self.token
    }

    /// Requested blocking duration, for sleep jobs.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    /// Time since the descriptor was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Move to `to`, which must be the immediate successor of the current phase.
    pub fn advance(&mut self, to: TaskPhase) -> Result<()> {
        if self.phase.next() != Some(to) {
            return Err(SpindleError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    pub(crate) fn bind(&mut self, token: RequestToken) -> Result<()> {
        self.advance(TaskPhase::Submitted)?;
        self.token = Some(token);
        Ok(())
    }

    /// Take the callback for dispatch. Only valid once the descriptor is `Completed`.
    pub(crate) fn take_callback(&mut self) -> Result<Callback> {
        if self.phase != TaskPhase::Completed {
            return Err(SpindleError::InvalidTransition {
                from: self.phase,
                to: TaskPhase::Dispatched,
            });
        }
        self.callback
            .take()
            .ok_or_else(|| SpindleError::InvalidCallback("callback already consumed".to_string()))
    }

    /// Abandon a descriptor whose submission failed before any worker saw it.
    pub(crate) fn disarm(mut self) {
        self.callback = None;
        self.phase = TaskPhase::Dispatched;
    }
}

impl fmt::Debug for WorkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkDescriptor")
            .field("token", &self.token())
            .field("duration", &self.duration())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Drop for WorkDescriptor {
    fn drop(&mut self) {
        if !self.phase.is_terminal() && self.callback.is_some() {
            error!(
                token = ?self.token,
                phase = ?self.phase,
                age_ms = self.age().as_millis() as u64,
                "descriptor released without dispatch; callback dropped uninvoked"
            );
        }
    }
}
