//! Error types for spindle-rs.

use thiserror::Error;

use crate::descriptor::TaskPhase;

/// Errors that can occur when building a host runtime or offloading work.
#[derive(Debug, Error)]
pub enum SpindleError {
    /// Wrong argument count or type at the binding layer.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The callback could not be registered, or its host is gone.
    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    /// The blocking operation panicked on the worker thread.
    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// A descriptor was asked to move to a phase it cannot reach from its current one.
    #[error("invalid task phase transition {from:?} -> {to:?}")]
    InvalidTransition { from: TaskPhase, to: TaskPhase },

    /// Configuration values were extracted but are not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Error building the tokio runtime that drives the host loop.
    #[error("failed to build host runtime: {0}")]
    HostRuntime(#[from] std::io::Error),

    /// Error building the rayon worker pool.
    #[error("failed to build rayon thread pool: {0}")]
    RayonThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type alias for spindle operations.
pub type Result<T> = std::result::Result<T, SpindleError>;
