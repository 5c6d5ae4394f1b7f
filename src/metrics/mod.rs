//! Metrics collection for spindle host observability.
//!
//! Metrics are always collected (atomic operations) and can optionally be
//! exposed via a Prometheus registry for scraping.
//!
//! # Available Metrics
//!
//! ## Gauges (current values)
//!
//! - `spindle_inflight_tasks` - Descriptors submitted but not yet dispatched
//!
//! ## Counters (cumulative)
//!
//! - `spindle_submitted_total` - Offloaded calls accepted
//! - `spindle_dispatched_total` - Callbacks invoked and returned
//! - `spindle_dropped_total` - Completions or descriptors released without a callback
//! - `spindle_worker_panics_total` - Blocking operations that panicked
//! - `spindle_callback_panics_total` - Callbacks that panicked on the host
//!
//! # Example
//!
//! ```ignore
//! use prometheus::Registry;
//! use spindle_rs::SpindleBuilder;
//!
//! let registry = Registry::new();
//! let runtime = SpindleBuilder::new()
//!     .prometheus_registry(registry.clone())
//!     .build()?;
//!
//! let encoder = prometheus::TextEncoder::new();
//! let mut buffer = String::new();
//! encoder.encode_utf8(&registry.gather(), &mut buffer)?;
//! ```

mod prometheus;

pub use self::prometheus::SpindleMetrics;
