//! Prometheus metrics for the spindle host.
//!
//! Counters work standalone without a Registry - registration is only needed
//! for exposition (scraping).
//!
//! # Design Principles
//!
//! - **Always-on**: Counters are always incremented (just atomic ops)
//! - **Registry optional**: Users can optionally provide a Registry for exposition
//! - **Cached access**: Direct field access, no lookups in the dispatch path
//! - **Configurable prefix**: Metric names use `{prefix}_` prefix (default: "spindle")

use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Prometheus metrics for one host.
///
/// Cloned handles share the same underlying counters.
#[derive(Clone)]
pub struct SpindleMetrics {
    // === Gauges (current values) ===
    /// Descriptors submitted but not yet dispatched
    pub inflight_tasks: IntGauge,

    // === Counters (cumulative) ===
    /// Offloaded calls accepted
    pub submitted: IntCounter,

    /// Callbacks invoked and returned
    pub dispatched: IntCounter,

    /// Completions or descriptors released without a callback
    pub dropped: IntCounter,

    /// Blocking operations that panicked on a worker
    pub worker_panics: IntCounter,

    /// Callbacks that panicked on the host
    pub callback_panics: IntCounter,
}

impl Default for SpindleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(prefix: &str, name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(format!("{}_{}", prefix, name), help))
        .expect("metric creation should not fail")
}

impl SpindleMetrics {
    /// Create metrics with default prefix "spindle".
    pub fn new() -> Self {
        Self::with_prefix("spindle")
    }

    /// Create metrics with a custom prefix.
    ///
    /// The prefix is sanitized to be a valid Prometheus metric name: hyphens and
    /// other invalid characters are replaced with underscores.
    ///
    /// ```ignore
    /// let metrics = SpindleMetrics::with_prefix("my-addon");
    /// // Creates metrics like: my_addon_inflight_tasks, my_addon_submitted_total, etc.
    /// ```
    pub fn with_prefix(prefix: &str) -> Self {
        // Valid chars: [a-zA-Z_:] for first char, [a-zA-Z0-9_:] for rest
        let prefix: String = prefix
            .chars()
            .enumerate()
            .map(|(i, c)| {
                let valid = if i == 0 {
                    c.is_ascii_alphabetic() || c == '_' || c == ':'
                } else {
                    c.is_ascii_alphanumeric() || c == '_' || c == ':'
                };
                if valid {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        Self {
            inflight_tasks: IntGauge::with_opts(Opts::new(
                format!("{}_inflight_tasks", prefix),
                "Descriptors submitted but not yet dispatched",
            ))
            .expect("metric creation should not fail"),

            submitted: counter(&prefix, "submitted_total", "Offloaded calls accepted"),
            dispatched: counter(&prefix, "dispatched_total", "Callbacks invoked on the host"),
            dropped: counter(
                &prefix,
                "dropped_total",
                "Completions or descriptors released without a callback",
            ),
            worker_panics: counter(
                &prefix,
                "worker_panics_total",
                "Blocking operations that panicked",
            ),
            callback_panics: counter(
                &prefix,
                "callback_panics_total",
                "Callbacks that panicked on the host",
            ),
        }
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.inflight_tasks.clone()))?;
        registry.register(Box::new(self.submitted.clone()))?;
        registry.register(Box::new(self.dispatched.clone()))?;
        registry.register(Box::new(self.dropped.clone()))?;
        registry.register(Box::new(self.worker_panics.clone()))?;
        registry.register(Box::new(self.callback_panics.clone()))?;
        Ok(())
    }

    #[inline]
    pub fn record_submitted(&self, inflight: usize) {
        self.submitted.inc();
        self.set_inflight(inflight);
    }

    #[inline]
    pub fn record_dispatched(&self) {
        self.dispatched.inc();
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.dropped.inc();
    }

    #[inline]
    pub fn record_worker_panic(&self) {
        self.worker_panics.inc();
    }

    #[inline]
    pub fn record_callback_panic(&self) {
        self.callback_panics.inc();
    }

    #[inline]
    pub fn set_inflight(&self, count: usize) {
        self.inflight_tasks.set(count as i64);
    }
}

impl std::fmt::Debug for SpindleMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpindleMetrics")
            .field("inflight_tasks", &self.inflight_tasks.get())
            .field("submitted", &self.submitted.get())
            .field("dispatched", &self.dispatched.get())
            .field("dropped", &self.dropped.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = SpindleMetrics::new();
        assert_eq!(metrics.inflight_tasks.get(), 0);
        assert_eq!(metrics.submitted.get(), 0);
    }

    #[test]
    fn test_counter_increments() {
        let metrics = SpindleMetrics::new();

        metrics.record_submitted(3);
        assert_eq!(metrics.submitted.get(), 1);
        assert_eq!(metrics.inflight_tasks.get(), 3);

        metrics.record_dispatched();
        metrics.record_dropped();
        metrics.record_worker_panic();
        metrics.record_callback_panic();
        assert_eq!(metrics.dispatched.get(), 1);
        assert_eq!(metrics.dropped.get(), 1);
        assert_eq!(metrics.worker_panics.get(), 1);
        assert_eq!(metrics.callback_panics.get(), 1);
    }

    #[test]
    fn test_registry_integration() {
        let metrics = SpindleMetrics::new();
        let registry = Registry::new();

        metrics
            .register(&registry)
            .expect("registration should succeed");

        metrics.record_submitted(1);

        let families = registry.gather();
        let submitted = families
            .iter()
            .find(|f| f.get_name() == "spindle_submitted_total");
        assert!(submitted.is_some());
    }

    #[test]
    fn test_custom_prefix_sanitized() {
        let metrics = SpindleMetrics::with_prefix("my-addon");
        let registry = Registry::new();

        metrics
            .register(&registry)
            .expect("registration should succeed");

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "my_addon_inflight_tasks"));
        assert!(!families
            .iter()
            .any(|f| f.get_name() == "spindle_inflight_tasks"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        SpindleMetrics::new().register(&registry).unwrap();
        assert!(SpindleMetrics::new().register(&registry).is_err());
    }

    #[test]
    fn test_metrics_clone() {
        let metrics = SpindleMetrics::new();
        metrics.record_dispatched();

        let cloned = metrics.clone();
        assert_eq!(cloned.dispatched.get(), 1);

        // Cloned metrics share the same underlying counters
        cloned.record_dispatched();
        assert_eq!(metrics.dispatched.get(), 2);
    }
}
