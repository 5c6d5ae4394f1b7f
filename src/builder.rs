//! Builder pattern for constructing spindle hosts.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use std::path::Path;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;

use crate::config::SpindleConfig;
use crate::error::Result;
use crate::runtime::SpindleRuntime;

/// Builder for constructing a `SpindleRuntime`.
///
/// Configuration sources are merged in the following order (later sources override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
///
/// # Examples
///
/// ```ignore
/// use spindle_rs::SpindleBuilder;
///
/// let runtime = SpindleBuilder::new()
///     .file("spindle.toml")
///     .env_prefix("SPINDLE")
///     .prefix("addon")
///     .build()?;
/// ```
pub struct SpindleBuilder {
    figment: Figment,
    prometheus_registry: Option<Registry>,
}

impl Default for SpindleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SpindleBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpindleBuilder")
            .field("figment", &self.figment)
            .field(
                "prometheus_registry",
                &self.prometheus_registry.as_ref().map(|_| "<Registry>"),
            )
            .finish()
    }
}

impl SpindleBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(SpindleConfig::default())),
            prometheus_registry: None,
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            // Default to TOML
            _ => self.figment.merge(Toml::file(path)),
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Environment variables are expected in the format `{PREFIX}_{KEY}`,
    /// e.g., `SPINDLE_PREFIX`, `SPINDLE_WORKER_THREADS`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.figment = self
            .figment
            .merge(Env::prefixed(&format!("{}_", prefix)));
        self
    }

    /// Set the thread name prefix.
    ///
    /// Worker threads are named `{prefix}-worker-{NNNN}` or `{prefix}-rayon-{NNNN}`.
    /// The prefix also names the Prometheus metrics.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("prefix", prefix.into()));
        self
    }

    /// Run offloaded work on a rayon pool of `n` threads instead of one
    /// thread per call.
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("worker_threads", n));
        self
    }

    /// Stack size for worker threads, dedicated or pooled.
    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("worker_stack_size", bytes));
        self
    }

    /// Provide an external Prometheus registry for metrics exposition.
    pub fn prometheus_registry(mut self, registry: Registry) -> Self {
        self.prometheus_registry = Some(registry);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `SpindleArgs` struct.
    pub fn with_cli_args(mut self, args: &SpindleArgs) -> Self {
        if let Some(ref prefix) = args.spindle_prefix {
            self.figment = self
                .figment
                .merge(Serialized::default("prefix", prefix.clone()));
        }
        if let Some(threads) = args.spindle_worker_threads {
            self.figment = self
                .figment
                .merge(Serialized::default("worker_threads", threads));
        }
        if let Some(bytes) = args.spindle_worker_stack_size {
            self.figment = self
                .figment
                .merge(Serialized::default("worker_stack_size", bytes));
        }
        self
    }

    /// Extract the merged configuration without building a runtime.
    pub fn config(&self) -> Result<SpindleConfig> {
        let mut config: SpindleConfig = self.figment.extract().map_err(Box::new)?;
        config.prometheus_registry = self.prometheus_registry.clone();
        Ok(config)
    }

    /// Build the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction or validation fails
    /// - The host loop or the worker pool cannot be constructed
    pub fn build(self) -> Result<SpindleRuntime> {
        let config = self.config()?;
        SpindleRuntime::from_config(config)
    }
}

/// CLI arguments for spindle configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to a `SpindleBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use spindle_rs::{SpindleArgs, SpindleBuilder};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     spindle: SpindleArgs,
/// }
///
/// let args = MyArgs::parse();
/// let runtime = SpindleBuilder::new()
///     .with_cli_args(&args.spindle)
///     .build()?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct SpindleArgs {
    /// Thread name prefix
    #[arg(long)]
    pub spindle_prefix: Option<String>,

    /// Number of pooled worker threads (default: one thread per call)
    #[arg(long)]
    pub spindle_worker_threads: Option<usize>,

    /// Stack size in bytes for worker threads
    #[arg(long)]
    pub spindle_worker_stack_size: Option<usize>,
}
