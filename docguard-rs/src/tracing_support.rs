//! Tracing subscriber setup
//!
//! The engine logs access decisions through `tracing` (denials at `debug`,
//! broken rules at `warn`, identity failures at `error`). Applications that
//! do not install their own subscriber can use the helpers here.

pub use tracing::{self, debug, error, info, instrument, trace, warn};

#[cfg(feature = "subscriber")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Human-readable multi-line output
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// JSON objects, for log shippers
    Json,
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Filter directive (e.g. `"docguard_engine=debug"`).
    ///
    /// If None, uses RUST_LOG or defaults to "info".
    pub filter: Option<String>,
    pub format: TracingFormat,
    pub timestamps: bool,
    pub target: bool,
    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            format: TracingFormat::Pretty,
            timestamps: true,
            target: true,
            thread_ids: false,
        }
    }
}

impl TracingConfig {
    /// Log every access decision, including denials
    pub fn decisions() -> Self {
        Self {
            filter: Some("info,docguard_engine=debug,docguard=debug".to_string()),
            format: TracingFormat::Compact,
            ..Self::default()
        }
    }

    #[cfg(feature = "subscriber")]
    fn env_filter(&self) -> EnvFilter {
        match &self.filter {
            Some(directive) => EnvFilter::new(directive),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    }
}

/// Install a subscriber with default settings.
///
/// # Environment Variables
///
/// - `RUST_LOG=debug` - include access denials
/// - `RUST_LOG=docguard_engine=trace` - per-field decisions and cache activity
#[cfg(feature = "subscriber")]
pub fn init_subscriber() {
    init_subscriber_with_config(TracingConfig::default());
}

/// Install a subscriber with custom configuration.
///
/// # Example
///
/// ```ignore
/// use docguard::tracing_support::{init_subscriber_with_config, TracingConfig, TracingFormat};
///
/// init_subscriber_with_config(TracingConfig {
///     format: TracingFormat::Json,
///     ..Default::default()
/// });
/// ```
#[cfg(feature = "subscriber")]
pub fn init_subscriber_with_config(config: TracingConfig) {
    let filter = config.env_filter();

    match (config.format, config.timestamps) {
        (TracingFormat::Pretty, true) => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(config.target)
                    .with_thread_ids(config.thread_ids),
            )
            .init(),
        (TracingFormat::Pretty, false) => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .without_time()
                    .with_target(config.target)
                    .with_thread_ids(config.thread_ids),
            )
            .init(),
        (TracingFormat::Compact, true) => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(config.target)
                    .with_thread_ids(config.thread_ids),
            )
            .init(),
        (TracingFormat::Compact, false) => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .without_time()
                    .with_target(config.target)
                    .with_thread_ids(config.thread_ids),
            )
            .init(),
        (TracingFormat::Json, true) => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.target)
                    .with_thread_ids(config.thread_ids),
            )
            .init(),
        (TracingFormat::Json, false) => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .without_time()
                    .with_target(config.target)
                    .with_thread_ids(config.thread_ids),
            )
            .init(),
    }
}

#[cfg(not(feature = "subscriber"))]
pub fn init_subscriber() {}
