//! Logging capability injected into collectors.
//!
//! Collectors never reach for a global logger. They receive an
//! `Arc<dyn LogSink>` at construction and report fetch failures through it.
//! [`TracingLog`] forwards to the `tracing` subscriber installed by the binary.

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter directive when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info,es_exporter=debug";

/// Destination for human-readable collector messages.
pub trait LogSink: Send + Sync + 'static {
    /// Record one message at the given level.
    fn log(&self, level: Level, message: &str);
}

/// [`LogSink`] backed by `tracing` events.
#[derive(Debug, Clone, Default)]
pub struct TracingLog {
    source: Option<String>,
}

impl TracingLog {
    /// Create a sink that tags every event with `source`.
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
        }
    }

    /// Shared handle suitable for collector constructors.
    pub fn shared() -> Arc<dyn LogSink> {
        Arc::new(Self::default())
    }
}

impl LogSink for TracingLog {
    fn log(&self, level: Level, message: &str) {
        let source = self.source.as_deref().unwrap_or("collector");
        match level {
            Level::ERROR => tracing::error!(source, "{message}"),
            Level::WARN => tracing::warn!(source, "{message}"),
            Level::INFO => tracing::info!(source, "{message}"),
            Level::DEBUG => tracing::debug!(source, "{message}"),
            Level::TRACE => tracing::trace!(source, "{message}"),
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// Honors `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`].
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_log_accepts_every_level() {
        let sink = TracingLog::with_source("test");
        for level in [
            Level::ERROR,
            Level::WARN,
            Level::INFO,
            Level::DEBUG,
            Level::TRACE,
        ] {
            sink.log(level, "message");
        }
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
