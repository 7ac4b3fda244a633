//! Structured logging for the alignment pipeline
//!
//! Console and daily-rotated JSON file output, per-component levels,
//! correlation ids per scan and a process-wide metrics collector.

pub mod config;
pub mod metrics;
pub mod spans;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

pub use config::LoggingConfig;
pub use metrics::{global_metrics, MetricsCollector, PerformanceMeasurement, PerformanceStats, Timer};
pub use spans::{BatchSpan, ScanSpan, StrategySpan};

thread_local! {
    static CORRELATION_ID: std::cell::RefCell<Option<Uuid>> = const { std::cell::RefCell::new(None) };
}

/// Initialize the logging system. `RUST_LOG` overrides the configured
/// levels. The returned guard must be kept alive for file output to flush.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let mut layers = Vec::new();
    let mut guard = None;

    if config.console_output {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(config.include_file_location)
            .with_file(config.include_file_location)
            .with_writer(std::io::stderr);
        layers.push(console_layer.boxed());
    }

    if let Some(ref log_dir) = config.log_directory {
        let file_appender = tracing_appender::rolling::daily(log_dir, "prealign.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .json();
        layers.push(file_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging already initialized: {}", e))?;

    tracing::info!("Logging system initialized with config: {:?}", config);
    Ok(guard)
}

/// Set a correlation ID for the current thread
pub fn set_correlation_id(id: Uuid) {
    CORRELATION_ID.with(|correlation_id| {
        *correlation_id.borrow_mut() = Some(id);
    });
}

/// Get the current correlation ID for this thread
pub fn get_correlation_id() -> Option<Uuid> {
    CORRELATION_ID.with(|correlation_id| *correlation_id.borrow())
}

/// Generate a new correlation ID and set it for the current thread
pub fn new_correlation_id() -> Uuid {
    let id = Uuid::new_v4();
    set_correlation_id(id);
    id
}

/// Clear the correlation ID for the current thread
pub fn clear_correlation_id() {
    CORRELATION_ID.with(|correlation_id| {
        *correlation_id.borrow_mut() = None;
    });
}

/// Gives the current thread a fresh correlation ID until dropped, then puts
/// back whatever was there before. Nested scopes (work stolen by a rayon
/// worker while it waits) leave the outer scan's ID intact.
pub struct CorrelationScope {
    id: Uuid,
    previous: Option<Uuid>,
}

impl CorrelationScope {
    pub fn enter() -> Self {
        let previous = get_correlation_id();
        let id = new_correlation_id();
        Self { id, previous }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for CorrelationScope {
    fn drop(&mut self) {
        match self.previous {
            Some(previous) => set_correlation_id(previous),
            None => clear_correlation_id(),
        }
    }
}

/// Create a span with correlation ID automatically included
#[macro_export]
macro_rules! correlation_span {
    ($level:expr, $name:expr) => {
        if let Some(correlation_id) = $crate::logging::get_correlation_id() {
            tracing::span!($level, $name, correlation_id = %correlation_id)
        } else {
            tracing::span!($level, $name)
        }
    };
    ($level:expr, $name:expr, $($field:tt)*) => {
        if let Some(correlation_id) = $crate::logging::get_correlation_id() {
            tracing::span!($level, $name, correlation_id = %correlation_id, $($field)*)
        } else {
            tracing::span!($level, $name, $($field)*)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_management() {
        clear_correlation_id();
        assert!(get_correlation_id().is_none());

        let id = new_correlation_id();
        assert_eq!(get_correlation_id(), Some(id));

        // other threads have their own slot
        let other = std::thread::spawn(get_correlation_id).join().unwrap();
        assert!(other.is_none());

        clear_correlation_id();
        assert!(get_correlation_id().is_none());
    }

    #[test]
    fn test_nested_correlation_scopes_restore_outer_id() {
        clear_correlation_id();
        {
            let outer = CorrelationScope::enter();
            assert_eq!(get_correlation_id(), Some(outer.id()));
            {
                let inner = CorrelationScope::enter();
                assert_ne!(inner.id(), outer.id());
                assert_eq!(get_correlation_id(), Some(inner.id()));
            }
            assert_eq!(get_correlation_id(), Some(outer.id()));
        }
        assert!(get_correlation_id().is_none());
    }
}
