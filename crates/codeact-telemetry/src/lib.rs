//! Telemetry: a fmt subscriber with EnvFilter plus an optional SQLite
//! layer persisting WARN-and-above records for later inspection.

pub mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Where warn+ records are persisted; `None` disables the sink.
    pub log_db_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".into(),
            log_db_path: None,
        }
    }
}

/// Keeps the sink alive (and queryable) for the process lifetime.
pub struct TelemetryGuard {
    sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    pub fn sink(&self) -> Option<&Arc<SqliteLogSink>> {
        self.sink.as_ref()
    }
}

/// Install the global subscriber. Safe to call once per process; returns a
/// guard holding the sink handle.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let sink = config
        .log_db_path
        .as_deref()
        .and_then(|path| SqliteLogSink::new(path).ok())
        .map(Arc::new);

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match &sink {
        Some(sink) => {
            registry.with(SqliteLogLayer::new(sink.clone())).try_init().ok();
        }
        None => {
            registry.try_init().ok();
        }
    }

    TelemetryGuard { sink }
}
