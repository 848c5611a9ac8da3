pub mod ai;
mod app;
pub mod bridge;
pub mod config;
pub mod db;
pub mod errors;
pub mod kv;
pub mod migrate;
pub mod models;
pub mod redaction;
pub mod secrets;
pub mod storage;
pub mod store;
pub mod sync;

pub use crate::app::AppCore;
pub use crate::errors::{AppError, AppResult};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// JSON logs, rotated daily under `<data_dir>/logs`. Filter from `RUST_LOG`, default `info`.
pub fn init_tracing(app_data_dir: &Path) -> Result<(), String> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "planner.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

/// Error text handed across the GUI boundary.
pub fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
