pub mod codec;
pub mod db;
pub mod errors;
pub mod models;
pub mod notepad;
pub mod redaction;
pub mod remote;
pub mod slug;
pub mod storage;
pub mod sync;
pub mod template;

pub use crate::errors::{AppError, AppResult};
pub use crate::notepad::{NotepadCore, SyncSummary};
pub use crate::remote::RemoteRepository;
pub use crate::storage::{BackupPolicy, SnapshotStore, StorageMedium};
pub use crate::sync::{PullOutcome, SyncEngine};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the JSON file logger under `<data_dir>/logs`. Verbosity follows
/// `RUST_LOG` and defaults to `info`.
pub fn init_tracing(data_dir: &Path) -> AppResult<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "notepad-sync.log");
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
        .map_err(|error| AppError::Internal(error.to_string()))
}
