//! volplug volume driver library.
//!
//! Reference-counted mount orchestration between a container runtime's
//! volume plugin protocol and the storage backends that do the physical
//! work.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Keeps the non-blocking log writer thread alive for the whole process.
static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

pub mod backend;
pub mod config;
pub mod driver;
pub mod identity;
pub mod mount_table;
pub mod refcount;

pub use backend::{BackendKind, BackendRegistry, VolumeBackend};
pub use config::{Config, RemoteDir, RemoteDirList};
pub use driver::VolumeDriver;
pub use mount_table::{MountTable, ProcMountTable};
pub use refcount::{RecoveryReport, RefCounts, StateGuard};

pub use volplug_shared::errors::{VolplugError, VolplugResult};
pub use volplug_shared::protocol::{
    Capabilities, CreateRequest, MountRequest, Response, UnmountOutcome, UnmountRequest, Volume,
    VolumeStatus,
};

/// Initialize tracing from the logging section of `config`.
///
/// Logs go to `config.log_path` with daily rotation, keeping at most
/// `max_log_age_days` files. `RUST_LOG` overrides `config.log_level`.
/// Idempotent: subsequent calls return immediately once initialized.
pub fn init_logging(config: &Config) -> VolplugResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let log_path = config.log_path.as_path();
    let logs_dir = log_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = log_path.file_name().ok_or_else(|| {
        VolplugError::Config(format!("log path {} has no file name", log_path.display()))
    })?;

    std::fs::create_dir_all(logs_dir).map_err(|e| {
        VolplugError::Internal(format!(
            "Failed to create logs directory {}: {}",
            logs_dir.display(),
            e
        ))
    })?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            VolplugError::Config(format!("invalid log level {}: {}", config.log_level, e))
        })?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name.to_string_lossy().into_owned())
        .max_log_files(config.max_log_age_days.max(1))
        .build(logs_dir)
        .map_err(|e| VolplugError::Internal(format!("Failed to open log file: {}", e)))?;

    let _ = LOG_GUARD.get_or_init(|| {
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        register_to_tracing(non_blocking, env_filter);
        guard
    });

    Ok(())
}

/// Install the global subscriber. An existing global subscriber is kept.
fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.log_path = dir.path().join("logs").join("volplug.log");
        config.max_log_age_days = 3;

        init_logging(&config).unwrap();
        init_logging(&config).unwrap();
        assert!(dir.path().join("logs").is_dir());
    }
}
