//! Driver configuration.
//!
//! Loaded once at startup from a JSON file with PascalCase keys and shared
//! read-only afterwards. Unknown keys are ignored so older config files keep
//! loading.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use volplug_shared::constants::defaults;
use volplug_shared::errors::{VolplugError, VolplugResult};

use crate::backend::BackendKind;

// ============================================================================
// Remote directories
// ============================================================================

/// Connection parameters for one network datastore label.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteDir {
    /// Server address.
    #[serde(default)]
    pub addr: String,

    /// Export path on the server.
    #[serde(default)]
    pub path: String,

    /// Extra mount arguments, passed through to the backend.
    #[serde(default)]
    pub args: String,

    /// Filesystem type; decides which backend owns the label.
    #[serde(default)]
    pub fstype: String,

    /// Sub-directory of the export holding the volumes.
    #[serde(default)]
    pub vol_path: String,

    #[serde(default)]
    pub src: String,
}

impl RemoteDir {
    pub fn new(fstype: impl Into<String>) -> Self {
        Self {
            fstype: fstype.into(),
            ..Default::default()
        }
    }

    /// Backend kind configured for this label.
    pub fn kind(&self) -> VolplugResult<BackendKind> {
        self.fstype.parse()
    }
}

/// Label table plus the label used for bare names on the network backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteDirList {
    #[serde(default)]
    pub default: String,

    #[serde(default)]
    pub remote_dir_tbl: HashMap<String, RemoteDir>,
}

// ============================================================================
// Config
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    /// Driver name, used to tag log records.
    #[serde(default = "default_driver")]
    pub driver: String,

    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Daily log files kept before the oldest is deleted.
    #[serde(default = "default_max_log_age_days")]
    pub max_log_age_days: usize,

    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory whose direct children are the volume mount points.
    #[serde(default = "default_mount_root")]
    pub mount_root: PathBuf,

    #[serde(default)]
    pub remote_dirs: RemoteDirList,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            log_path: default_log_path(),
            max_log_age_days: default_max_log_age_days(),
            log_level: default_log_level(),
            mount_root: default_mount_root(),
            remote_dirs: RemoteDirList::default(),
        }
    }
}

impl Config {
    /// Read, default and validate the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> VolplugResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            VolplugError::Config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = Self::from_json(&content)?;
        tracing::info!(
            path = %path.display(),
            driver = %config.driver,
            labels = config.remote_dirs.remote_dir_tbl.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_json(content: &str) -> VolplugResult<Self> {
        let mut config: Config = serde_json::from_str(content)?;
        config.set_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Fill in fields the file left empty.
    pub fn set_defaults(&mut self) {
        if self.driver.is_empty() {
            self.driver = default_driver();
        }
        if self.log_path.as_os_str().is_empty() {
            self.log_path = default_log_path();
        }
        if self.max_log_age_days == 0 {
            self.max_log_age_days = default_max_log_age_days();
        }
        if self.log_level.is_empty() {
            self.log_level = default_log_level();
        }
        if self.mount_root.as_os_str().is_empty() {
            self.mount_root = default_mount_root();
        }
    }

    pub fn validate(&self) -> VolplugResult<()> {
        for (label, dir) in &self.remote_dirs.remote_dir_tbl {
            dir.kind().map_err(|e| {
                VolplugError::Config(format!("remote dir {}: {}", label, e))
            })?;
        }

        let default = &self.remote_dirs.default;
        if !default.is_empty() && !self.remote_dirs.remote_dir_tbl.contains_key(default) {
            return Err(VolplugError::Config(format!(
                "default label {} has no entry in RemoteDirTbl",
                default
            )));
        }

        Ok(())
    }

    /// Configured parameters for a datastore label.
    pub fn remote_dir(&self, label: &str) -> Option<&RemoteDir> {
        self.remote_dirs.remote_dir_tbl.get(label)
    }

    /// Label used for bare names on the network backend, if any.
    pub fn default_label(&self) -> Option<&str> {
        let default = self.remote_dirs.default.as_str();
        (!default.is_empty()).then_some(default)
    }

    /// Add a label to the remote-dir table.
    pub fn with_remote_dir(mut self, label: impl Into<String>, dir: RemoteDir) -> Self {
        self.remote_dirs.remote_dir_tbl.insert(label.into(), dir);
        self
    }

    pub fn with_default_label(mut self, label: impl Into<String>) -> Self {
        self.remote_dirs.default = label.into();
        self
    }

    pub fn with_mount_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mount_root = root.into();
        self
    }
}

fn default_driver() -> String {
    defaults::DRIVER_NAME.to_string()
}

fn default_log_path() -> PathBuf {
    PathBuf::from(defaults::LOG_PATH)
}

fn default_max_log_age_days() -> usize {
    defaults::MAX_LOG_AGE_DAYS
}

fn default_log_level() -> String {
    defaults::LOG_LEVEL.to_string()
}

fn default_mount_root() -> PathBuf {
    PathBuf::from(defaults::MOUNT_ROOT)
}
