//! Snapshot of the host mount table.
//!
//! Recovery only needs one question answered: which volumes are mounted
//! directly under the mount root right now, and from which device.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use procfs::{FromRead, MountEntry};
use volplug_shared::errors::{VolplugError, VolplugResult};

/// Default kernel mount table.
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Source of mounted volumes.
///
/// Implementations may block; callers run them off the async executor.
pub trait MountTable: Send + Sync {
    /// Volumes mounted at `root/<volume>`, keyed by volume name, valued by
    /// device. Mounts deeper below `root` are not volumes and are skipped.
    fn mounted_volumes(&self, root: &Path) -> VolplugResult<HashMap<String, String>>;
}

/// Reads a `/proc/mounts` formatted file through procfs.
#[derive(Clone, Debug)]
pub struct ProcMountTable {
    path: PathBuf,
}

impl ProcMountTable {
    pub fn new() -> Self {
        Self::with_path(PROC_MOUNTS)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcMountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable for ProcMountTable {
    fn mounted_volumes(&self, root: &Path) -> VolplugResult<HashMap<String, String>> {
        let entries = Vec::<MountEntry>::from_file(&self.path).map_err(|e| {
            VolplugError::MountTable(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        Ok(volumes_under(entries, root))
    }
}

/// Keep entries whose mount point's parent is `root`, keyed by the last
/// path component. procfs has already decoded the kernel's octal escapes.
pub fn volumes_under(
    entries: impl IntoIterator<Item = MountEntry>,
    root: &Path,
) -> HashMap<String, String> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let mount_point = PathBuf::from(entry.fs_file);
            if mount_point.parent() != Some(root) {
                return None;
            }
            let volume = mount_point.file_name()?.to_string_lossy().into_owned();
            Some((volume, entry.fs_spec))
        })
        .collect()
}
