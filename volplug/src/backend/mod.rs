//! Storage backend abstraction.
//!
//! A backend performs the physical work for one class of storage (attached
//! block devices, network shares). The driver owns reference counting and
//! never calls a backend mount or unmount twice for the same transition.

mod registry;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use volplug_shared::constants::backend_types;
use volplug_shared::errors::{VolplugError, VolplugResult};
use volplug_shared::protocol::{CreateRequest, MountRequest, Volume, VolumeStatus};

pub use registry::BackendRegistry;

/// Class of storage a volume lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    /// Hypervisor-attached block device. Default for unlabeled volumes.
    Block,
    /// Network filesystem share.
    Network,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Block => backend_types::VMDK,
            BackendKind::Network => backend_types::NFS,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = VolplugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vmdk" | "block" => Ok(BackendKind::Block),
            "nfs" | "nfs4" | "cifs" | "smb" | "file" | "network" => Ok(BackendKind::Network),
            _ => Err(VolplugError::Config(format!(
                "unknown backend type '{}'. Supported: vmdk, nfs, nfs4, cifs, smb, file",
                s
            ))),
        }
    }
}

/// Physical volume operations for one storage class.
///
/// Names passed in are fully qualified when the driver could resolve them.
/// Errors are reported as `VolplugError::Backend` and passed through to the
/// caller unchanged.
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    async fn create(&self, req: &CreateRequest) -> VolplugResult<()>;

    /// Attach and mount `req.name`, returning the mount point.
    async fn mount(&self, req: &MountRequest) -> VolplugResult<PathBuf>;

    async fn unmount(&self, name: &str) -> VolplugResult<()>;

    async fn remove(&self, name: &str) -> VolplugResult<()>;

    async fn path(&self, name: &str) -> VolplugResult<PathBuf>;

    /// Every volume this backend knows, with fully-qualified names.
    async fn list(&self) -> VolplugResult<Vec<Volume>>;

    async fn get(&self, name: &str) -> VolplugResult<VolumeStatus>;

    /// Whether the volume is currently mounted on this host.
    fn is_mounted(&self, name: &str) -> bool;

    /// Where the volume is, or would be, mounted.
    fn mount_point(&self, name: &str) -> PathBuf;

    /// Whether `label` names a datastore served by this backend.
    fn is_known_datastore_label(&self, label: &str) -> bool;
}
