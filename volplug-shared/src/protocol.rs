//! Volume plugin request and response types.
//!
//! Field names follow the container runtime's volume plugin JSON shape
//! (`Name`, `Opts`, `ID`, `Mountpoint`, ...). The driver works with typed
//! results; [`Response`] is where those results become the wire form with
//! an `Err` string.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::protocol::SCOPE_GLOBAL;
use crate::errors::VolplugResult;

/// Volume metadata as reported by a backend (free-form key/value map).
pub type VolumeStatus = serde_json::Map<String, serde_json::Value>;

/// Create request: volume name plus driver options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    pub name: String,
    #[serde(default)]
    pub opts: HashMap<String, String>,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opts: HashMap::new(),
        }
    }

    /// Add a driver option.
    pub fn with_opt(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.opts.insert(key.into(), value.into());
        self
    }

    pub fn opt(&self, key: &str) -> Option<&str> {
        self.opts.get(key).map(String::as_str)
    }
}

/// Mount request. `id` identifies this particular mount so the matching
/// unmount can be associated with it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ID", default)]
    pub id: String,
}

impl MountRequest {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

/// Unmount request, same shape as [`MountRequest`].
pub type UnmountRequest = MountRequest;

/// A volume as reported to the runtime.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_empty_path")]
    pub mountpoint: PathBuf,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub status: VolumeStatus,
}

/// Plugin scope reported to the runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capabilities {
    pub scope: String,
}

impl Capabilities {
    /// Volumes are visible to every host using the same datastores.
    pub fn global() -> Self {
        Self {
            scope: SCOPE_GLOBAL.to_string(),
        }
    }
}

/// Result of an unmount call.
///
/// All three are successes from the runtime's point of view; they differ in
/// whether the backend was touched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnmountOutcome {
    /// Last reference released and the backend detached the volume.
    Detached,
    /// Other containers still use the volume; nothing was detached.
    StillReferenced { refcount: u32 },
    /// Startup recovery has not finished; the unmount was deferred.
    RecoveryPending,
}

/// Wire response. Empty fields are omitted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub err: String,
    #[serde(default, skip_serializing_if = "is_empty_path")]
    pub mountpoint: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<Volume>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl Response {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(err: impl ToString) -> Self {
        Self {
            err: err.to_string(),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_empty()
    }
}

impl From<VolplugResult<()>> for Response {
    fn from(result: VolplugResult<()>) -> Self {
        match result {
            Ok(()) => Response::ok(),
            Err(e) => Response::error(e),
        }
    }
}

impl From<VolplugResult<PathBuf>> for Response {
    fn from(result: VolplugResult<PathBuf>) -> Self {
        match result {
            Ok(mountpoint) => Response {
                mountpoint,
                ..Default::default()
            },
            Err(e) => Response::error(e),
        }
    }
}

impl From<VolplugResult<UnmountOutcome>> for Response {
    fn from(result: VolplugResult<UnmountOutcome>) -> Self {
        result.map(|_| ()).into()
    }
}

impl From<VolplugResult<Volume>> for Response {
    fn from(result: VolplugResult<Volume>) -> Self {
        match result {
            Ok(volume) => Response {
                volume: Some(volume),
                ..Default::default()
            },
            Err(e) => Response::error(e),
        }
    }
}

impl From<VolplugResult<Vec<Volume>>> for Response {
    fn from(result: VolplugResult<Vec<Volume>>) -> Self {
        match result {
            Ok(volumes) => Response {
                volumes: Some(volumes),
                ..Default::default()
            },
            Err(e) => Response::error(e),
        }
    }
}

impl From<Capabilities> for Response {
    fn from(capabilities: Capabilities) -> Self {
        Response {
            capabilities: Some(capabilities),
            ..Default::default()
        }
    }
}

#[allow(clippy::ptr_arg)]
fn is_empty_path(path: &PathBuf) -> bool {
    path.as_os_str().is_empty()
}
