//! Test doubles for the volplug driver.
//!
//! `MockBackend` keeps volumes in memory and counts calls so tests can
//! check how often the driver reached the backend. `FakeMountTable` stands
//! in for `/proc/mounts` during recovery.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use volplug::backend::{BackendKind, BackendRegistry, VolumeBackend};
use volplug::mount_table::MountTable;
use volplug_shared::constants::{metadata, naming::LABEL_DELIMITER};
use volplug_shared::errors::{VolplugError, VolplugResult};
use volplug_shared::protocol::{CreateRequest, MountRequest, Volume, VolumeStatus};

// ============================================================================
// Mock backend
// ============================================================================

/// Calls the driver made into a backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub mount: usize,
    pub unmount: usize,
    pub remove: usize,
    pub path: usize,
    pub list: usize,
    pub get: usize,
}

#[derive(Debug, Default)]
struct MockState {
    volumes: BTreeMap<String, VolumeStatus>,
    mounted: HashSet<String>,
    fail_next_mount: Option<String>,
    fail_next_unmount: Option<String>,
    calls: CallCounts,
}

/// In-memory backend.
///
/// With a datastore set, bare names given to `create` are stored as
/// `name@datastore` and `get` reports the datastore in metadata.
#[derive(Debug)]
pub struct MockBackend {
    mount_root: PathBuf,
    datastore: Option<String>,
    known_labels: Vec<String>,
    mount_delay: Option<Duration>,
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(mount_root: impl Into<PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
            datastore: None,
            known_labels: Vec::new(),
            mount_delay: None,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_datastore(mut self, label: impl Into<String>) -> Self {
        self.datastore = Some(label.into());
        self
    }

    /// Label this backend claims through `is_known_datastore_label`.
    pub fn with_known_label(mut self, label: impl Into<String>) -> Self {
        self.known_labels.push(label.into());
        self
    }

    /// Sleep this long inside every physical mount.
    pub fn with_mount_delay(mut self, delay: Duration) -> Self {
        self.mount_delay = Some(delay);
        self
    }

    /// Seed a volume without going through `create`.
    pub fn with_volume(self, name: &str) -> Self {
        let (stored, status) = self.canonical(name);
        self.state.lock().volumes.insert(stored, status);
        self
    }

    /// Mark a volume as already mounted, as after a driver restart.
    pub fn set_mounted(&self, name: &str) {
        self.state.lock().mounted.insert(name.to_string());
    }

    pub fn fail_next_mount(&self, message: impl Into<String>) {
        self.state.lock().fail_next_mount = Some(message.into());
    }

    pub fn fail_next_unmount(&self, message: impl Into<String>) {
        self.state.lock().fail_next_unmount = Some(message.into());
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls.clone()
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.state.lock().volumes.keys().cloned().collect()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn canonical(&self, name: &str) -> (String, VolumeStatus) {
        let (stored, label) = match name.split_once(LABEL_DELIMITER) {
            Some((_, label)) => (name.to_string(), Some(label.to_string())),
            None => match &self.datastore {
                Some(ds) => (format!("{}{}{}", name, LABEL_DELIMITER, ds), Some(ds.clone())),
                None => (name.to_string(), None),
            },
        };

        let mut status = VolumeStatus::new();
        if let Some(label) = label {
            status.insert(metadata::DATASTORE.to_string(), Value::String(label));
        }
        (stored, status)
    }

    fn lookup(state: &MockState, name: &str) -> Option<VolumeStatus> {
        if let Some(status) = state.volumes.get(name) {
            return Some(status.clone());
        }
        state
            .volumes
            .iter()
            .find(|(stored, _)| {
                stored
                    .split_once(LABEL_DELIMITER)
                    .is_some_and(|(bare, _)| bare == name)
            })
            .map(|(_, status)| status.clone())
    }
}

#[async_trait]
impl VolumeBackend for MockBackend {
    async fn create(&self, req: &CreateRequest) -> VolplugResult<()> {
        let (stored, status) = self.canonical(&req.name);
        let mut state = self.state.lock();
        state.calls.create += 1;
        if state.volumes.contains_key(&stored) {
            return Err(VolplugError::Backend(format!("volume {} already exists", stored)));
        }
        state.volumes.insert(stored, status);
        Ok(())
    }

    async fn mount(&self, req: &MountRequest) -> VolplugResult<PathBuf> {
        self.state.lock().calls.mount += 1;
        if let Some(delay) = self.mount_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(message) = state.fail_next_mount.take() {
            return Err(VolplugError::Backend(message));
        }
        state.mounted.insert(req.name.clone());
        Ok(self.mount_point(&req.name))
    }

    async fn unmount(&self, name: &str) -> VolplugResult<()> {
        let mut state = self.state.lock();
        state.calls.unmount += 1;
        if let Some(message) = state.fail_next_unmount.take() {
            return Err(VolplugError::Backend(message));
        }
        state.mounted.remove(name);
        Ok(())
    }

    async fn remove(&self, name: &str) -> VolplugResult<()> {
        let mut state = self.state.lock();
        state.calls.remove += 1;
        match state.volumes.remove(name) {
            Some(_) => Ok(()),
            None => Err(VolplugError::NotFound(name.to_string())),
        }
    }

    async fn path(&self, name: &str) -> VolplugResult<PathBuf> {
        self.state.lock().calls.path += 1;
        Ok(self.mount_point(name))
    }

    async fn list(&self) -> VolplugResult<Vec<Volume>> {
        let mut state = self.state.lock();
        state.calls.list += 1;
        Ok(state
            .volumes
            .iter()
            .map(|(name, status)| Volume {
                name: name.clone(),
                mountpoint: if state.mounted.contains(name) {
                    self.mount_point(name)
                } else {
                    PathBuf::new()
                },
                status: status.clone(),
            })
            .collect())
    }

    async fn get(&self, name: &str) -> VolplugResult<VolumeStatus> {
        let mut state = self.state.lock();
        state.calls.get += 1;
        Self::lookup(&state, name).ok_or_else(|| VolplugError::NotFound(name.to_string()))
    }

    fn is_mounted(&self, name: &str) -> bool {
        self.state.lock().mounted.contains(name)
    }

    fn mount_point(&self, name: &str) -> PathBuf {
        self.mount_root.join(name)
    }

    fn is_known_datastore_label(&self, label: &str) -> bool {
        self.datastore.as_deref() == Some(label) || self.known_labels.iter().any(|l| l == label)
    }
}

/// Registry with a block and a network mock, in that order.
pub fn block_and_network(
    block: MockBackend,
    network: MockBackend,
) -> (Arc<MockBackend>, Arc<MockBackend>, BackendRegistry) {
    let block = block.into_arc();
    let network = network.into_arc();
    let registry = BackendRegistry::new()
        .with_backend(BackendKind::Block, block.clone())
        .with_backend(BackendKind::Network, network.clone());
    (block, network, registry)
}

// ============================================================================
// Fake mount table
// ============================================================================

#[derive(Debug, Default)]
struct FakeTableState {
    volumes: HashMap<String, String>,
    failing: bool,
    reads: usize,
}

/// Mount table whose contents and failures are set by the test.
#[derive(Debug, Default)]
pub struct FakeMountTable {
    state: Mutex<FakeTableState>,
}

impl FakeMountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(self, name: &str, device: &str) -> Self {
        self.state
            .lock()
            .volumes
            .insert(name.to_string(), device.to_string());
        self
    }

    /// Make every read fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }
}

impl MountTable for FakeMountTable {
    fn mounted_volumes(&self, root: &Path) -> VolplugResult<HashMap<String, String>> {
        let mut state = self.state.lock();
        state.reads += 1;
        if state.failing {
            return Err(VolplugError::MountTable(format!(
                "cannot read mounts under {}",
                root.display()
            )));
        }
        Ok(state.volumes.clone())
    }
}
