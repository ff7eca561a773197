//! Volumes the driver has mounted, with the mounts that hold them.

use std::collections::HashMap;

use crate::backend::BackendKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountedEntry {
    /// Backend that mounted the volume; later calls for it go there.
    pub kind: BackendKind,
    /// Mount ids currently attached, in mount order.
    pub mount_ids: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MountedVolumes {
    entries: HashMap<String, MountedEntry>,
    by_mount_id: HashMap<String, String>,
}

impl MountedVolumes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&self, name: &str) -> Option<BackendKind> {
        self.entries.get(name).map(|entry| entry.kind)
    }

    /// Create the entry for `name` unless one exists.
    pub fn record(&mut self, name: &str, kind: BackendKind) {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| MountedEntry {
                kind,
                mount_ids: Vec::new(),
            });
    }

    /// Attach `mount_id` to `name`. Empty ids are not tracked.
    pub fn add_mount_id(&mut self, name: &str, mount_id: &str) {
        if mount_id.is_empty() {
            return;
        }
        if let Some(entry) = self.entries.get_mut(name) {
            entry.mount_ids.push(mount_id.to_string());
            self.by_mount_id
                .insert(mount_id.to_string(), name.to_string());
        }
    }

    /// Detach `mount_id` and return the volume it was holding.
    pub fn take_mount_id(&mut self, mount_id: &str) -> Option<String> {
        let name = self.by_mount_id.remove(mount_id)?;
        if let Some(entry) = self.entries.get_mut(&name) {
            entry.mount_ids.retain(|id| id != mount_id);
        }
        Some(name)
    }

    /// Drop the entry for `name` and every mount id pointing at it.
    pub fn remove(&mut self, name: &str) -> Option<MountedEntry> {
        let entry = self.entries.remove(name)?;
        for id in &entry.mount_ids {
            self.by_mount_id.remove(id);
        }
        Some(entry)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
