//! Backends available to the driver, built once at startup.

use std::sync::Arc;

use volplug_shared::errors::{VolplugError, VolplugResult};

use super::{BackendKind, VolumeBackend};

/// Immutable set of backends, one per kind, in registration order.
///
/// Registration order matters: `list` concatenates backends in this order
/// and label probing tries non-default backends in this order.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<(BackendKind, Arc<dyn VolumeBackend>)>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` for `kind`. Registering a kind twice replaces the
    /// earlier backend in place.
    pub fn with_backend(mut self, kind: BackendKind, backend: Arc<dyn VolumeBackend>) -> Self {
        match self.backends.iter_mut().find(|(k, _)| *k == kind) {
            Some(entry) => entry.1 = backend,
            None => self.backends.push((kind, backend)),
        }
        self
    }

    pub fn get(&self, kind: BackendKind) -> Option<&Arc<dyn VolumeBackend>> {
        self.backends
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, backend)| backend)
    }

    /// Like [`get`](Self::get), but a missing backend is a configuration error.
    pub fn require(&self, kind: BackendKind) -> VolplugResult<&Arc<dyn VolumeBackend>> {
        self.get(kind).ok_or_else(|| {
            VolplugError::Config(format!(
                "backend {} is not registered. Available backends: {:?}",
                kind,
                self.kinds()
            ))
        })
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|(kind, _)| *kind).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BackendKind, &Arc<dyn VolumeBackend>)> {
        self.backends.iter().map(|(kind, backend)| (*kind, backend))
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
