//! Volume driver: the entry point for every plugin request.
//!
//! The driver resolves a request's volume to a fully-qualified name and a
//! backend, keeps the per-volume reference count, and only asks a backend to
//! mount on the first reference and to unmount on the last.

pub mod mounted;

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use volplug_shared::constants::{create_options, metadata};
use volplug_shared::errors::{VolplugError, VolplugResult};
use volplug_shared::protocol::{
    Capabilities, CreateRequest, MountRequest, UnmountOutcome, UnmountRequest, Volume,
};

use crate::backend::{BackendKind, BackendRegistry, VolumeBackend};
use crate::config::Config;
use crate::identity;
use crate::mount_table::MountTable;
use crate::refcount::{RecoveryReport, RefCounts};

use self::mounted::MountedVolumes;

pub struct VolumeDriver {
    config: Arc<Config>,
    registry: BackendRegistry,
    refcounts: Arc<RefCounts>,
    mounted: Mutex<MountedVolumes>,
}

impl VolumeDriver {
    /// Build a driver over `registry`. The block backend must be registered;
    /// it serves every volume no other rule claims.
    pub fn new(config: Config, registry: BackendRegistry) -> VolplugResult<Self> {
        config.validate()?;
        registry.require(BackendKind::Block)?;

        tracing::info!(
            driver = %config.driver,
            backends = ?registry.kinds(),
            mount_root = %config.mount_root.display(),
            "Volume driver created"
        );

        Ok(Self {
            config: Arc::new(config),
            registry,
            refcounts: Arc::new(RefCounts::new()),
            mounted: Mutex::new(MountedVolumes::new()),
        })
    }

    /// Replace the reference count store, e.g. to change the retry interval.
    pub fn with_refcounts(mut self, refcounts: Arc<RefCounts>) -> Self {
        self.refcounts = refcounts;
        self
    }

    /// Start rebuilding reference counts from `table` in the background.
    pub fn start_recovery(&self, table: Arc<dyn MountTable>) -> JoinHandle<RecoveryReport> {
        self.refcounts.init(
            table,
            self.config.mount_root.clone(),
            self.config.driver.clone(),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn refcounts(&self) -> &Arc<RefCounts> {
        &self.refcounts
    }

    // ========================================================================
    // Read-only operations
    // ========================================================================

    pub async fn get(&self, name: &str) -> VolplugResult<Volume> {
        let name = self.resolve_full_name(name).await?;
        let (_, backend) = self.resolve_backend(&name, None)?;
        let status = backend.get(&name).await?;
        let mountpoint = if backend.is_mounted(&name) {
            backend.mount_point(&name)
        } else {
            PathBuf::new()
        };

        Ok(Volume {
            name,
            mountpoint,
            status,
        })
    }

    /// Volumes of every backend, in registration order.
    pub async fn list(&self) -> VolplugResult<Vec<Volume>> {
        let lists = try_join_all(self.registry.iter().map(|(_, backend)| backend.list())).await?;
        Ok(lists.into_iter().flatten().collect())
    }

    pub async fn path(&self, name: &str) -> VolplugResult<PathBuf> {
        let name = self.resolve_full_name(name).await?;
        let (_, backend) = self.resolve_backend(&name, None)?;
        backend.path(&name).await
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::global()
    }

    /// Current reference count of `name` (zero if unknown).
    pub fn refcount(&self, name: &str) -> u32 {
        self.refcounts.get_count(name)
    }

    /// Volumes with a non-zero reference count, sorted.
    pub fn volumes_in_refmap(&self) -> Vec<String> {
        self.refcounts.volumes()
    }

    // ========================================================================
    // Create / Remove
    // ========================================================================

    pub async fn create(&self, req: &CreateRequest) -> VolplugResult<()> {
        let explicit = req
            .opt(create_options::TYPE)
            .map(str::parse::<BackendKind>)
            .transpose()?;
        let label = identity::datastore_label(&req.name).or(req.opt(create_options::DATASTORE));
        let (kind, backend) = self.dispatch(&req.name, explicit, label)?;

        let mut req = req.clone();
        if kind == BackendKind::Network && label.is_none() {
            let default = self.config.default_label().ok_or_else(|| {
                VolplugError::Config(format!(
                    "volume {} has no datastore label and no default remote dir is configured",
                    req.name
                ))
            })?;
            req.name = identity::full_name(&req.name, default);
        }

        tracing::info!(volume = %req.name, backend = %kind, "Creating volume");
        backend.create(&req).await
    }

    /// Remove a volume. Refused while any container holds a reference.
    pub async fn remove(&self, name: &str) -> VolplugResult<()> {
        let full = self.resolve_full_name(name).await?;
        let refcount = self
            .snapshot_refcount(name)
            .max(self.refcounts.get_count(&full));
        if refcount != 0 {
            tracing::error!(volume = %full, refcount, "Remove refused, volume is still in use");
            return Err(VolplugError::VolumeStillInUse {
                name: name.to_string(),
                refcount,
            });
        }

        let (kind, backend) = self.resolve_backend(&full, None)?;
        tracing::info!(volume = %full, backend = %kind, "Removing volume");
        backend.remove(&full).await
    }

    // ========================================================================
    // Mount / Unmount
    // ========================================================================

    /// Mount a volume for one container.
    ///
    /// Only the first reference reaches the backend; later ones get the
    /// existing mount point. A failed backend mount leaves no reference behind.
    pub async fn mount(&self, req: &MountRequest) -> VolplugResult<PathBuf> {
        let mut state = self.refcounts.lock_state().await;
        state.mark_dirty();

        let name = self.resolve_full_name(&req.name).await?;
        let (kind, backend) = self.resolve_backend(&name, None)?;
        self.mounted.lock().record(&name, kind);

        let mut refcount = state.incr(&name);
        tracing::debug!(volume = %name, refcount, "Mount requested");

        let already_mounted = backend.is_mounted(&name);
        if refcount == 1 && already_mounted && !state.init_succeeded() {
            // Mounted before the restart and not yet recovered: the earlier
            // holder keeps its reference, recovery will not seed it again.
            refcount = state.incr(&name);
            tracing::info!(
                volume = %name,
                refcount,
                "Counting reference inherited from before restart"
            );
        }

        if refcount > 1 || already_mounted {
            tracing::info!(
                volume = %name,
                refcount,
                "Volume already mounted, skipping physical mount"
            );
            self.mounted.lock().add_mount_id(&name, &req.id);
            return Ok(backend.mount_point(&name));
        }

        let resolved = MountRequest::new(name.clone(), req.id.clone());
        match backend.mount(&resolved).await {
            Ok(mountpoint) => {
                tracing::info!(
                    volume = %name,
                    backend = %kind,
                    mountpoint = %mountpoint.display(),
                    "Volume mounted"
                );
                self.mounted.lock().add_mount_id(&name, &req.id);
                Ok(mountpoint)
            }
            Err(e) => {
                if let Err(underflow) = state.decr(&name) {
                    tracing::warn!(volume = %name, error = %underflow, "Rollback after failed mount");
                }
                state.clear_dirty();
                self.mounted.lock().remove(&name);
                tracing::error!(volume = %name, error = %e, "Failed to mount volume");
                Err(e)
            }
        }
    }

    /// Release one container's reference.
    ///
    /// The backend unmount only happens when the count reaches zero. While
    /// startup recovery is still pending nothing is released.
    pub async fn unmount(&self, req: &UnmountRequest) -> VolplugResult<UnmountOutcome> {
        let mut state = self.refcounts.lock_state().await;

        if !state.init_succeeded() {
            state.mark_dirty();
            tracing::warn!(
                volume = %req.name,
                "Refcount recovery pending, deferring unmount"
            );
            return Ok(UnmountOutcome::RecoveryPending);
        }
        state.mark_dirty();

        let tracked = self.mounted.lock().take_mount_id(&req.id);
        let name = match tracked {
            Some(name) if identity::split_name(&name).0 == identity::split_name(&req.name).0 => {
                name
            }
            _ => self.resolve_full_name(&req.name).await?,
        };
        let (kind, backend) = self.resolve_backend(&name, None)?;

        let refcount = match state.decr(&name) {
            Ok(refcount) => refcount,
            Err(e) => {
                tracing::error!(volume = %name, error = %e, "Refcount error, still trying to unmount");
                0
            }
        };

        if refcount >= 1 {
            tracing::info!(volume = %name, refcount, "Volume still referenced, skipping unmount");
            return Ok(UnmountOutcome::StillReferenced { refcount });
        }

        backend.unmount(&name).await.inspect_err(|e| {
            tracing::error!(volume = %name, backend = %kind, error = %e, "Failed to unmount volume");
        })?;
        self.mounted.lock().remove(&name);
        tracing::info!(volume = %name, backend = %kind, "Volume unmounted");

        Ok(UnmountOutcome::Detached)
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Backend owning `name`, by tracking table, then label, then default.
    pub fn resolve_backend(
        &self,
        name: &str,
        explicit: Option<BackendKind>,
    ) -> VolplugResult<(BackendKind, Arc<dyn VolumeBackend>)> {
        self.dispatch(name, explicit, identity::datastore_label(name))
    }

    fn dispatch(
        &self,
        name: &str,
        explicit: Option<BackendKind>,
        label: Option<&str>,
    ) -> VolplugResult<(BackendKind, Arc<dyn VolumeBackend>)> {
        let tracked = self.mounted.lock().kind(name);
        let kind = match (tracked, explicit) {
            (Some(kind), _) | (None, Some(kind)) => kind,
            (None, None) => self.kind_for_label(label)?,
        };

        let backend = self.registry.require(kind)?;
        Ok((kind, Arc::clone(backend)))
    }

    fn kind_for_label(&self, label: Option<&str>) -> VolplugResult<BackendKind> {
        let Some(label) = label else {
            return Ok(BackendKind::Block);
        };

        if let Some(dir) = self.config.remote_dir(label) {
            return dir.kind();
        }

        let probed = self
            .registry
            .iter()
            .filter(|(kind, _)| *kind != BackendKind::Block)
            .find(|(_, backend)| backend.is_known_datastore_label(label))
            .map(|(kind, _)| kind);

        Ok(probed.unwrap_or(BackendKind::Block))
    }

    /// Fully-qualified name for a possibly bare `name`.
    ///
    /// A bare name matching exactly one listed volume resolves to it; more
    /// than one is ambiguous. Otherwise the owning backend's metadata names
    /// the datastore, and failing that the bare name is used as is.
    async fn resolve_full_name(&self, name: &str) -> VolplugResult<String> {
        if identity::is_fully_qualified(name) {
            return Ok(name.to_string());
        }

        let volumes = self.list().await?;
        if let Some(full) = identity::disambiguate(name, volumes.iter().map(|v| v.name.as_str()))? {
            return Ok(full);
        }

        let (_, backend) = self.resolve_backend(name, None)?;
        match backend.get(name).await {
            Ok(status) => Ok(status
                .get(metadata::DATASTORE)
                .and_then(|label| label.as_str())
                .filter(|label| !label.is_empty())
                .map(|label| identity::full_name(name, label))
                .unwrap_or_else(|| name.to_string())),
            Err(e) => {
                tracing::debug!(volume = %name, error = %e, "No datastore metadata, using bare name");
                Ok(name.to_string())
            }
        }
    }

    /// Highest snapshot count among the names `name` can refer to.
    fn snapshot_refcount(&self, name: &str) -> u32 {
        let direct = self.refcounts.get_count(name);
        if identity::is_fully_qualified(name) {
            return direct;
        }

        self.refcounts
            .volumes()
            .iter()
            .filter(|full| identity::split_name(full).0 == name)
            .map(|full| self.refcounts.get_count(full))
            .fold(direct, u32::max)
    }
}

impl std::fmt::Debug for VolumeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDriver")
            .field("driver", &self.config.driver)
            .field("registry", &self.registry)
            .field("mounted", &self.mounted.lock().names())
            .finish()
    }
}

// Compile-time assertion: handlers share the driver across tasks.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<VolumeDriver>();
};
