//! Per-volume reference counts with restart recovery.
//!
//! A count is the number of containers currently using a volume. Counts live
//! only in memory, so after a restart they are rebuilt from the host mount
//! table by a background task. Until that first pass succeeds, unmounts are
//! deferred rather than risk detaching a volume a container still uses.
//!
//! Mutations go through a [`StateGuard`], which holds the state lock for as
//! long as the caller needs it (mount and unmount keep it across the backend
//! call). Plain reads take a snapshot and never wait on that lock.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use volplug_shared::errors::{VolplugError, VolplugResult};

use crate::mount_table::MountTable;

/// Delay between failed or non-converged recovery passes.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct RefCountState {
    counts: HashMap<String, u32>,
    init_succeeded: bool,
    dirty: bool,
    /// Bumped by every mutation; a recovery pass converged if it is unchanged.
    epoch: u64,
    /// Names mutated while a recovery pass is in flight.
    touched: Option<HashSet<String>>,
}

impl RefCountState {
    fn touch(&mut self, name: &str) {
        self.epoch += 1;
        if let Some(touched) = self.touched.as_mut() {
            touched.insert(name.to_string());
        }
    }
}

/// Summary of a completed recovery.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Passes run, including failed and corrective ones.
    pub passes: u32,
    /// Passes that failed to read the mount table.
    pub failures: u32,
    /// Volumes seeded with a count of one, sorted.
    pub recovered: Vec<String>,
}

struct PassOutcome {
    recovered: Vec<String>,
    converged: bool,
}

pub struct RefCounts {
    state_lock: tokio::sync::Mutex<()>,
    state: Mutex<RefCountState>,
    retry_interval: Duration,
}

impl Default for RefCounts {
    fn default() -> Self {
        Self::new()
    }
}

impl RefCounts {
    pub fn new() -> Self {
        Self::with_retry_interval(DEFAULT_RETRY_INTERVAL)
    }

    pub fn with_retry_interval(retry_interval: Duration) -> Self {
        Self {
            state_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(RefCountState::default()),
            retry_interval,
        }
    }

    /// Take the state lock. It is released when the guard drops.
    pub async fn lock_state(&self) -> StateGuard<'_> {
        StateGuard {
            _lock: self.state_lock.lock().await,
            state: &self.state,
        }
    }

    /// Snapshot count for `name`; absent volumes count zero.
    pub fn get_count(&self, name: &str) -> u32 {
        self.state.lock().counts.get(name).copied().unwrap_or(0)
    }

    pub fn init_succeeded(&self) -> bool {
        self.state.lock().init_succeeded
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Volumes with a non-zero count, sorted.
    pub fn volumes(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Spawn the recovery task.
    ///
    /// The task reads the mount table for volumes mounted under `mount_root`
    /// and seeds each one whose count is still zero with one. Read failures
    /// are retried every retry interval until a pass succeeds. A pass that
    /// raced with a mount or unmount is followed by a corrective pass. The
    /// handle resolves once a pass completes with no concurrent mutation.
    pub fn init(
        self: &Arc<Self>,
        table: Arc<dyn MountTable>,
        mount_root: PathBuf,
        driver: impl Into<String>,
    ) -> JoinHandle<RecoveryReport> {
        let refcounts = Arc::clone(self);
        let driver = driver.into();

        tokio::spawn(async move {
            let mut report = RecoveryReport::default();

            loop {
                report.passes += 1;
                match refcounts.recover_once(&table, &mount_root).await {
                    Ok(pass) => {
                        report.recovered.extend(pass.recovered);
                        if pass.converged {
                            report.recovered.sort();
                            report.recovered.dedup();
                            tracing::info!(
                                driver = %driver,
                                passes = report.passes,
                                recovered = ?report.recovered,
                                "Refcount recovery complete"
                            );
                            return report;
                        }
                        tracing::debug!(
                            driver = %driver,
                            "Volume state changed during recovery, scheduling corrective pass"
                        );
                    }
                    Err(e) => {
                        report.failures += 1;
                        tracing::warn!(
                            driver = %driver,
                            mount_root = %mount_root.display(),
                            error = %e,
                            "Refcount recovery failed, unmounts are deferred until it succeeds"
                        );
                    }
                }

                tokio::time::sleep(refcounts.retry_interval).await;
            }
        })
    }

    async fn recover_once(
        &self,
        table: &Arc<dyn MountTable>,
        mount_root: &Path,
    ) -> VolplugResult<PassOutcome> {
        let epoch = self.lock_state().await.begin_recovery();

        // Read without holding the state lock; mounts and unmounts proceed.
        let reader = Arc::clone(table);
        let root = mount_root.to_path_buf();
        let mounted = tokio::task::spawn_blocking(move || reader.mounted_volumes(&root))
            .await
            .map_err(|e| VolplugError::Internal(format!("mount table reader failed: {}", e)))
            .and_then(|result| result);

        let guard = self.lock_state().await;
        match mounted {
            Ok(mounted) => Ok(guard.finish_recovery(mounted.into_keys(), epoch)),
            Err(e) => {
                guard.abort_recovery();
                Err(e)
            }
        }
    }
}

/// Exclusive access to the counts and recovery flags.
pub struct StateGuard<'a> {
    _lock: tokio::sync::MutexGuard<'a, ()>,
    state: &'a Mutex<RefCountState>,
}

impl StateGuard<'_> {
    pub fn get_count(&self, name: &str) -> u32 {
        self.state.lock().counts.get(name).copied().unwrap_or(0)
    }

    /// Increment and return the new count.
    pub fn incr(&mut self, name: &str) -> u32 {
        let mut state = self.state.lock();
        state.touch(name);
        let count = state.counts.entry(name.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement and return the new count. Zero counts are left untouched
    /// and reported as `Underflow`.
    pub fn decr(&mut self, name: &str) -> VolplugResult<u32> {
        let mut state = self.state.lock();
        state.touch(name);
        let remaining = match state.counts.get_mut(name) {
            Some(count) if *count > 0 => {
                *count -= 1;
                *count
            }
            _ => return Err(VolplugError::Underflow(name.to_string())),
        };
        if remaining == 0 {
            state.counts.remove(name);
        }
        Ok(remaining)
    }

    pub fn mark_dirty(&mut self) {
        let mut state = self.state.lock();
        state.dirty = true;
        state.epoch += 1;
    }

    pub fn clear_dirty(&mut self) {
        self.state.lock().dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    pub fn init_succeeded(&self) -> bool {
        self.state.lock().init_succeeded
    }

    fn begin_recovery(&self) -> u64 {
        let mut state = self.state.lock();
        state.touched = Some(HashSet::new());
        state.epoch
    }

    fn abort_recovery(&self) {
        self.state.lock().touched = None;
    }

    fn finish_recovery(
        &self,
        mounted: impl IntoIterator<Item = String>,
        epoch: u64,
    ) -> PassOutcome {
        let mut state = self.state.lock();
        let touched = state.touched.take().unwrap_or_default();

        let mut recovered = Vec::new();
        for name in mounted {
            if touched.contains(&name) {
                continue;
            }
            let count = state.counts.entry(name.clone()).or_insert(0);
            if *count == 0 {
                *count = 1;
                recovered.push(name);
            }
        }
        recovered.sort();

        state.init_succeeded = true;
        let converged = state.epoch == epoch;
        if converged {
            state.dirty = false;
        }

        PassOutcome {
            recovered,
            converged,
        }
    }
}
