//! Count tracker: snapshot plus overlay, with online rotation.
//!
//! Readers and writers share an immutable [`ActiveVersion`] published through
//! an `Arc` swap. A rotation first *cuts* the live overlay (sealing it and
//! installing a fresh one), then writes the merge of the snapshot and the
//! sealed generations to a new file, and finally publishes a version holding
//! the new snapshot and only the overlay generation opened by the cut. Readers
//! that captured an older version keep reading it; its snapshot file is
//! unlinked when the last such reader lets go.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::primitives::io::FileSystem;
use crate::types::{CountsError, Generation, Result, TxId};

use super::key::CountKey;
use super::metrics::{default_metrics, CountsMetrics};
use super::options::CountsOptions;
use super::overlay::{Overlay, OverlayView};
use super::register::{checked_sum, overflow};
use super::rotation::{PhaseCell, RotationOutcome, RotationPhase, RotationPolicy, RotationReport};
use super::store::{files, remove_quietly, validate_version_tag, SnapshotStore, WriteOptions};

/// Snapshot and overlays that together define the current counts.
struct ActiveVersion {
    store: Arc<SnapshotStore>,
    /// Generations cut by rotations that have not been merged yet, oldest first.
    sealed: Vec<Arc<Overlay>>,
    live: Arc<Overlay>,
}

impl ActiveVersion {
    fn overlays(&self) -> impl Iterator<Item = &Arc<Overlay>> + '_ {
        self.sealed.iter().chain(std::iter::once(&self.live))
    }
}

/// Durable running counts with concurrent reads, writes and rotation.
pub struct CountsTracker {
    fs: Arc<dyn FileSystem>,
    base: PathBuf,
    options: CountsOptions,
    metrics: Arc<dyn CountsMetrics>,
    active: RwLock<Option<Arc<ActiveVersion>>>,
    rotation: Mutex<()>,
    phase: PhaseCell,
}

impl std::fmt::Debug for CountsTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountsTracker")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl CountsTracker {
    /// Bootstraps an empty store (tx 0, generation 0) rooted at `path`.
    ///
    /// Fails with [`CountsError::AlreadyExists`] if any generation of the
    /// store is already present.
    pub fn create_empty_store(
        fs: &Arc<dyn FileSystem>,
        path: impl AsRef<Path>,
        version_tag: &str,
    ) -> Result<()> {
        let base = path.as_ref();
        validate_version_tag(version_tag)?;
        if !files::list_generations(fs.as_ref(), base)?.is_empty() {
            return Err(CountsError::AlreadyExists(base.to_path_buf()));
        }
        let dest = files::generation_path(base, Generation(0));
        match SnapshotStore::create_empty(fs, &dest, version_tag, WriteOptions::default()) {
            Ok(_) => {
                info!(path = %base.display(), version_tag, "counts.create_empty_store");
                Ok(())
            }
            Err(CountsError::Io(err)) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(CountsError::AlreadyExists(base.to_path_buf()))
            }
            Err(err) => Err(err),
        }
    }

    /// Opens the store rooted at `path` with default options.
    pub fn open(fs: Arc<dyn FileSystem>, path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(fs, path, CountsOptions::default())
    }

    /// Opens the newest valid generation of the store rooted at `path`.
    ///
    /// Generations newer than the one opened whose header does not validate
    /// are leftovers of an interrupted rotation and are removed, as are all
    /// older generations.
    pub fn open_with_options(
        fs: Arc<dyn FileSystem>,
        path: impl AsRef<Path>,
        options: CountsOptions,
    ) -> Result<Self> {
        validate_version_tag(&options.version_tag)?;
        let base = path.as_ref().to_path_buf();
        let store = recover(&fs, &base, &options)?;
        info!(
            path = %store.path().display(),
            tx_id = store.tx_id().0,
            generation = store.generation().0,
            entries = store.len(),
            "counts.open"
        );
        let metrics = options.metrics.clone().unwrap_or_else(default_metrics);
        let version = ActiveVersion {
            store: Arc::new(store),
            sealed: Vec::new(),
            live: Arc::new(Overlay::new()),
        };
        Ok(Self {
            fs,
            base,
            options,
            metrics,
            active: RwLock::new(Some(Arc::new(version))),
            rotation: Mutex::new(()),
            phase: PhaseCell::new(),
        })
    }

    fn current(&self) -> Result<Arc<ActiveVersion>> {
        self.active.read().as_ref().cloned().ok_or(CountsError::Closed)
    }

    /// Adds `delta` to the count for `key`.
    ///
    /// Fails with [`CountsError::CountOverflow`], leaving the count as it
    /// was, when the pending delta for `key` would leave the `i64` range.
    pub fn apply(&self, key: CountKey, delta: i64) -> Result<()> {
        {
            // Held across the add so a rotation cut cannot split it.
            let active = self.active.read();
            let version = active.as_ref().ok_or(CountsError::Closed)?;
            version.live.add(key, delta).ok_or_else(|| overflow(&key))?;
        }
        self.metrics.update_applied();
        Ok(())
    }

    /// Current count for `key`; 0 when never touched.
    ///
    /// A count outside the `i64` range is reported as
    /// [`CountsError::CountOverflow`].
    pub fn get(&self, key: &CountKey) -> Result<i64> {
        let version = self.current()?;
        let persisted = version.store.lookup(key)?.unwrap_or(0);
        let pending = version
            .overlays()
            .try_fold(0i64, |acc, overlay| checked_sum(key, acc, overlay.get(key)))?;
        let value = checked_sum(key, persisted, pending)?;
        self.metrics.count_read(pending != 0);
        if value < 0 {
            warn!(key = %key, value, "counts.get.negative");
            self.metrics.negative_count();
        }
        Ok(value)
    }

    /// Persists every delta applied so far into a new snapshot tagged `tx_id`.
    ///
    /// Reads and writes proceed while the snapshot is written. On failure
    /// the previous snapshot stays active and no delta is lost; the next
    /// rotation merges them.
    pub fn rotate(&self, tx_id: TxId) -> Result<RotationReport> {
        let _guard = self.lock_rotation()?;
        let started = Instant::now();
        let version = self.cut(tx_id)?;
        self.metrics.rotation_started();
        debug!(
            tx_id = tx_id.0,
            previous_tx_id = version.store.tx_id().0,
            sealed = version.sealed.len(),
            "counts.rotate.start"
        );
        match self.merge_and_publish(&version, tx_id, started) {
            Ok(report) => {
                self.phase.set(RotationPhase::Idle);
                self.metrics
                    .rotation_finished(RotationOutcome::Succeeded, report.entries_written);
                info!(
                    tx_id = report.tx_id.0,
                    generation = report.generation.0,
                    entries = report.entries_written,
                    overlay_keys = report.overlay_keys_merged,
                    elapsed_ms = report.elapsed_ms,
                    "counts.rotate.completed"
                );
                Ok(report)
            }
            Err(err) => {
                self.phase.set(RotationPhase::Failed);
                warn!(tx_id = tx_id.0, error = %err, "counts.rotate.failed");
                self.metrics.rotation_finished(RotationOutcome::Failed, 0);
                self.fold_sealed(&version);
                self.phase.set(RotationPhase::Idle);
                Err(err)
            }
        }
    }

    fn lock_rotation(&self) -> Result<MutexGuard<'_, ()>> {
        match self.options.rotation_policy {
            RotationPolicy::FailFast => self
                .rotation
                .try_lock()
                .ok_or(CountsError::RotationInProgress),
            RotationPolicy::Wait => Ok(self.rotation.lock()),
        }
    }

    /// Seals the live overlay and publishes a version with a fresh one.
    fn cut(&self, tx_id: TxId) -> Result<Arc<ActiveVersion>> {
        let mut active = self.active.write();
        let current = active.as_ref().ok_or(CountsError::Closed)?;
        let current_tx = current.store.tx_id();
        if tx_id <= current_tx {
            return Err(CountsError::NonMonotonicTxId {
                requested: tx_id,
                current: current_tx,
            });
        }
        let mut sealed = current.sealed.clone();
        sealed.push(Arc::clone(&current.live));
        let next = Arc::new(ActiveVersion {
            store: Arc::clone(&current.store),
            sealed,
            live: Arc::new(Overlay::new()),
        });
        *active = Some(Arc::clone(&next));
        Ok(next)
    }

    /// Collapses the generations left sealed by a failed rotation into one.
    fn fold_sealed(&self, version: &ActiveVersion) {
        if version.sealed.len() < 2 {
            return;
        }
        let Ok(view) = OverlayView::from_sealed(&version.sealed) else {
            return;
        };
        let folded = Arc::new(Overlay::from_view(&view));
        let mut active = self.active.write();
        let Some(current) = active.as_ref() else {
            return;
        };
        // Only a cut changes `sealed`, and cuts run under the rotation lock.
        let unchanged = current.sealed.len() == version.sealed.len()
            && current
                .sealed
                .iter()
                .zip(&version.sealed)
                .all(|(a, b)| Arc::ptr_eq(a, b));
        if !unchanged {
            return;
        }
        debug!(generations = version.sealed.len(), keys = view.len(), "counts.rotate.fold_sealed");
        let next = ActiveVersion {
            store: Arc::clone(&current.store),
            sealed: vec![folded],
            live: Arc::clone(&current.live),
        };
        *active = Some(Arc::new(next));
    }

    fn merge_and_publish(
        &self,
        version: &ActiveVersion,
        tx_id: TxId,
        started: Instant,
    ) -> Result<RotationReport> {
        self.phase.set(RotationPhase::Merging);
        let view = OverlayView::from_sealed(&version.sealed)?;
        let generation = version.store.generation().next();
        let dest = files::generation_path(&self.base, generation);
        if self.fs.exists(&dest) {
            warn!(path = %dest.display(), "counts.rotate.stale_destination");
            self.fs.remove_file(&dest)?;
        }
        SnapshotStore::write_merged_file(
            self.fs.as_ref(),
            &dest,
            &version.store,
            &view,
            tx_id,
            generation,
            self.options.write_options(),
        )?;

        self.phase.set(RotationPhase::Validating);
        let store = Arc::new(SnapshotStore::open_validated(
            &self.fs,
            &dest,
            version.store.version_tag(),
        )?);
        if let Some(hook) = &self.options.rotation_hook {
            hook.after_validation(tx_id, &dest);
        }

        self.phase.set(RotationPhase::Swapping);
        let previous = {
            let mut active = self.active.write();
            let current = active.as_ref().ok_or(CountsError::Closed)?;
            let sealed = current
                .sealed
                .iter()
                .filter(|g| !version.sealed.iter().any(|merged| Arc::ptr_eq(g, merged)))
                .cloned()
                .collect();
            let next = ActiveVersion {
                store: Arc::clone(&store),
                sealed,
                live: Arc::clone(&current.live),
            };
            let previous = Arc::clone(&current.store);
            *active = Some(Arc::new(next));
            previous
        };
        previous.retire();

        Ok(RotationReport {
            previous_tx_id: previous.tx_id(),
            tx_id,
            generation,
            path: dest,
            entries_written: store.len(),
            overlay_keys_merged: view.len(),
            generations_merged: version.sealed.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Releases the active version. Further calls fail with
    /// [`CountsError::Closed`]; closing twice is a no-op.
    ///
    /// Deltas not yet rotated are discarded.
    pub fn close(&self) {
        let previous = self.active.write().take();
        if let Some(version) = previous {
            let pending: usize = version.overlays().map(|overlay| overlay.len()).sum();
            info!(
                tx_id = version.store.tx_id().0,
                pending_keys = pending,
                "counts.close"
            );
        }
    }

    /// Whether [`CountsTracker::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.active.read().is_none()
    }

    /// Transaction id of the active snapshot.
    pub fn tx_id(&self) -> Result<TxId> {
        Ok(self.current()?.store.tx_id())
    }

    /// Generation of the active snapshot.
    pub fn generation(&self) -> Result<Generation> {
        Ok(self.current()?.store.generation())
    }

    /// File of the active snapshot.
    pub fn store_path(&self) -> Result<PathBuf> {
        Ok(self.current()?.store.path().to_path_buf())
    }

    /// Distinct keys with pending, unrotated deltas.
    pub fn pending_keys(&self) -> Result<usize> {
        let version = self.current()?;
        let view = OverlayView::from_sealed(&version.overlays().cloned().collect::<Vec<_>>())?;
        Ok(view.len())
    }

    /// Current phase of the rotation coordinator.
    pub fn rotation_phase(&self) -> RotationPhase {
        self.phase.get()
    }

    /// Base path the store generations are named after.
    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// Options the tracker was opened with.
    pub fn options(&self) -> &CountsOptions {
        &self.options
    }
}

impl Drop for CountsTracker {
    fn drop(&mut self) {
        if self.active.get_mut().is_some() {
            debug!(path = %self.base.display(), "counts.drop_without_close");
        }
    }
}

/// Picks the generation to open and clears out the others.
fn recover(fs: &Arc<dyn FileSystem>, base: &Path, options: &CountsOptions) -> Result<SnapshotStore> {
    let selection = files::select_current(fs.as_ref(), base)?;
    selection
        .header
        .check_compatible(&selection.path, &options.version_tag)?;
    let store = SnapshotStore::open_with(
        fs,
        &selection.path,
        &options.version_tag,
        options.verify_on_open,
    )?;
    for path in &selection.torn {
        info!(path = %path.display(), "counts.open.remove_torn");
        remove_quietly(fs.as_ref(), path);
    }
    for (generation, path) in &selection.candidates {
        if *generation < selection.generation {
            debug!(path = %path.display(), "counts.open.remove_superseded");
            remove_quietly(fs.as_ref(), path);
        }
    }
    Ok(store)
}
