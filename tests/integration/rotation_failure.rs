#![allow(missing_docs)]

mod common;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sombra_counts::counts::store::{HEADER_LEN, STORE_MAGIC};
use sombra_counts::counts::{
    CountKey, CountsOptions, CountsTracker, RotationHook, RotationPhase, SnapshotStore,
    WriteOptions, DEFAULT_VERSION_TAG,
};
use sombra_counts::primitives::io::{FileIo, FileSystem, OsFileSystem};
use sombra_counts::types::{CountsError, Generation, LabelId, Result, TxId, TypeId};
use tempfile::tempdir;

use common::{assert_counts, base_graph, bootstrap, fast_options, open, os_fs};

#[derive(Default)]
struct Faults {
    create: AtomicBool,
    header_write: AtomicBool,
    sync: AtomicBool,
}

/// OS file system whose calls can be made to fail on demand.
struct FaultyFs {
    inner: OsFileSystem,
    faults: Arc<Faults>,
}

struct FaultyIo {
    inner: Arc<dyn FileIo>,
    faults: Arc<Faults>,
}

fn injected(what: &str) -> CountsError {
    CountsError::Io(io::Error::other(format!("injected {what} failure")))
}

impl FileIo for FaultyIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.inner.read_at(off, dst)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        // The placeholder header is all zeros; only the final one carries the magic.
        if off == 0
            && src.starts_with(&STORE_MAGIC)
            && self.faults.header_write.load(Ordering::SeqCst)
        {
            return Err(injected("header write"));
        }
        self.inner.write_at(off, src)
    }

    fn sync_all(&self) -> Result<()> {
        if self.faults.sync.load(Ordering::SeqCst) {
            return Err(injected("sync"));
        }
        self.inner.sync_all()
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }
}

impl FileSystem for FaultyFs {
    fn create_new(&self, path: &Path) -> Result<Arc<dyn FileIo>> {
        if self.faults.create.load(Ordering::SeqCst) {
            return Err(injected("create"));
        }
        Ok(Arc::new(FaultyIo {
            inner: self.inner.create_new(path)?,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn open_read(&self, path: &Path) -> Result<Arc<dyn FileIo>> {
        self.inner.open_read(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.inner.remove_file(path)
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.inner.list_dir(dir)
    }

    fn sync_dir(&self, dir: &Path) -> Result<()> {
        self.inner.sync_dir(dir)
    }
}

fn faulty_tracker(base: &Path) -> (Arc<Faults>, CountsTracker) {
    let faults = Arc::new(Faults::default());
    let fs: Arc<dyn FileSystem> = Arc::new(FaultyFs {
        inner: OsFileSystem,
        faults: Arc::clone(&faults),
    });
    let tracker = CountsTracker::open_with_options(fs, base, CountsOptions::new()).unwrap();
    (faults, tracker)
}

fn gen_file(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("counts.db.{generation}"))
}

fn assert_failed_rotation_is_harmless(dir: &Path, tracker: &CountsTracker, flag: &AtomicBool) {
    let expected = base_graph().expected();
    base_graph().apply_to(tracker);

    flag.store(true, Ordering::SeqCst);
    let err = tracker.rotate(TxId(1)).unwrap_err();
    assert!(matches!(err, CountsError::Io(_)), "unexpected error: {err}");
    assert_eq!(tracker.tx_id().unwrap(), TxId(0));
    assert_eq!(tracker.generation().unwrap(), Generation(0));
    assert_eq!(tracker.rotation_phase(), RotationPhase::Idle);
    assert!(!gen_file(dir, 1).exists());
    assert!(gen_file(dir, 0).exists());
    assert_counts(tracker, &expected);
    assert_eq!(tracker.pending_keys().unwrap(), expected.len());

    flag.store(false, Ordering::SeqCst);
    let report = tracker.rotate(TxId(1)).unwrap();
    assert_eq!(report.generation, Generation(1));
    assert_eq!(report.generations_merged, 2);
    assert_eq!(tracker.pending_keys().unwrap(), 0);
    assert_counts(tracker, &expected);
    tracker.close();

    assert_counts(&open(&dir.join("counts.db")), &expected);
}

#[test]
fn failed_create_keeps_previous_snapshot() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let (faults, tracker) = faulty_tracker(&base);
    assert_failed_rotation_is_harmless(dir.path(), &tracker, &faults.create);
}

#[test]
fn failed_header_write_removes_partial_file() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let (faults, tracker) = faulty_tracker(&base);
    assert_failed_rotation_is_harmless(dir.path(), &tracker, &faults.header_write);
}

#[test]
fn failed_sync_keeps_previous_snapshot() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let (faults, tracker) = faulty_tracker(&base);
    assert_failed_rotation_is_harmless(dir.path(), &tracker, &faults.sync);
}

#[test]
fn deltas_applied_after_failure_are_merged_by_retry() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let (faults, tracker) = faulty_tracker(&base);
    let key = CountKey::node_label(LabelId(1));

    tracker.apply(key, 4).unwrap();
    faults.create.store(true, Ordering::SeqCst);
    assert!(tracker.rotate(TxId(1)).is_err());
    tracker.apply(key, 3).unwrap();
    assert!(tracker.rotate(TxId(2)).is_err());
    tracker.apply(key, -1).unwrap();
    faults.create.store(false, Ordering::SeqCst);

    let report = tracker.rotate(TxId(3)).unwrap();
    assert_eq!(report.previous_tx_id, TxId(0));
    // the two failed attempts were folded into one generation
    assert_eq!(report.generations_merged, 2);
    assert_eq!(report.entries_written, 1);
    assert_eq!(tracker.get(&key).unwrap(), 6);
}

#[test]
fn open_discards_torn_newer_generation() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let expected = base_graph().expected();
    {
        let tracker = open(&base);
        base_graph().apply_to(&tracker);
        tracker.rotate(TxId(1)).unwrap();
    }
    let mut torn = vec![0u8; HEADER_LEN];
    torn.extend_from_slice(&[0x5a; 48]);
    fs::write(gen_file(dir.path(), 2), &torn).unwrap();

    let tracker = open(&base);
    assert_eq!(tracker.tx_id().unwrap(), TxId(1));
    assert_eq!(tracker.generation().unwrap(), Generation(1));
    assert!(!gen_file(dir.path(), 2).exists());
    assert_counts(&tracker, &expected);
}

#[test]
fn open_discards_garbage_and_short_files() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    fs::write(gen_file(dir.path(), 1), [0xab; 300]).unwrap();
    fs::write(gen_file(dir.path(), 2), b"SBCOUNTS").unwrap();

    let tracker = open(&base);
    assert_eq!(tracker.generation().unwrap(), Generation(0));
    assert!(!gen_file(dir.path(), 1).exists());
    assert!(!gen_file(dir.path(), 2).exists());
    assert!(gen_file(dir.path(), 0).exists());
}

#[test]
fn zero_padded_neighbours_are_not_generations() {
    let dir = tempdir().unwrap();
    let stray = dir.path().join("counts.db.01");
    fs::write(&stray, b"junk").unwrap();
    let base = bootstrap(dir.path());
    {
        let tracker = open(&base);
        tracker.apply(CountKey::all_nodes(), 3).unwrap();
        tracker.rotate(TxId(1)).unwrap();
    }

    let tracker = open(&base);
    assert_eq!(tracker.generation().unwrap(), Generation(1));
    assert_eq!(tracker.get(&CountKey::all_nodes()).unwrap(), 3);
    assert_eq!(fs::read(&stray).unwrap(), b"junk");
}

#[test]
fn open_treats_misnamed_copy_as_torn() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    {
        let tracker = open(&base);
        tracker.apply(CountKey::all_nodes(), 2).unwrap();
        tracker.rotate(TxId(1)).unwrap();
    }
    fs::copy(gen_file(dir.path(), 1), gen_file(dir.path(), 5)).unwrap();

    let tracker = open(&base);
    assert_eq!(tracker.generation().unwrap(), Generation(1));
    assert!(!gen_file(dir.path(), 5).exists());
    assert_eq!(tracker.get(&CountKey::all_nodes()).unwrap(), 2);
}

#[test]
fn open_removes_superseded_generations() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    {
        let tracker = open(&base);
        tracker.apply(CountKey::relationship_type(TypeId(1)), 1).unwrap();
        tracker.rotate(TxId(4)).unwrap();
    }
    assert!(!gen_file(dir.path(), 0).exists());
    SnapshotStore::create_empty(
        &os_fs(),
        &gen_file(dir.path(), 0),
        DEFAULT_VERSION_TAG,
        WriteOptions { sync: false },
    )
    .unwrap();

    let tracker = open(&base);
    assert_eq!(tracker.tx_id().unwrap(), TxId(4));
    assert!(!gen_file(dir.path(), 0).exists());
    assert!(gen_file(dir.path(), 1).exists());
}

#[test]
fn version_mismatch_is_fatal_and_keeps_files() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("counts.db");
    CountsTracker::create_empty_store(&os_fs(), &base, "OtherEngine v9").unwrap();

    match CountsTracker::open_with_options(os_fs(), &base, fast_options()) {
        Err(CountsError::VersionMismatch {
            expected, found, ..
        }) => {
            assert_eq!(expected, DEFAULT_VERSION_TAG);
            assert_eq!(found, "OtherEngine v9");
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(gen_file(dir.path(), 0).exists());

    let tracker = CountsTracker::open_with_options(
        os_fs(),
        &base,
        fast_options().version_tag("OtherEngine v9"),
    )
    .unwrap();
    assert_eq!(tracker.tx_id().unwrap(), TxId(0));
}

#[test]
fn all_generations_corrupt_is_reported() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let path = gen_file(dir.path(), 0);
    let mut bytes = fs::read(&path).unwrap();
    bytes[..HEADER_LEN].fill(0);
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        CountsTracker::open(os_fs(), &base),
        Err(CountsError::CorruptHeader { .. })
    ));
    assert!(path.exists());
}

#[test]
fn body_corruption_is_detected_on_open() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    {
        let tracker = open(&base);
        base_graph().apply_to(&tracker);
        tracker.rotate(TxId(1)).unwrap();
    }
    let path = gen_file(dir.path(), 1);
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        CountsTracker::open(os_fs(), &base),
        Err(CountsError::Corruption { .. })
    ));
    assert!(path.exists());

    let tracker =
        CountsTracker::open_with_options(os_fs(), &base, fast_options().verify_on_open(false))
            .unwrap();
    assert_eq!(tracker.tx_id().unwrap(), TxId(1));
}

#[test]
fn truncated_body_is_detected_even_without_scan() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    {
        let tracker = open(&base);
        base_graph().apply_to(&tracker);
        tracker.rotate(TxId(1)).unwrap();
    }
    let path = gen_file(dir.path(), 1);
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

    assert!(matches!(
        CountsTracker::open_with_options(os_fs(), &base, fast_options().verify_on_open(false)),
        Err(CountsError::Corruption { .. })
    ));
}

#[test]
fn stale_rotation_destination_is_replaced() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let tracker = open(&base);
    fs::write(gen_file(dir.path(), 1), [0u8; 64]).unwrap();

    tracker.apply(CountKey::node_label(LabelId(9)), 1).unwrap();
    let report = tracker.rotate(TxId(1)).unwrap();
    assert_eq!(report.path, gen_file(dir.path(), 1));
    assert_eq!(tracker.get(&CountKey::node_label(LabelId(9))).unwrap(), 1);
    tracker.close();

    let reopened = open(&base);
    assert_eq!(reopened.tx_id().unwrap(), TxId(1));
}

#[test]
fn missing_directory_reports_missing_store() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("absent").join("counts.db");
    assert!(matches!(
        CountsTracker::open(os_fs(), &base),
        Err(CountsError::MissingStore(_))
    ));
}

#[test]
fn bootstrap_refuses_existing_generations() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    {
        let tracker = open(&base);
        tracker.rotate(TxId(1)).unwrap();
    }
    assert!(matches!(
        CountsTracker::create_empty_store(&os_fs(), &base, DEFAULT_VERSION_TAG),
        Err(CountsError::AlreadyExists(_))
    ));
}

#[test]
fn close_during_rotation_fails_the_rotation() {
    struct CloseHook(std::sync::Mutex<Option<Arc<CountsTracker>>>);
    impl RotationHook for CloseHook {
        fn after_validation(&self, _tx_id: TxId, _path: &Path) {
            if let Some(tracker) = self.0.lock().unwrap().take() {
                tracker.close();
            }
        }
    }

    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let hook = Arc::new(CloseHook(std::sync::Mutex::new(None)));
    let tracker = Arc::new(
        CountsTracker::open_with_options(os_fs(), &base, fast_options().rotation_hook(hook.clone()))
            .unwrap(),
    );
    *hook.0.lock().unwrap() = Some(Arc::clone(&tracker));

    tracker.apply(CountKey::all_nodes(), 1).unwrap();
    assert!(matches!(tracker.rotate(TxId(1)), Err(CountsError::Closed)));
    assert!(tracker.is_closed());
    assert_eq!(tracker.rotation_phase(), RotationPhase::Idle);
}
