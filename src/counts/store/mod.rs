//! Immutable, sorted snapshot of counts persisted in one file.
//!
//! Layout: a [`HEADER_LEN`]-byte header followed by `entry_count` fixed-size
//! entries, each an encoded [`CountKey`] and a big-endian two's-complement
//! `i64`, strictly ascending by encoded key. The header is written last so a
//! torn write always leaves a file whose header fails validation.

pub mod files;
pub mod header;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::primitives::bytes::ord;
use crate::primitives::io::{FileIo, FileSystem};
use crate::types::{BodyCrc, CountsError, Generation, Result, TxId};

use super::key::{CountKey, KEY_LEN};
use super::overlay::OverlayView;
use super::register::checked_sum;

pub use header::{
    validate_version_tag, StoreHeader, DEFAULT_VERSION_TAG, ENTRY_LEN, HEADER_LEN,
    MAX_VERSION_TAG_LEN, STORE_FORMAT_VERSION, STORE_MAGIC,
};

/// Entries buffered per read or write call when streaming the body.
const IO_BATCH_ENTRIES: usize = 256;

/// Controls how a new store file is made durable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    /// Fsync the file and its directory before the store is reported written.
    pub sync: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { sync: true }
    }
}

/// Read-only handle on one snapshot store file.
///
/// Lookups read through positioned I/O, so a handle can be shared across
/// threads. A handle marked [`retired`](SnapshotStore::retire) unlinks its
/// file once the last reference is dropped.
pub struct SnapshotStore {
    fs: Arc<dyn FileSystem>,
    io: Arc<dyn FileIo>,
    path: PathBuf,
    header: StoreHeader,
    retired: AtomicBool,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("retired", &self.retired.load(AtomicOrdering::Relaxed))
            .finish()
    }
}

impl SnapshotStore {
    /// Opens `path`, validating the header and the whole body.
    pub fn open(fs: &Arc<dyn FileSystem>, path: &Path, expected_tag: &str) -> Result<Self> {
        Self::open_with(fs, path, expected_tag, true)
    }

    /// Opens `path`; the body scan is skipped when `verify_body` is false.
    ///
    /// Header and length checks always run.
    pub fn open_with(
        fs: &Arc<dyn FileSystem>,
        path: &Path,
        expected_tag: &str,
        verify_body: bool,
    ) -> Result<Self> {
        let header = Self::read_header(fs.as_ref(), path)?;
        header.check_compatible(path, expected_tag)?;
        let io = fs.open_read(path)?;
        let len = io.len()?;
        if header.file_len() != Some(len) {
            return Err(CountsError::Corruption {
                path: path.to_path_buf(),
                reason: "file length does not match entry count",
            });
        }
        let store = Self {
            fs: Arc::clone(fs),
            io,
            path: path.to_path_buf(),
            header,
            retired: AtomicBool::new(false),
        };
        if verify_body {
            store.verify_body()?;
        }
        debug!(
            path = %store.path.display(),
            tx_id = store.header.tx_id.0,
            generation = store.header.generation.0,
            entries = store.header.entry_count,
            verified = verify_body,
            "counts.store.opened"
        );
        Ok(store)
    }

    /// Reads and structurally validates the header of `path` without any
    /// compatibility check.
    pub fn read_header(fs: &dyn FileSystem, path: &Path) -> Result<StoreHeader> {
        let io = fs.open_read(path)?;
        if io.len()? < HEADER_LEN as u64 {
            return Err(CountsError::CorruptHeader {
                path: path.to_path_buf(),
                reason: "file shorter than header",
            });
        }
        let mut buf = [0u8; HEADER_LEN];
        io.read_at(0, &mut buf)?;
        StoreHeader::decode(path, &buf)
    }

    /// Writes an empty generation-0 store at `path` and opens it.
    pub fn create_empty(
        fs: &Arc<dyn FileSystem>,
        path: &Path,
        version_tag: &str,
        opts: WriteOptions,
    ) -> Result<Self> {
        let header = StoreHeader::new(version_tag, TxId(0), Generation(0))?;
        write_store_file(fs.as_ref(), path, header, opts, |_| Ok(()))?;
        Self::open_validated(fs, path, version_tag)
    }

    /// Writes the merge of `base` and `overlay` to `dest` as a new generation.
    ///
    /// Keys present in only one input are copied; keys present in both are
    /// written with the sum. Keys whose merged value is zero are kept. The
    /// result is reopened with full validation before it is returned. A sum
    /// outside the `i64` range fails with [`CountsError::CountOverflow`]. On
    /// any failure `dest` is removed and `base` is left untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn write_merged(
        fs: &Arc<dyn FileSystem>,
        dest: &Path,
        base: &SnapshotStore,
        overlay: &OverlayView,
        tx_id: TxId,
        generation: Generation,
        opts: WriteOptions,
    ) -> Result<Self> {
        Self::write_merged_file(fs.as_ref(), dest, base, overlay, tx_id, generation, opts)?;
        Self::open_validated(fs, dest, base.version_tag())
    }

    /// Write half of [`SnapshotStore::write_merged`]; the file is not
    /// re-validated.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn write_merged_file(
        fs: &dyn FileSystem,
        dest: &Path,
        base: &SnapshotStore,
        overlay: &OverlayView,
        tx_id: TxId,
        generation: Generation,
        opts: WriteOptions,
    ) -> Result<()> {
        let header = StoreHeader::new(base.version_tag(), tx_id, generation)?;
        write_store_file(fs, dest, header, opts, |writer| merge_into(base, overlay, writer))
    }

    /// Opens a freshly written file with full verification, removing it when
    /// it does not validate.
    pub(crate) fn open_validated(
        fs: &Arc<dyn FileSystem>,
        path: &Path,
        version_tag: &str,
    ) -> Result<Self> {
        match Self::open(fs, path, version_tag) {
            Ok(store) => Ok(store),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "counts.store.validation_failed");
                remove_quietly(fs.as_ref(), path);
                Err(err)
            }
        }
    }

    /// Looks `key` up by binary search over the on-disk entries.
    pub fn lookup(&self, key: &CountKey) -> Result<Option<i64>> {
        let target = key.encode();
        let mut lo = 0u64;
        let mut hi = self.header.entry_count;
        let mut entry = [0u8; ENTRY_LEN];
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            self.io.read_at(entry_offset(mid), &mut entry)?;
            match entry[..KEY_LEN].cmp(&target[..]) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Some(ord::get_i64_raw(&entry[KEY_LEN..]))),
            }
        }
        Ok(None)
    }

    /// Streams every entry in ascending key order.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            store: self,
            next_index: 0,
            buf: Vec::new(),
            pos: 0,
            buffered: 0,
        }
    }

    /// Re-checks body checksum, key encoding and ordering.
    pub fn verify_body(&self) -> Result<()> {
        let mut crc = BodyCrc::default();
        let mut prev: Option<[u8; KEY_LEN]> = None;
        self.for_each_chunk(|chunk| {
            crc.update(chunk);
            for raw in chunk.chunks_exact(ENTRY_LEN) {
                let key = &raw[..KEY_LEN];
                if CountKey::decode(key).is_err() {
                    return Err(self.corruption("undecodable key"));
                }
                if let Some(prev) = prev {
                    if prev.as_slice() >= key {
                        return Err(self.corruption("entries not strictly ascending"));
                    }
                }
                let mut current = [0u8; KEY_LEN];
                current.copy_from_slice(key);
                prev = Some(current);
            }
            Ok(())
        })?;
        if crc.value() != self.header.body_crc32 {
            return Err(self.corruption("body crc mismatch"));
        }
        Ok(())
    }

    fn for_each_chunk(&self, mut f: impl FnMut(&[u8]) -> Result<()>) -> Result<()> {
        let total = self.header.entry_count;
        let mut buf = Vec::with_capacity(IO_BATCH_ENTRIES * ENTRY_LEN);
        let mut index = 0u64;
        while index < total {
            let n = (total - index).min(IO_BATCH_ENTRIES as u64) as usize;
            buf.resize(n * ENTRY_LEN, 0);
            self.io.read_at(entry_offset(index), &mut buf)?;
            f(&buf)?;
            index += n as u64;
        }
        Ok(())
    }

    fn corruption(&self, reason: &'static str) -> CountsError {
        CountsError::Corruption {
            path: self.path.clone(),
            reason,
        }
    }

    /// Header of the file.
    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    /// Transaction id the snapshot reflects.
    pub fn tx_id(&self) -> TxId {
        self.header.tx_id
    }

    /// Physical generation of the file.
    pub fn generation(&self) -> Generation {
        self.header.generation
    }

    /// Version tag recorded in the header.
    pub fn version_tag(&self) -> &str {
        &self.header.version_tag
    }

    /// Number of persisted entries.
    pub fn len(&self) -> u64 {
        self.header.entry_count
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.header.entry_count == 0
    }

    /// File backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks the file for removal once the last handle is dropped.
    pub fn retire(&self) {
        self.retired.store(true, AtomicOrdering::Release);
    }

    /// Whether [`SnapshotStore::retire`] has been called.
    pub fn is_retired(&self) -> bool {
        self.retired.load(AtomicOrdering::Acquire)
    }
}

impl Drop for SnapshotStore {
    fn drop(&mut self) {
        if !*self.retired.get_mut() {
            return;
        }
        match self.fs.remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "counts.store.retired_removed"),
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "counts.store.retired_remove_failed"
            ),
        }
    }
}

/// Iterator over the entries of a [`SnapshotStore`].
pub struct Entries<'a> {
    store: &'a SnapshotStore,
    next_index: u64,
    buf: Vec<u8>,
    pos: usize,
    buffered: usize,
}

impl Iterator for Entries<'_> {
    type Item = Result<(CountKey, i64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos == self.buffered {
            let total = self.store.header.entry_count;
            if self.next_index >= total {
                return None;
            }
            let n = (total - self.next_index).min(IO_BATCH_ENTRIES as u64) as usize;
            self.buf.resize(n * ENTRY_LEN, 0);
            if let Err(err) = self.store.io.read_at(entry_offset(self.next_index), &mut self.buf) {
                self.next_index = total;
                self.pos = 0;
                self.buffered = 0;
                return Some(Err(err));
            }
            self.next_index += n as u64;
            self.pos = 0;
            self.buffered = n;
        }
        let raw = &self.buf[self.pos * ENTRY_LEN..(self.pos + 1) * ENTRY_LEN];
        self.pos += 1;
        let value = ord::get_i64_raw(&raw[KEY_LEN..]);
        Some(
            CountKey::decode(&raw[..KEY_LEN])
                .map(|key| (key, value))
                .map_err(|_| self.store.corruption("undecodable key")),
        )
    }
}

fn entry_offset(index: u64) -> u64 {
    HEADER_LEN as u64 + index * ENTRY_LEN as u64
}

/// Buffered sequential writer for the entry body.
struct EntryWriter<'a> {
    io: &'a dyn FileIo,
    offset: u64,
    buf: Vec<u8>,
    crc: BodyCrc,
    count: u64,
    last_key: Option<[u8; KEY_LEN]>,
}

impl<'a> EntryWriter<'a> {
    fn new(io: &'a dyn FileIo) -> Self {
        Self {
            io,
            offset: HEADER_LEN as u64,
            buf: Vec::with_capacity(IO_BATCH_ENTRIES * ENTRY_LEN),
            crc: BodyCrc::default(),
            count: 0,
            last_key: None,
        }
    }

    fn push(&mut self, key: &CountKey, value: i64) -> Result<()> {
        let encoded = key.encode();
        if let Some(last) = self.last_key {
            if last >= encoded {
                return Err(CountsError::Invalid("merged entries out of order"));
            }
        }
        self.last_key = Some(encoded);
        let mut value_bytes = [0u8; 8];
        ord::put_i64_raw(&mut value_bytes, value);
        self.buf.extend_from_slice(&encoded);
        self.buf.extend_from_slice(&value_bytes);
        self.count += 1;
        if self.buf.len() >= IO_BATCH_ENTRIES * ENTRY_LEN {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.io.write_at(self.offset, &self.buf)?;
        self.crc.update(&self.buf);
        self.offset += self.buf.len() as u64;
        self.buf.clear();
        Ok(())
    }

    fn finish(mut self) -> Result<(u64, u32)> {
        self.flush()?;
        Ok((self.count, self.crc.value()))
    }
}

fn merge_into(base: &SnapshotStore, overlay: &OverlayView, writer: &mut EntryWriter<'_>) -> Result<()> {
    let mut base_entries = base.entries();
    let deltas = overlay.entries();
    let mut next_base = base_entries.next().transpose()?;
    let mut delta_idx = 0;
    loop {
        let next_delta = deltas.get(delta_idx).copied();
        let (key, value) = match (next_base, next_delta) {
            (None, None) => break,
            (Some(entry), None) => {
                next_base = base_entries.next().transpose()?;
                entry
            }
            (None, Some(delta)) => {
                delta_idx += 1;
                delta
            }
            (Some((base_key, base_value)), Some((delta_key, delta_value))) => {
                match base_key.cmp(&delta_key) {
                    std::cmp::Ordering::Less => {
                        next_base = base_entries.next().transpose()?;
                        (base_key, base_value)
                    }
                    std::cmp::Ordering::Greater => {
                        delta_idx += 1;
                        (delta_key, delta_value)
                    }
                    std::cmp::Ordering::Equal => {
                        next_base = base_entries.next().transpose()?;
                        delta_idx += 1;
                        (base_key, checked_sum(&base_key, base_value, delta_value)?)
                    }
                }
            }
        };
        writer.push(&key, value)?;
    }
    Ok(())
}

/// Creates `path` exclusively and writes header-last. Removes the partial
/// file on failure.
fn write_store_file(
    fs: &dyn FileSystem,
    path: &Path,
    header: StoreHeader,
    opts: WriteOptions,
    body: impl FnOnce(&mut EntryWriter<'_>) -> Result<()>,
) -> Result<()> {
    let io = fs.create_new(path)?;
    let result = write_body_then_header(fs, io.as_ref(), path, header, opts, body);
    drop(io);
    if let Err(err) = result {
        warn!(path = %path.display(), error = %err, "counts.store.write_failed");
        remove_quietly(fs, path);
        return Err(err);
    }
    Ok(())
}

fn write_body_then_header(
    fs: &dyn FileSystem,
    io: &dyn FileIo,
    path: &Path,
    mut header: StoreHeader,
    opts: WriteOptions,
    body: impl FnOnce(&mut EntryWriter<'_>) -> Result<()>,
) -> Result<()> {
    io.write_at(0, &[0u8; HEADER_LEN])?;
    let mut writer = EntryWriter::new(io);
    body(&mut writer)?;
    let (count, crc) = writer.finish()?;
    if opts.sync {
        io.sync_all()?;
    }
    header.entry_count = count;
    header.body_crc32 = crc;
    let mut buf = [0u8; HEADER_LEN];
    header.encode(&mut buf)?;
    io.write_at(0, &buf)?;
    if opts.sync {
        io.sync_all()?;
        fs.sync_dir(&files::store_dir(path))?;
    }
    debug!(
        path = %path.display(),
        tx_id = header.tx_id.0,
        generation = header.generation.0,
        entries = count,
        "counts.store.written"
    );
    Ok(())
}

pub(crate) fn remove_quietly(fs: &dyn FileSystem, path: &Path) {
    if let Err(err) = fs.remove_file(path) {
        warn!(path = %path.display(), error = %err, "counts.store.remove_failed");
    }
}
