use std::path::Path;

use serde::Serialize;

use crate::counts::{CountKey, StoreHeader};

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::{file_size, open_store};
use crate::admin::Result;

/// Header fields of the current snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HeaderSection {
    /// Layout version.
    pub format_version: u16,
    /// Engine version tag.
    pub version_tag: String,
    /// Transaction id reflected by the snapshot.
    pub tx_id: u64,
    /// File generation.
    pub generation: u64,
    /// Number of entries.
    pub entry_count: u64,
    /// Body checksum, hex encoded.
    pub body_crc32: String,
}

impl From<&StoreHeader> for HeaderSection {
    fn from(header: &StoreHeader) -> Self {
        Self {
            format_version: header.format_version,
            version_tag: header.version_tag.clone(),
            tx_id: header.tx_id.0,
            generation: header.generation.0,
            entry_count: header.entry_count,
            body_crc32: hex::encode(header.body_crc32.to_be_bytes()),
        }
    }
}

/// One persisted count.
#[derive(Debug, Clone, Serialize)]
pub struct EntryRow {
    /// Key kind name.
    pub kind: String,
    /// Human-readable key.
    pub key: String,
    /// Encoded key, hex.
    pub key_hex: String,
    /// Persisted value.
    pub value: i64,
}

impl EntryRow {
    fn new(key: &CountKey, value: i64) -> Self {
        Self {
            kind: key.kind().to_string(),
            key: key.to_string(),
            key_hex: hex::encode(key.encode()),
            value,
        }
    }
}

/// Description of a store's current snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    /// Base path of the store.
    pub base: String,
    /// File holding the current snapshot.
    pub store_file: String,
    /// Size of that file in bytes.
    pub file_size_bytes: u64,
    /// Decoded header.
    pub header: HeaderSection,
    /// Every generation file present, ascending.
    pub generations: Vec<u64>,
    /// Entries, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<EntryRow>>,
}

/// Reads the header (and optionally all entries) of the current snapshot.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read.
pub fn inspect(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    include_entries: bool,
) -> Result<InspectReport> {
    let path = path.as_ref();
    let handle = open_store(path, opts)?;
    let store = &handle.store;
    let entries = if include_entries {
        let mut rows = Vec::with_capacity(store.len() as usize);
        for entry in store.entries() {
            let (key, value) = entry?;
            rows.push(EntryRow::new(&key, value));
        }
        Some(rows)
    } else {
        None
    };
    Ok(InspectReport {
        base: path.display().to_string(),
        store_file: store.path().display().to_string(),
        file_size_bytes: file_size(store.path()),
        header: HeaderSection::from(store.header()),
        generations: handle.generations.iter().map(|(g, _)| g.0).collect(),
        entries,
    })
}

/// A single persisted count as seen by tooling.
#[derive(Debug, Clone, Serialize)]
pub struct CountReport {
    /// The key that was read.
    pub entry: EntryRow,
    /// Whether the key is present in the snapshot.
    pub present: bool,
    /// Transaction id of the snapshot that was read.
    pub tx_id: u64,
}

/// Reads the persisted value of `key` from the current snapshot.
///
/// Deltas still held in memory by a running tracker are not visible.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read.
pub fn read_count(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    key: &CountKey,
) -> Result<CountReport> {
    let handle = open_store(path.as_ref(), opts)?;
    let value = handle.store.lookup(key)?;
    Ok(CountReport {
        entry: EntryRow::new(key, value.unwrap_or(0)),
        present: value.is_some(),
        tx_id: handle.store.tx_id().0,
    })
}
