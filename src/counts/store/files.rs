//! Physical file naming for store generations.
//!
//! A store rooted at `counts.db` lives in files `counts.db.0`, `counts.db.1`,
//! ... in the same directory. Each rotation writes the next generation and the
//! previous one is unlinked once no reader holds it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::primitives::io::FileSystem;
use crate::types::{CountsError, Generation, Result};

use super::header::StoreHeader;
use super::SnapshotStore;

/// Directory holding the generations of `base`.
pub fn store_dir(base: &Path) -> PathBuf {
    match base.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Path of generation `generation` for the store rooted at `base`.
pub fn generation_path(base: &Path, generation: Generation) -> PathBuf {
    let mut name = base
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(format!(".{}", generation.0));
    base.with_file_name(name)
}

/// Parses the generation out of `candidate` if it belongs to `base`.
///
/// Only the form [`generation_path`] produces is accepted, so `counts.db.01`
/// is not generation 1.
pub fn parse_generation(base: &Path, candidate: &Path) -> Option<Generation> {
    let base_name = base.file_name()?.to_str()?;
    let name = candidate.file_name()?.to_str()?;
    let suffix = name.strip_prefix(base_name)?.strip_prefix('.')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if suffix.len() > 1 && suffix.starts_with('0') {
        return None;
    }
    suffix.parse().ok().map(Generation)
}

/// All generation files of `base`, ascending by generation.
pub fn list_generations(fs: &dyn FileSystem, base: &Path) -> Result<Vec<(Generation, PathBuf)>> {
    if base.file_name().is_none() {
        return Err(CountsError::Invalid("store path has no file name"));
    }
    let dir = store_dir(base);
    let entries = match fs.list_dir(&dir) {
        Ok(entries) => entries,
        Err(CountsError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err),
    };
    let mut found: Vec<(Generation, PathBuf)> = entries
        .into_iter()
        .filter_map(|path| parse_generation(base, &path).map(|generation| (generation, path)))
        .collect();
    found.sort_by_key(|(generation, _)| *generation);
    Ok(found)
}

/// Generation a store opens at, as chosen by [`select_current`].
#[derive(Debug)]
pub struct Selection {
    /// Chosen generation.
    pub generation: Generation,
    /// File of the chosen generation.
    pub path: PathBuf,
    /// Its structurally valid header. Compatibility is not checked.
    pub header: StoreHeader,
    /// Newer generation files whose header is invalid or names another
    /// generation, newest first.
    pub torn: Vec<PathBuf>,
    /// Every generation file found, ascending.
    pub candidates: Vec<(Generation, PathBuf)>,
}

/// Picks the newest generation of `base` whose header validates and matches
/// its file name. Nothing is opened for writing or removed.
///
/// # Errors
///
/// [`CountsError::MissingStore`] when no generation file exists, the first
/// header error when none validates, and any I/O error other than a corrupt
/// header.
pub fn select_current(fs: &dyn FileSystem, base: &Path) -> Result<Selection> {
    let candidates = list_generations(fs, base)?;
    let mut torn = Vec::new();
    let mut first_error: Option<CountsError> = None;
    for (generation, path) in candidates.iter().rev() {
        match SnapshotStore::read_header(fs, path) {
            Ok(header) if header.generation == *generation => {
                return Ok(Selection {
                    generation: *generation,
                    path: path.clone(),
                    header,
                    torn,
                    candidates,
                });
            }
            Ok(header) => {
                warn!(
                    path = %path.display(),
                    header_generation = header.generation.0,
                    "counts.store.generation_mismatch"
                );
                first_error.get_or_insert(CountsError::CorruptHeader {
                    path: path.clone(),
                    reason: "header generation does not match file name",
                });
            }
            Err(err @ CountsError::CorruptHeader { .. }) => {
                warn!(path = %path.display(), error = %err, "counts.store.torn_generation");
                first_error.get_or_insert(err);
            }
            Err(err) => return Err(err),
        }
        torn.push(path.clone());
    }
    Err(first_error.unwrap_or_else(|| CountsError::MissingStore(base.to_path_buf())))
}
