use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::counts::store::files;
use crate::counts::SnapshotStore;
use crate::primitives::io::{FileSystem, OsFileSystem};
use crate::types::{CountsError, Generation};

use crate::admin::error::{AdminError, Result};
use crate::admin::options::AdminOpenOptions;

/// Current snapshot of a store together with every generation file present.
pub struct StoreHandle {
    /// The newest generation whose header validates.
    pub store: SnapshotStore,
    /// All generation files found next to it, ascending.
    pub generations: Vec<(Generation, PathBuf)>,
}

/// Opens the newest valid generation of the store rooted at `path` without
/// recovering or deleting anything.
///
/// # Errors
///
/// Returns an error if no generation exists, if none of them has a valid
/// header, or if the chosen one fails validation.
pub fn open_store(path: &Path, opts: &AdminOpenOptions) -> Result<StoreHandle> {
    let fs: Arc<dyn FileSystem> = OsFileSystem::shared();
    let selection = match files::select_current(fs.as_ref(), path) {
        Ok(selection) => selection,
        Err(CountsError::MissingStore(_)) => return Err(AdminError::missing_store(path)),
        Err(err) => return Err(err.into()),
    };
    let store = SnapshotStore::open_with(&fs, &selection.path, &opts.version_tag, opts.verify_body)?;
    Ok(StoreHandle {
        store,
        generations: selection.candidates,
    })
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub(crate) fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}
