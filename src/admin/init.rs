use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::counts::store::files;
use crate::counts::CountsTracker;
use crate::primitives::io::OsFileSystem;
use crate::types::Generation;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::ensure_parent_dir;
use crate::admin::Result;

/// Outcome of bootstrapping a store.
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    /// Base path of the store.
    pub base: String,
    /// File created for generation 0.
    pub store_file: String,
    /// Version tag stamped in the header.
    pub version_tag: String,
}

/// Bootstraps an empty counts store rooted at `path`.
///
/// # Errors
///
/// Fails if a generation already exists or the file cannot be written.
pub fn init(path: impl AsRef<Path>, opts: &AdminOpenOptions) -> Result<InitReport> {
    let path = path.as_ref();
    if opts.create_dirs {
        ensure_parent_dir(path)?;
    }
    CountsTracker::create_empty_store(&OsFileSystem::shared(), path, &opts.version_tag)?;
    let store_file = files::generation_path(path, Generation(0));
    info!(path = %path.display(), "admin.init");
    Ok(InitReport {
        base: path.display().to_string(),
        store_file: store_file.display().to_string(),
        version_tag: opts.version_tag.clone(),
    })
}
