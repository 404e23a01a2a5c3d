#![forbid(unsafe_code)]

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::types::{CountsError, Result};

/// Positioned access to one snapshot file.
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` from `off`; reading past the end is an error.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current file length in bytes.
    fn len(&self) -> Result<u64>;
}

/// Storage handle through which snapshot files are created, opened and removed.
pub trait FileSystem: Send + Sync + 'static {
    /// Creates a new file for writing; fails if it already exists.
    fn create_new(&self, path: &Path) -> Result<Arc<dyn FileIo>>;
    /// Opens an existing file for positioned reads.
    fn open_read(&self, path: &Path) -> Result<Arc<dyn FileIo>>;
    /// Returns whether a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;
    /// Removes a file.
    fn remove_file(&self, path: &Path) -> Result<()>;
    /// Lists the entries of a directory.
    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;
    /// Makes directory entry changes (creates, removals) durable.
    fn sync_dir(&self, dir: &Path) -> Result<()>;
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, off)
}

#[cfg(unix)]
fn pwrite(file: &File, buf: &[u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, off)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, off)
}

#[cfg(windows)]
fn pwrite(file: &File, buf: &[u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, off)
}

#[cfg(not(any(unix, windows)))]
fn pread(_file: &File, _buf: &mut [u8], _off: u64) -> io::Result<usize> {
    Err(io::ErrorKind::Unsupported.into())
}

#[cfg(not(any(unix, windows)))]
fn pwrite(_file: &File, _buf: &[u8], _off: u64) -> io::Result<usize> {
    Err(io::ErrorKind::Unsupported.into())
}

/// Snapshot file opened through the operating system.
///
/// Snapshot files are written once and then only read, so the handle is
/// shared between readers without a lock.
pub struct StdFileIo {
    file: File,
}

impl StdFileIo {
    /// Creates a fresh file for read-write access, failing if it exists.
    pub fn create_new(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Opens an existing file read-only.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        while !dst.is_empty() {
            match pread(&self.file, dst, off) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("snapshot file ended at offset {off}"),
                    )
                    .into())
                }
                Ok(n) => {
                    dst = &mut std::mem::take(&mut dst)[n..];
                    off += n as u64;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            match pwrite(&self.file, src, off) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    src = &src[n..];
                    off += n as u64;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// [`FileSystem`] backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsFileSystem;

impl OsFileSystem {
    /// Returns the OS file system as a shared storage handle.
    pub fn shared() -> Arc<dyn FileSystem> {
        Arc::new(OsFileSystem)
    }
}

impl FileSystem for OsFileSystem {
    fn create_new(&self, path: &Path) -> Result<Arc<dyn FileIo>> {
        Ok(Arc::new(StdFileIo::create_new(path)?))
    }

    fn open_read(&self, path: &Path) -> Result<Arc<dyn FileIo>> {
        Ok(Arc::new(StdFileIo::open_read(path)?))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(CountsError::from)
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir)? {
            out.push(entry?.path());
        }
        Ok(out)
    }

    #[cfg(unix)]
    fn sync_dir(&self, dir: &Path) -> Result<()> {
        File::open(dir)?.sync_all().map_err(CountsError::from)
    }

    #[cfg(not(unix))]
    fn sync_dir(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }
}
