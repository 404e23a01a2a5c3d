#![forbid(unsafe_code)]
//! Shared identifiers, error type and checksum helpers.

use std::fmt;
use std::path::PathBuf;

pub mod checksum;

pub use checksum::{header_crc32, BodyCrc};

/// Label token identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LabelId(pub u32);
/// Relationship type token identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TypeId(pub u32);
/// Property key token identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PropId(pub u32);
/// Externally assigned, strictly increasing transaction identifier.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, serde::Serialize,
)]
#[serde(transparent)]
pub struct TxId(pub u64);
/// Physical file generation of a snapshot store.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, serde::Serialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

/// Errors surfaced by the counts store.
#[derive(thiserror::Error, Debug)]
pub enum CountsError {
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Store header failed structural validation.
    #[error("corrupt header in {path}: {reason}")]
    CorruptHeader {
        /// File that failed validation.
        path: PathBuf,
        /// What was wrong.
        reason: &'static str,
    },
    /// Store body failed validation (checksum, ordering, key encoding).
    #[error("corrupt store body in {path}: {reason}")]
    Corruption {
        /// File that failed validation.
        path: PathBuf,
        /// What was wrong.
        reason: &'static str,
    },
    /// Store was written by an incompatible format or version tag.
    #[error("version mismatch in {path}: expected {expected}, found {found}")]
    VersionMismatch {
        /// File that was rejected.
        path: PathBuf,
        /// Version this engine expects.
        expected: String,
        /// Version recorded in the file.
        found: String,
    },
    /// Bootstrap attempted on a path that already holds a store.
    #[error("counts store already exists at {0}")]
    AlreadyExists(PathBuf),
    /// No store has been bootstrapped at the path.
    #[error("no counts store at {0}")]
    MissingStore(PathBuf),
    /// Key shape does not match its kind.
    #[error("invalid count key: {0}")]
    InvalidKey(&'static str),
    /// Another rotation is currently running.
    #[error("rotation already in progress")]
    RotationInProgress,
    /// Rotation requested for a transaction not after the current snapshot.
    #[error("tx id {requested} is not greater than current tx id {current}")]
    NonMonotonicTxId {
        /// Requested transaction id.
        requested: TxId,
        /// Transaction id of the active snapshot.
        current: TxId,
    },
    /// Adding deltas would take a count outside the `i64` range.
    #[error("count for {key} overflows i64")]
    CountOverflow {
        /// Display form of the affected key.
        key: String,
    },
    /// Operation on a closed tracker.
    #[error("counts tracker is closed")]
    Closed,
    /// Invalid argument or configuration.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Result alias for counts store operations.
pub type Result<T> = std::result::Result<T, CountsError>;

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LabelId {
    fn from(value: u32) -> Self {
        LabelId(value)
    }
}

impl From<LabelId> for u32 {
    fn from(value: LabelId) -> Self {
        value.0
    }
}

impl From<u32> for TypeId {
    fn from(value: u32) -> Self {
        TypeId(value)
    }
}

impl From<TypeId> for u32 {
    fn from(value: TypeId) -> Self {
        value.0
    }
}

impl From<u32> for PropId {
    fn from(value: u32) -> Self {
        PropId(value)
    }
}

impl From<PropId> for u32 {
    fn from(value: PropId) -> Self {
        value.0
    }
}

impl From<u64> for TxId {
    fn from(value: u64) -> Self {
        TxId(value)
    }
}

impl Generation {
    /// Returns the generation following this one.
    pub fn next(self) -> Generation {
        Generation(self.0.saturating_add(1))
    }
}
