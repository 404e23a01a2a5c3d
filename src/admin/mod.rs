#![forbid(unsafe_code)]

//! Counts store administration utilities.
//!
//! Bootstrapping, inspection and verification of store files. Everything
//! except [`init`] only reads; recovery (removing torn or superseded
//! generations) is left to [`crate::counts::CountsTracker::open`].

mod error;
mod init;
mod inspect;
mod options;
mod util;
mod verify;

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Store bootstrap.
pub use init::{init, InitReport};

/// Header and entry dumps of the current snapshot.
pub use inspect::{inspect, read_count, CountReport, EntryRow, HeaderSection, InspectReport};

/// Configuration options for opening a store in admin mode.
pub use options::AdminOpenOptions;

/// Store integrity verification.
///
/// Classifies every generation file and fully checks the current one.
pub use verify::{
    verify, GenerationCheck, GenerationStatus, VerifyFinding, VerifyReport, VerifySeverity,
};

/// Read-only access to the current snapshot.
pub use util::{open_store, StoreHandle};
