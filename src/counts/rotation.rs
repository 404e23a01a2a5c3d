//! Rotation state machine, policies and hooks.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::{Generation, TxId};

/// Phase of the rotation coordinator.
///
/// `Idle -> Merging -> Validating -> Swapping -> Idle`, or
/// `Merging | Validating -> Failed -> Idle`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPhase {
    /// No rotation running.
    Idle,
    /// Writing the merged snapshot.
    Merging,
    /// Re-reading the new snapshot before publishing it.
    Validating,
    /// Publishing the new active version.
    Swapping,
    /// The attempt failed; the previous snapshot stays active.
    Failed,
}

impl RotationPhase {
    const fn as_u8(self) -> u8 {
        match self {
            RotationPhase::Idle => 0,
            RotationPhase::Merging => 1,
            RotationPhase::Validating => 2,
            RotationPhase::Swapping => 3,
            RotationPhase::Failed => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => RotationPhase::Merging,
            2 => RotationPhase::Validating,
            3 => RotationPhase::Swapping,
            4 => RotationPhase::Failed,
            _ => RotationPhase::Idle,
        }
    }
}

impl fmt::Display for RotationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RotationPhase::Idle => "idle",
            RotationPhase::Merging => "merging",
            RotationPhase::Validating => "validating",
            RotationPhase::Swapping => "swapping",
            RotationPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Lock-free cell holding the current [`RotationPhase`].
#[derive(Debug)]
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(RotationPhase::Idle.as_u8()))
    }

    pub(crate) fn get(&self) -> RotationPhase {
        RotationPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, phase: RotationPhase) {
        self.0.store(phase.as_u8(), Ordering::Release);
    }
}

/// What a caller of `rotate` does when another rotation is already running.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Return `RotationInProgress` immediately.
    #[default]
    FailFast,
    /// Block until the running rotation finishes, then rotate.
    Wait,
}

/// Final state of one rotation attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationOutcome {
    /// A new snapshot was published.
    Succeeded,
    /// The previous snapshot stayed active.
    Failed,
}

/// Summary of a successful rotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    /// Transaction id of the snapshot that was replaced.
    pub previous_tx_id: TxId,
    /// Transaction id of the published snapshot.
    pub tx_id: TxId,
    /// Generation of the published snapshot.
    pub generation: Generation,
    /// File of the published snapshot.
    pub path: PathBuf,
    /// Entries in the published snapshot.
    pub entries_written: u64,
    /// Distinct keys taken from the overlay.
    pub overlay_keys_merged: usize,
    /// Sealed overlay generations folded into the snapshot.
    pub generations_merged: usize,
    /// Wall-clock duration of the rotation in milliseconds.
    pub elapsed_ms: u64,
}

/// Callback invoked by the rotation coordinator.
///
/// `after_validation` runs once the new snapshot has been written and
/// re-validated but before it is published. Readers and writers keep running
/// against the previous version while the hook executes.
pub trait RotationHook: Send + Sync {
    /// Called with the transaction id and file of the snapshot about to be
    /// published.
    fn after_validation(&self, tx_id: TxId, path: &Path);
}
