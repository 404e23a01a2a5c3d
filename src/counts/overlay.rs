//! In-memory deltas accumulated since the active snapshot.
//!
//! An [`Overlay`] is one *generation*: it accepts adds until a rotation seals
//! it. The tracker guarantees no add races the seal (writers hold the
//! active-version read lock while adding, the cut takes the write lock), so a
//! sealed overlay is immutable and [`OverlayView::from_sealed`] never blocks a
//! writer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::Result;

use super::key::CountKey;
use super::register::{checked_sum, Register};

/// One generation of pending count deltas.
#[derive(Debug, Default)]
pub struct Overlay {
    registers: RwLock<HashMap<CountKey, Register>>,
}

impl Overlay {
    /// Creates an empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically adds `delta` to the register for `key`, creating it at zero
    /// first when absent. Returns the register's new value, or `None` with
    /// the register untouched when the sum would overflow.
    pub fn add(&self, key: CountKey, delta: i64) -> Option<i64> {
        {
            let registers = self.registers.read();
            if let Some(register) = registers.get(&key) {
                return register.checked_add_and_get(delta);
            }
        }
        let mut registers = self.registers.write();
        registers.entry(key).or_default().checked_add_and_get(delta)
    }

    /// Overlay pre-loaded with the entries of `view`.
    pub fn from_view(view: &OverlayView) -> Self {
        let registers = view
            .entries()
            .iter()
            .map(|(key, value)| (*key, Register::new(*value)))
            .collect();
        Self {
            registers: RwLock::new(registers),
        }
    }

    /// Pending delta for `key` (0 when absent).
    pub fn get(&self, key: &CountKey) -> i64 {
        self.registers
            .read()
            .get(key)
            .map(Register::read)
            .unwrap_or(0)
    }

    /// Number of keys touched in this generation.
    pub fn len(&self) -> usize {
        self.registers.read().len()
    }

    /// Whether no key has been touched.
    pub fn is_empty(&self) -> bool {
        self.registers.read().is_empty()
    }
}

/// Frozen, key-ordered view of the sealed generations merged by a rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayView {
    entries: Vec<(CountKey, i64)>,
}

impl OverlayView {
    /// Sums the sealed generations into one sorted view.
    ///
    /// Fails with [`CountsError::CountOverflow`] if a key's summed delta
    /// leaves the `i64` range.
    pub fn from_sealed(generations: &[Arc<Overlay>]) -> Result<Self> {
        Self::from_deltas(generations.iter().flat_map(|generation| {
            let registers = generation.registers.read();
            registers
                .iter()
                .map(|(key, register)| (*key, register.read()))
                .collect::<Vec<_>>()
        }))
    }

    /// Builds a view from loose `(key, delta)` pairs, summing duplicates.
    pub fn from_deltas(deltas: impl IntoIterator<Item = (CountKey, i64)>) -> Result<Self> {
        let mut merged: BTreeMap<CountKey, i64> = BTreeMap::new();
        for (key, delta) in deltas {
            let slot = merged.entry(key).or_insert(0);
            *slot = checked_sum(&key, *slot, delta)?;
        }
        Ok(Self {
            entries: merged.into_iter().collect(),
        })
    }

    /// Entries in ascending key order, one per distinct key.
    pub fn entries(&self) -> &[(CountKey, i64)] {
        &self.entries
    }

    /// Keys covered by the view.
    pub fn keys(&self) -> impl Iterator<Item = &CountKey> + '_ {
        self.entries.iter().map(|(key, _)| key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
