use std::sync::atomic::{AtomicI64, Ordering};

use crate::types::{CountsError, Result};

use super::key::CountKey;

/// Signed 64-bit accumulator backing one count.
///
/// The register never clamps; a negative value means the producer of the
/// deltas got its bookkeeping wrong and is left visible to the caller.
#[derive(Debug, Default)]
pub struct Register {
    value: AtomicI64,
}

impl Register {
    /// Creates a register holding `value`.
    pub fn new(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }

    /// Current value.
    pub fn read(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Overwrites the value.
    pub fn write(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Atomically adds `delta` and returns the resulting value, or `None`
    /// with the register untouched when the sum leaves the `i64` range.
    pub fn checked_add_and_get(&self, delta: i64) -> Option<i64> {
        self.value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(delta)
            })
            .ok()
            .map(|previous| previous + delta)
    }
}

/// `lhs + rhs` for the count of `key`.
pub(crate) fn checked_sum(key: &CountKey, lhs: i64, rhs: i64) -> Result<i64> {
    lhs.checked_add(rhs).ok_or_else(|| overflow(key))
}

pub(crate) fn overflow(key: &CountKey) -> CountsError {
    CountsError::CountOverflow {
        key: key.to_string(),
    }
}
