//! Low-level primitives for building the counts store.
//!
//! Includes byte utilities and positioned file I/O.

/// Byte-level utilities and encoding/decoding.
///
/// Big-endian, order-preserving encoders used by keys and headers.
pub mod bytes;

/// I/O abstractions and utilities.
///
/// Positioned file access and the storage handle snapshot files live behind.
pub mod io;
