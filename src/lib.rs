//! Durable graph count store with online snapshot rotation.
//!
//! [`counts::CountsTracker`] keeps running counts (nodes per label,
//! relationships per type and per endpoint label, index statistics) for a
//! query planner. Counts live in an immutable sorted snapshot file plus
//! in-memory deltas; rotation persists the deltas into a new snapshot while
//! readers and writers keep going.

#![warn(missing_docs)]

pub mod admin;
pub mod counts;
pub mod logging;
pub mod primitives;
pub mod types;
