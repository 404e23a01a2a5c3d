//! Durable, rotating count store used for cardinality estimates.
//!
//! A [`CountsTracker`] resolves every read against an immutable
//! [`SnapshotStore`] plus in-memory [`Overlay`] deltas, and periodically
//! rotates the deltas into a new snapshot file without blocking readers or
//! writers.

pub mod key;
pub mod metrics;
pub mod options;
pub mod overlay;
pub mod register;
pub mod rotation;
pub mod store;
pub mod tracker;
pub mod updater;

pub use key::{CountKey, KeyKind, KEY_LEN};
pub use metrics::{default_metrics, CounterMetrics, CountsMetrics, NoopMetrics};
pub use options::{default_config_path, ConfigError, CountsConfig, CountsOptions};
pub use overlay::{Overlay, OverlayView};
pub use register::Register;
pub use rotation::{RotationHook, RotationOutcome, RotationPhase, RotationPolicy, RotationReport};
pub use store::{SnapshotStore, StoreHeader, WriteOptions, DEFAULT_VERSION_TAG};
pub use tracker::CountsTracker;
pub use updater::{CountsSink, CountsUpdater, NodeDegree};
