// ABOUTME: Persistence layer for roundtable snapshots.
// ABOUTME: Provides atomic file save and latest-snapshot load for opaque engine state.

pub mod snapshot;

pub use snapshot::{SnapshotData, SnapshotError, load_latest_snapshot, save_snapshot};
