//! Persistence: row models, the snapshot store, and roster sources.

pub mod memory;
pub mod models;
pub mod roster;
pub mod snapshots;

pub use memory::MemorySnapshotStore;
pub use roster::{PgRoster, RosterSource, StaticRoster};
pub use snapshots::{PgSnapshotStore, SnapshotStore};
