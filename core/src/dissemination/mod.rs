// Dissemination module — distance-vector capability tables and their updater

pub mod diff;
pub mod distance;
pub mod group;
pub mod table;
pub mod updater;

pub use diff::UpdateDiff;
pub use distance::{DistanceEntry, DistanceList};
pub use group::CapabilityGroup;
pub use table::{CapabilityTable, MergeOutcome, DEFAULT_MAX_DISTANCE};
pub use updater::{
    CommitResult, DistanceChange, Disseminator, SharedTable, TableChange, TableChangeListener,
};
