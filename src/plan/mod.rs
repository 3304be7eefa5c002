//! Placement planning: the write order of a build and its deduplication.
//!
//! Deduplication is scoped to a single build. Content already stored in
//! other containers is not looked up; doing so would need a persistent
//! digest index with its own invalidation rules.

mod planner;

pub use planner::{compare_placement, sort_for_placement, DedupTable, Placement, Plan};
