//! Relationship graph views and structural classification.

pub mod classify;
pub mod relation;

pub use classify::{Classification, ConflictKind};
pub use relation::RelationGraph;
