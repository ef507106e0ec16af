use serde::{Deserialize, Serialize};

use crate::model::Edge;

/// Kind of change the persistence layer must apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOp {
    Insert,
    UpdateStage,
    /// Copy the edge to the archive table. Always followed by `Remove`.
    Archive,
    Remove,
    /// Edge moved to another group (merge or split).
    Regroup,
    /// Placeholder replaced by a real item.
    Promote,
}

/// One store mutation, in commit order. `edge` is the state after the change
/// (or the removed row for `Remove`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDelta {
    pub op: DeltaOp,
    pub edge: Edge,
}

impl StoreDelta {
    #[must_use]
    pub const fn new(op: DeltaOp, edge: Edge) -> Self {
        Self { op, edge }
    }
}
