use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{EdgeId, EntityId, GroupId};
use super::stage::Stage;

/// What kind of conversion an edge records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Original is replaced by a real catalog item.
    Standard,
    /// Original is replaced by a placeholder awaiting an item number.
    Pending,
    /// Original is discontinued with no replacement.
    Discontinue,
}

/// Per-edge bookkeeping that the engine carries but never interprets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeMetadata {
    /// Replacement is a placeholder, not a catalog item.
    #[serde(default)]
    pub pending: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Project-tracker reference supplied with the candidate row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
}

/// A directed original → replacement relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub group_id: GroupId,
    pub original: EntityId,
    /// `None` marks a discontinue edge.
    pub replacement: Option<EntityId>,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_live_date: Option<NaiveDate>,
    pub metadata: EdgeMetadata,
}

impl Edge {
    #[must_use]
    pub fn kind(&self) -> EdgeKind {
        match (&self.replacement, self.metadata.pending) {
            (None, _) => EdgeKind::Discontinue,
            (Some(_), true) => EdgeKind::Pending,
            (Some(_), false) => EdgeKind::Standard,
        }
    }

    #[must_use]
    pub const fn is_discontinue(&self) -> bool {
        self.replacement.is_none()
    }

    /// Replacement only when it is a real catalog item.
    #[must_use]
    pub fn real_replacement(&self) -> Option<&EntityId> {
        if self.metadata.pending {
            None
        } else {
            self.replacement.as_ref()
        }
    }

    /// Display form of the replacement column.
    #[must_use]
    pub fn replacement_label(&self) -> &str {
        self.replacement
            .as_ref()
            .map_or("NO REPLACEMENT", EntityId::as_str)
    }
}

/// Edge fields supplied by the coordinator; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEdge {
    pub group_id: GroupId,
    pub original: EntityId,
    pub replacement: Option<EntityId>,
    pub stage: Stage,
    pub go_live_date: Option<NaiveDate>,
    pub metadata: EdgeMetadata,
}

impl NewEdge {
    pub(crate) fn with_id(self, id: EdgeId) -> Edge {
        Edge {
            id,
            group_id: self.group_id,
            original: self.original,
            replacement: self.replacement,
            stage: self.stage,
            go_live_date: self.go_live_date,
            metadata: self.metadata,
        }
    }
}

/// Copy of an edge taken when it reached a terminal stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedEdge {
    pub edge: Edge,
    pub archived_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(replacement: Option<&str>, pending: bool) -> Edge {
        let now = Utc::now();
        Edge {
            id: EdgeId(1),
            group_id: GroupId(1),
            original: EntityId::new_unchecked("A"),
            replacement: replacement.map(EntityId::new_unchecked),
            stage: Stage::PendingClinicalReadiness,
            go_live_date: None,
            metadata: EdgeMetadata {
                pending,
                created_at: now,
                updated_at: now,
                external_ref: None,
            },
        }
    }

    #[test]
    fn kind_follows_replacement_shape() {
        assert_eq!(edge(Some("B"), false).kind(), EdgeKind::Standard);
        assert_eq!(edge(Some("PENDING***X"), true).kind(), EdgeKind::Pending);
        assert_eq!(edge(None, false).kind(), EdgeKind::Discontinue);
    }

    #[test]
    fn real_replacement_hides_placeholders() {
        assert!(edge(Some("PENDING***X"), true).real_replacement().is_none());
        assert_eq!(
            edge(Some("B"), false).real_replacement().map(EntityId::as_str),
            Some("B")
        );
    }

    #[test]
    fn discontinue_label() {
        assert_eq!(edge(None, false).replacement_label(), "NO REPLACEMENT");
    }
}
