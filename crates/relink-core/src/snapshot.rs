//! Serializable image of the whole engine state.
//!
//! The surrounding application owns persistence. It exports an
//! [`EngineSnapshot`] after applying a batch's deltas and hands it back on
//! start-up so the coordinator can be rebuilt without replaying history.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::conflicts::ConflictRecord;
use crate::error::ErrorCode;
use crate::model::{ArchivedEdge, Edge, EdgeId, EntityId, GroupId};
use crate::planner::Group;
use crate::store::StoreError;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Largest id or counter a snapshot may carry. Keeps ids exact in JSON
/// consumers that read numbers as `i64` and leaves headroom for allocation.
pub const MAX_SNAPSHOT_ID: u64 = u64::MAX >> 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_next_id")]
    pub next_edge_id: u64,
    #[serde(default = "default_next_id")]
    pub next_group_id: u64,
    #[serde(default)]
    pub retired_groups: BTreeSet<GroupId>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub archive: Vec<ArchivedEdge>,
    #[serde(default)]
    pub conflicts: Vec<ConflictRecord>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            next_edge_id: 1,
            next_group_id: 1,
            retired_groups: BTreeSet::new(),
            edges: Vec::new(),
            groups: Vec::new(),
            archive: Vec::new(),
            conflicts: Vec::new(),
        }
    }
}

const fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

const fn default_next_id() -> u64 {
    1
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("unsupported snapshot version {0} (expected {SNAPSHOT_VERSION})")]
    UnsupportedVersion(u32),

    #[error("edge {edge} references group {group}, which is not in the snapshot")]
    EdgeWithoutGroup { edge: EdgeId, group: GroupId },

    #[error("edge {edge} endpoint {entity} is not a member of group {group}")]
    MemberMismatch {
        edge: EdgeId,
        entity: EntityId,
        group: GroupId,
    },

    #[error("{entity} is a member of both group {first} and group {second}")]
    DuplicateMember {
        entity: EntityId,
        first: GroupId,
        second: GroupId,
    },

    #[error("group {0} has no live edges")]
    EmptyGroup(GroupId),

    #[error("{field} value {value} exceeds {MAX_SNAPSHOT_ID}")]
    IdOutOfRange { field: &'static str, value: u64 },

    #[error("group {group} lists pending edge {edge}, which is not a live placeholder edge of that group")]
    StalePending { group: GroupId, edge: EdgeId },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("malformed snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl SnapshotError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Store(err) => err.code(),
            Self::UnsupportedVersion(_)
            | Self::EdgeWithoutGroup { .. }
            | Self::MemberMismatch { .. }
            | Self::DuplicateMember { .. }
            | Self::EmptyGroup(_)
            | Self::IdOutOfRange { .. }
            | Self::StalePending { .. }
            | Self::Json(_) => ErrorCode::CorruptSnapshot,
        }
    }
}

impl EngineSnapshot {
    /// Parse and validate a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Json`] for malformed input and any
    /// [`EngineSnapshot::validate`] error.
    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_str(raw)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// # Errors
    ///
    /// Returns [`SnapshotError::Json`] if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that edges and groups agree.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.version));
        }
        self.check_id_ranges()?;

        let mut owner: BTreeMap<&EntityId, GroupId> = BTreeMap::new();
        let mut by_id: BTreeMap<GroupId, &Group> = BTreeMap::new();
        for group in &self.groups {
            by_id.insert(group.id, group);
            for member in &group.members {
                if let Some(first) = owner.insert(member, group.id) {
                    return Err(SnapshotError::DuplicateMember {
                        entity: member.clone(),
                        first,
                        second: group.id,
                    });
                }
            }
        }

        let mut populated = BTreeSet::new();
        for edge in &self.edges {
            let group = by_id.get(&edge.group_id).ok_or(SnapshotError::EdgeWithoutGroup {
                edge: edge.id,
                group: edge.group_id,
            })?;
            for entity in std::iter::once(&edge.original).chain(edge.real_replacement()) {
                if !group.members.contains(entity) {
                    return Err(SnapshotError::MemberMismatch {
                        edge: edge.id,
                        entity: entity.clone(),
                        group: edge.group_id,
                    });
                }
            }
            populated.insert(edge.group_id);
        }

        if let Some(empty) = by_id.keys().find(|id| !populated.contains(*id)) {
            return Err(SnapshotError::EmptyGroup(*empty));
        }
        self.check_pending()
    }

    fn check_id_ranges(&self) -> Result<(), SnapshotError> {
        let ids = [
            ("next_edge_id", self.next_edge_id),
            ("next_group_id", self.next_group_id),
        ]
        .into_iter()
        .chain(self.edges.iter().map(|e| ("edge id", e.id.0)))
        .chain(self.archive.iter().map(|a| ("archived edge id", a.edge.id.0)))
        .chain(self.groups.iter().map(|g| ("group id", g.id.0)))
        .chain(self.retired_groups.iter().map(|g| ("retired group id", g.0)))
        .chain(self.conflicts.iter().map(|c| ("conflict record id", c.record_id)));

        for (field, value) in ids {
            if value > MAX_SNAPSHOT_ID {
                return Err(SnapshotError::IdOutOfRange { field, value });
            }
        }
        Ok(())
    }

    /// Every pending entry must point at a live placeholder edge in its group.
    fn check_pending(&self) -> Result<(), SnapshotError> {
        let edges: BTreeMap<EdgeId, &Edge> = self.edges.iter().map(|e| (e.id, e)).collect();
        for group in &self.groups {
            for pending in &group.pending {
                let live = edges.get(&pending.edge_id).is_some_and(|edge| {
                    edge.group_id == group.id
                        && edge.metadata.pending
                        && edge.original == pending.original
                        && edge.replacement.as_ref() == Some(&pending.placeholder)
                });
                if !live {
                    return Err(SnapshotError::StalePending {
                        group: group.id,
                        edge: pending.edge_id,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchCoordinator, CandidateEdge};
    use crate::config::EngineConfig;
    use crate::model::{EdgeMetadata, Stage};
    use crate::planner::PendingMember;
    use chrono::Utc;

    fn edge(id: u64, group: u64, original: &str, replacement: &str) -> Edge {
        let now = Utc::now();
        Edge {
            id: EdgeId(id),
            group_id: GroupId(group),
            original: EntityId::new_unchecked(original),
            replacement: Some(EntityId::new_unchecked(replacement)),
            stage: Stage::PendingClinicalReadiness,
            go_live_date: None,
            metadata: EdgeMetadata {
                pending: false,
                created_at: now,
                updated_at: now,
                external_ref: None,
            },
        }
    }

    fn group(id: u64, members: &[&str]) -> Group {
        Group {
            id: GroupId(id),
            members: members.iter().map(|m| EntityId::new_unchecked(*m)).collect(),
            pending: Vec::new(),
            conflict_flags: BTreeSet::new(),
        }
    }

    #[test]
    fn empty_json_is_a_valid_snapshot() {
        let snapshot = EngineSnapshot::from_json("{}").expect("parse");
        assert_eq!(snapshot, EngineSnapshot::default());
    }

    #[test]
    fn edge_outside_its_group_is_rejected() {
        let snapshot = EngineSnapshot {
            edges: vec![edge(1, 1, "A", "B")],
            groups: vec![group(1, &["A"])],
            ..EngineSnapshot::default()
        };
        let err = snapshot.validate().expect_err("B is missing");
        assert!(matches!(err, SnapshotError::MemberMismatch { .. }));
        assert_eq!(err.code(), ErrorCode::CorruptSnapshot);
    }

    #[test]
    fn member_in_two_groups_is_rejected() {
        let snapshot = EngineSnapshot {
            edges: vec![edge(1, 1, "A", "B"), edge(2, 2, "C", "D")],
            groups: vec![group(1, &["A", "B"]), group(2, &["B", "C", "D"])],
            ..EngineSnapshot::default()
        };
        assert!(matches!(
            snapshot.validate(),
            Err(SnapshotError::DuplicateMember { .. })
        ));
    }

    #[test]
    fn ids_past_the_ceiling_are_rejected() {
        let snapshot = EngineSnapshot {
            edges: vec![edge(u64::MAX, 1, "A", "B")],
            groups: vec![group(1, &["A", "B"])],
            ..EngineSnapshot::default()
        };
        let err = snapshot.validate().expect_err("edge id overflows");
        assert!(matches!(
            err,
            SnapshotError::IdOutOfRange { field: "edge id", value: u64::MAX }
        ));
        assert_eq!(err.code(), ErrorCode::CorruptSnapshot);

        let raw = format!(r#"{{"next_group_id": {}}}"#, u64::MAX);
        assert!(matches!(
            EngineSnapshot::from_json(&raw),
            Err(SnapshotError::IdOutOfRange { field: "next_group_id", .. })
        ));
    }

    #[test]
    fn largest_allowed_ids_hydrate() {
        let snapshot = EngineSnapshot {
            edges: vec![edge(MAX_SNAPSHOT_ID, MAX_SNAPSHOT_ID, "A", "B")],
            groups: vec![group(MAX_SNAPSHOT_ID, &["A", "B"])],
            ..EngineSnapshot::default()
        };
        let coordinator =
            BatchCoordinator::hydrate(EngineConfig::default(), snapshot).expect("hydrate");
        assert_eq!(coordinator.snapshot().edges.len(), 1);
    }

    #[test]
    fn counters_skip_retired_groups_and_archived_edges() {
        let mut archived = edge(9, 3, "X", "Y");
        archived.stage = Stage::Deleted;
        let snapshot = EngineSnapshot::from_json(
            &serde_json::json!({
                "retired_groups": [1, 2],
                "archive": [{"edge": archived, "archived_at": Utc::now()}],
            })
            .to_string(),
        )
        .expect("valid snapshot");

        let mut coordinator =
            BatchCoordinator::hydrate(EngineConfig::default(), snapshot).expect("hydrate");
        let report = coordinator
            .submit_batch(&[CandidateEdge::new("A", "B")])
            .expect("batch");
        let row = &report.rows[0];
        assert_eq!(row.group_id, Some(GroupId(3)));
        assert_eq!(row.edge_id, Some(EdgeId(10)));
    }

    #[test]
    fn stale_pending_entry_is_rejected() {
        let mut snapshot = EngineSnapshot {
            edges: vec![edge(1, 1, "A", "B")],
            groups: vec![group(1, &["A", "B"])],
            ..EngineSnapshot::default()
        };
        snapshot.groups[0].pending.push(PendingMember {
            placeholder: EntityId::new_unchecked("PENDING***1"),
            original: EntityId::new_unchecked("A"),
            edge_id: EdgeId(7),
            added_at: Utc::now(),
        });
        let err = snapshot.validate().expect_err("edge 7 does not exist");
        assert!(matches!(
            err,
            SnapshotError::StalePending { group: GroupId(1), edge: EdgeId(7) }
        ));

        // An entry pointing at a real, non-pending edge is just as stale.
        snapshot.groups[0].pending[0].edge_id = EdgeId(1);
        assert!(matches!(
            snapshot.validate(),
            Err(SnapshotError::StalePending { edge: EdgeId(1), .. })
        ));
    }

    #[test]
    fn live_pending_entry_is_accepted() {
        let mut placeholder = edge(2, 1, "A", "PENDING***1");
        placeholder.metadata.pending = true;
        let mut snapshot = EngineSnapshot {
            edges: vec![edge(1, 1, "A", "B"), placeholder],
            groups: vec![group(1, &["A", "B"])],
            ..EngineSnapshot::default()
        };
        snapshot.groups[0].pending.push(PendingMember {
            placeholder: EntityId::new_unchecked("PENDING***1"),
            original: EntityId::new_unchecked("A"),
            edge_id: EdgeId(2),
            added_at: Utc::now(),
        });
        snapshot.validate().expect("pending entry matches edge 2");
    }

    #[test]
    fn wrong_version_is_rejected() {
        let err = EngineSnapshot::from_json(r#"{"version": 9}"#).expect_err("version");
        assert!(matches!(err, SnapshotError::UnsupportedVersion(9)));
    }
}
