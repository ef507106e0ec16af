//! Append-only log of structural conflicts for human review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::{Classification, ConflictKind};
use crate::model::{EntityId, GroupId};

/// One detected conflict. Records are never mutated or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub record_id: u64,
    /// `None` for conflicts rejected before a group was assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    pub entity: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<EntityId>,
    pub conflict_kind: ConflictKind,
    pub degree_out: usize,
    pub degree_in: usize,
    pub detected_at: DateTime<Utc>,
    pub detail: String,
}

/// Query filter for [`ConflictLog::list`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictFilter {
    pub group_id: Option<GroupId>,
    pub entity: Option<EntityId>,
    pub kind: Option<ConflictKind>,
    pub since: Option<DateTime<Utc>>,
}

impl ConflictFilter {
    #[must_use]
    pub fn matches(&self, record: &ConflictRecord) -> bool {
        self.group_id.is_none_or(|g| record.group_id == Some(g))
            && self.entity.as_ref().is_none_or(|e| {
                &record.entity == e || record.counterpart.as_ref() == Some(e)
            })
            && self.kind.is_none_or(|k| record.conflict_kind == k)
            && self.since.is_none_or(|t| record.detected_at >= t)
    }
}

/// Append-only conflict store owned by the coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictLog {
    records: Vec<ConflictRecord>,
}

impl ConflictLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from previously exported records.
    #[must_use]
    pub fn from_records(mut records: Vec<ConflictRecord>) -> Self {
        records.sort_by_key(|r| r.record_id);
        Self { records }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn next_id(&self) -> u64 {
        self.records.last().map_or(1, |r| r.record_id.saturating_add(1))
    }

    /// Append a record built from a classification and return its id.
    pub fn record(
        &mut self,
        group_id: Option<GroupId>,
        classification: &Classification,
        counterpart: Option<&EntityId>,
        detected_at: DateTime<Utc>,
    ) -> u64 {
        let record_id = self.next_id();
        let counterpart = counterpart
            .filter(|c| **c != classification.entity)
            .cloned();
        self.records.push(ConflictRecord {
            record_id,
            group_id,
            entity: classification.entity.clone(),
            counterpart,
            conflict_kind: classification.kind,
            degree_out: classification.degree_out,
            degree_in: classification.degree_in,
            detected_at,
            detail: classification.detail.clone(),
        });
        record_id
    }

    /// Records matching `filter`, oldest first.
    #[must_use]
    pub fn list(&self, filter: &ConflictFilter) -> Vec<ConflictRecord> {
        self.records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.records.iter()
    }
}
