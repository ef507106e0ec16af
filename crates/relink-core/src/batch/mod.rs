//! Batch submission types and the coordinator that applies them.
//!
//! A batch is an ordered list of [`CandidateEdge`] rows. Each row is checked
//! in full before anything is mutated and then either committed or rejected
//! on its own; rows are never rolled back across the batch. The
//! [`BatchReport`] lists one [`RowReport`] per input row in input order,
//! followed by the [`StoreDelta`]s and [`RefreshTrigger`]s the accepted rows
//! produced.

pub mod coordinator;
pub mod delta;
pub mod trigger;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::graph::ConflictKind;
use crate::model::{EdgeId, GroupId, Stage};
use crate::transition::StageRejection;

pub use coordinator::{BatchCoordinator, GroupSnapshot, SplitReport};
pub use delta::{DeltaOp, StoreDelta};
pub use trigger::{ChannelSink, NullSink, RefreshTrigger, TriggerSink};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One submitted row, as it arrives from an upload.
///
/// Ids are raw strings; the coordinator trims them and recognises
/// placeholders and "no replacement" sentinels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEdge {
    pub original_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_live_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_placeholder: Option<String>,
    /// Administrative override: bring a deleted edge back.
    #[serde(default)]
    pub restore: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
}

impl CandidateEdge {
    /// `original -> replacement`.
    #[must_use]
    pub fn new(original: &str, replacement: &str) -> Self {
        Self {
            original_id: original.to_string(),
            replacement_id: Some(replacement.to_string()),
            ..Self::default()
        }
    }

    /// Discontinue `original` with no replacement.
    #[must_use]
    pub fn discontinue(original: &str) -> Self {
        Self {
            original_id: original.to_string(),
            ..Self::default()
        }
    }

    /// `original -> placeholder` awaiting an item number.
    #[must_use]
    pub fn pending(original: &str, placeholder: &str) -> Self {
        Self {
            original_id: original.to_string(),
            pending_placeholder: Some(placeholder.to_string()),
            ..Self::default()
        }
    }

    /// Replace `placeholder` on `original`'s pending edge with `real`.
    #[must_use]
    pub fn promote(original: &str, placeholder: &str, real: &str) -> Self {
        Self {
            original_id: original.to_string(),
            replacement_id: Some(real.to_string()),
            pending_placeholder: Some(placeholder.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_stage(mut self, stage: Stage) -> Self {
        self.requested_stage = Some(stage);
        self
    }

    #[must_use]
    pub const fn with_go_live(mut self, date: NaiveDate) -> Self {
        self.go_live_date = Some(date);
        self
    }

    #[must_use]
    pub const fn restoring(mut self) -> Self {
        self.restore = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Per-row result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Accepted,
    AcceptedWithConflict { kind: ConflictKind },
    RejectedSelfLoop,
    RejectedStage { reason: StageRejection },
    RejectedDuplicate,
    RejectedInvalid { reason: String },
    RejectedNotFound,
}

impl RowOutcome {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted | Self::AcceptedWithConflict { .. })
    }

    /// Error code for a rejected row; `None` when the row was accepted.
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Accepted | Self::AcceptedWithConflict { .. } => None,
            Self::RejectedSelfLoop => Some(ErrorCode::SelfLoop),
            Self::RejectedStage { reason } => Some(reason.code()),
            Self::RejectedDuplicate => Some(ErrorCode::DuplicateActiveEdge),
            Self::RejectedInvalid { .. } => Some(ErrorCode::InvalidCandidate),
            Self::RejectedNotFound => Some(ErrorCode::EdgeNotFound),
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::AcceptedWithConflict { .. } => "accepted_with_conflict",
            Self::RejectedSelfLoop => "rejected_self_loop",
            Self::RejectedStage { .. } => "rejected_stage",
            Self::RejectedDuplicate => "rejected_duplicate",
            Self::RejectedInvalid { .. } => "rejected_invalid",
            Self::RejectedNotFound => "rejected_not_found",
        }
    }
}

/// Result for one input row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowReport {
    /// Zero-based position in the submitted batch.
    pub index: usize,
    pub original_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_id: Option<String>,
    #[serde(flatten)]
    pub outcome: RowOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<EdgeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<u64>,
}

/// Everything a batch produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub rows: Vec<RowReport>,
    pub deltas: Vec<StoreDelta>,
    pub triggers: Vec<RefreshTrigger>,
}

impl BatchReport {
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.rows.iter().filter(|r| r.outcome.is_accepted()).count()
    }

    #[must_use]
    pub fn rejected(&self) -> usize {
        self.rows.len() - self.accepted()
    }

    #[must_use]
    pub fn conflicts(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r.outcome, RowOutcome::AcceptedWithConflict { .. }))
            .count()
    }

    /// Append another report's rows, deltas and triggers.
    pub fn extend(&mut self, other: Self) {
        self.rows.extend(other.rows);
        self.deltas.extend(other.deltas);
        self.triggers.extend(other.triggers);
    }
}
