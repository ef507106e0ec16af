//! Stage lifecycle rules.
//!
//! # Overview
//!
//! Every stage change on an edge goes through [`StageTransitionHelper`]. The
//! helper is pure: it looks at the edge, the requested stage and a small
//! [`TransitionContext`] and returns a [`TransitionDecision`]. Nothing is
//! mutated here; the coordinator applies accepted decisions.
//!
//! # Adjacency
//!
//! ```text
//! PendingItemNumber -> PendingClinicalReadiness -> TrackingItemTransition -> TrackingCompleted
//!         \                       \                         \
//!          +-----------------------+-------------------------+--> TrackingDiscontinued -> TrackingCompleted
//!          +-----------------------+-------------------------+--> Deleted
//! ```
//!
//! `TrackingCompleted` and `Deleted` are terminal. The only way out of
//! `Deleted` is [`StageTransitionHelper::restore`], an administrative override.
//!
//! # Check order
//!
//! Rejections are reported in a fixed order so that the same input always
//! yields the same reason:
//!
//! 1. terminal source
//! 2. identity move (accepted, no change)
//! 3. backward move
//! 4. non-adjacent forward move
//! 5. locked edge kind
//! 6. missing go-live date
//! 7. unresolved pending members

#![allow(clippy::module_name_repetitions)]

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::model::{ArchivedEdge, Edge, EdgeKind, Stage};

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Why a stage change was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StageRejection {
    #[error("cannot move backward from {from} to {to}")]
    BackwardTransition { from: Stage, to: Stage },

    #[error("{to} is not reachable from {from} in one step")]
    NotAdjacent { from: Stage, to: Stage },

    #[error("{kind:?} edge cannot enter {to}")]
    StageLocked { kind: EdgeKind, to: Stage },

    #[error("{to} requires an expected go-live date")]
    MissingGoLiveDate { to: Stage },

    #[error("{count} pending member(s) must be resolved before tracking_completed")]
    PendingMembersUnresolved { count: usize },

    #[error("{from} is terminal")]
    InvalidFromTerminal { from: Stage },
}

impl StageRejection {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BackwardTransition { .. } => ErrorCode::BackwardTransition,
            Self::NotAdjacent { .. } => ErrorCode::NotAdjacent,
            Self::StageLocked { .. } => ErrorCode::StageLocked,
            Self::MissingGoLiveDate { .. } => ErrorCode::MissingGoLiveDate,
            Self::PendingMembersUnresolved { .. } => ErrorCode::PendingMembersUnresolved,
            Self::InvalidFromTerminal { .. } => ErrorCode::InvalidFromTerminal,
        }
    }
}

/// Outcome of evaluating a requested stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionDecision {
    Accept { final_stage: Stage },
    Reject(StageRejection),
}

impl TransitionDecision {
    #[must_use]
    pub const fn is_accept(&self) -> bool {
        matches!(self, Self::Accept { .. })
    }

    /// Convert into a `Result` for `?` chaining.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason when the decision is `Reject`.
    pub fn into_result(self) -> Result<Stage, StageRejection> {
        match self {
            Self::Accept { final_stage } => Ok(final_stage),
            Self::Reject(reason) => Err(reason),
        }
    }
}

/// Facts about the edge's surroundings that the rules depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionContext {
    /// Go-live date after applying the candidate row (candidate value first,
    /// then the edge's stored one).
    pub go_live_date: Option<NaiveDate>,
    /// Unresolved pending members in the edge's group.
    pub unresolved_pending: usize,
}

// ---------------------------------------------------------------------------
// StageTransitionHelper
// ---------------------------------------------------------------------------

/// Pure evaluator of stage changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTransitionHelper {
    default_stage: Stage,
}

impl Default for StageTransitionHelper {
    fn default() -> Self {
        Self::new(Stage::PendingClinicalReadiness)
    }
}

impl StageTransitionHelper {
    /// `default_stage` is the entry stage for standard edges.
    #[must_use]
    pub const fn new(default_stage: Stage) -> Self {
        Self { default_stage }
    }

    #[must_use]
    pub const fn default_stage(&self) -> Stage {
        self.default_stage
    }

    /// One-step forward moves out of `from`.
    #[must_use]
    pub const fn is_adjacent(from: Stage, to: Stage) -> bool {
        use Stage::{
            Deleted, PendingClinicalReadiness, PendingItemNumber, TrackingCompleted,
            TrackingDiscontinued, TrackingItemTransition,
        };
        if from.is_terminal() {
            return false;
        }
        matches!(
            (from, to),
            (PendingItemNumber, PendingClinicalReadiness)
                | (PendingClinicalReadiness, TrackingItemTransition)
                | (TrackingItemTransition | TrackingDiscontinued, TrackingCompleted)
                | (_, TrackingDiscontinued | Deleted)
        ) && from.rank() != to.rank()
    }

    /// Stages reachable from `stage` in one step.
    #[must_use]
    pub fn allowed_targets(stage: Stage) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|to| Self::is_adjacent(stage, *to))
            .collect()
    }

    /// Evaluate moving `edge` to `requested`.
    #[must_use]
    pub fn evaluate(&self, edge: &Edge, requested: Stage, ctx: &TransitionContext) -> TransitionDecision {
        Self::evaluate_from(edge.stage, edge.kind(), requested, ctx)
    }

    fn evaluate_from(
        current: Stage,
        kind: EdgeKind,
        requested: Stage,
        ctx: &TransitionContext,
    ) -> TransitionDecision {
        if current.is_terminal() {
            return TransitionDecision::Reject(StageRejection::InvalidFromTerminal { from: current });
        }
        if requested == current {
            return TransitionDecision::Accept { final_stage: current };
        }
        if requested < current
            && !matches!(requested, Stage::Deleted | Stage::TrackingDiscontinued)
        {
            return TransitionDecision::Reject(StageRejection::BackwardTransition {
                from: current,
                to: requested,
            });
        }
        if !Self::is_adjacent(current, requested) {
            return TransitionDecision::Reject(StageRejection::NotAdjacent {
                from: current,
                to: requested,
            });
        }
        if Self::is_locked(kind, requested) {
            return TransitionDecision::Reject(StageRejection::StageLocked { kind, to: requested });
        }
        Self::check_requirements(requested, ctx)
    }

    /// Discontinue markers never enter the progression stages; placeholders
    /// stay at `PendingItemNumber` until promoted.
    const fn is_locked(kind: EdgeKind, requested: Stage) -> bool {
        match kind {
            EdgeKind::Standard => false,
            EdgeKind::Discontinue => matches!(
                requested,
                Stage::PendingItemNumber | Stage::PendingClinicalReadiness | Stage::TrackingItemTransition
            ),
            EdgeKind::Pending => matches!(
                requested,
                Stage::PendingClinicalReadiness
                    | Stage::TrackingItemTransition
                    | Stage::TrackingCompleted
            ),
        }
    }

    fn check_requirements(requested: Stage, ctx: &TransitionContext) -> TransitionDecision {
        if requested.requires_go_live() && ctx.go_live_date.is_none() {
            return TransitionDecision::Reject(StageRejection::MissingGoLiveDate { to: requested });
        }
        if requested == Stage::TrackingCompleted && ctx.unresolved_pending > 0 {
            return TransitionDecision::Reject(StageRejection::PendingMembersUnresolved {
                count: ctx.unresolved_pending,
            });
        }
        TransitionDecision::Accept { final_stage: requested }
    }

    /// Entry stage for a new edge of `kind`.
    ///
    /// A requested stage is evaluated as a transition from the default entry
    /// stage. New edges never start terminal.
    #[must_use]
    pub fn initial_stage(
        &self,
        kind: EdgeKind,
        requested: Option<Stage>,
        ctx: &TransitionContext,
    ) -> TransitionDecision {
        let entry = match kind {
            EdgeKind::Discontinue => Stage::TrackingDiscontinued,
            EdgeKind::Pending => Stage::PendingItemNumber,
            EdgeKind::Standard => self.default_stage,
        };
        match requested {
            None => TransitionDecision::Accept { final_stage: entry },
            Some(stage) if stage.is_terminal() => {
                TransitionDecision::Reject(StageRejection::StageLocked { kind, to: stage })
            }
            Some(stage) => Self::evaluate_from(entry, kind, stage, ctx),
        }
    }

    /// Administrative override out of `Deleted`.
    ///
    /// The final stage is adjusted to the edge's kind: discontinue markers
    /// come back as `TrackingDiscontinued`, placeholders as
    /// `PendingItemNumber`.
    #[must_use]
    pub fn restore(
        &self,
        archived: &ArchivedEdge,
        requested: Stage,
        ctx: &TransitionContext,
    ) -> TransitionDecision {
        let from = archived.edge.stage;
        if from != Stage::Deleted || requested.is_terminal() {
            return TransitionDecision::Reject(StageRejection::InvalidFromTerminal { from });
        }
        let final_stage = match archived.edge.kind() {
            EdgeKind::Discontinue => Stage::TrackingDiscontinued,
            EdgeKind::Pending => Stage::PendingItemNumber,
            EdgeKind::Standard => requested,
        };
        if final_stage.requires_go_live() && ctx.go_live_date.is_none() {
            return TransitionDecision::Reject(StageRejection::MissingGoLiveDate { to: final_stage });
        }
        TransitionDecision::Accept { final_stage }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
