//! Single writer for the edge store.
//!
//! # Overview
//!
//! [`BatchCoordinator`] owns the [`EdgeStore`], the [`GroupPlanner`], the
//! conflict log and the archive table. Every mutation of engine state goes
//! through it. Rows are processed one at a time in input order:
//!
//! 1. resolve raw ids (trim, placeholders, "no replacement" sentinels)
//! 2. reject self-loops
//! 3. dispatch to restore, promotion, stage change or insertion
//! 4. validate everything the chosen path needs
//! 5. mutate, emitting [`StoreDelta`]s in commit order
//!
//! A row that fails any check leaves no trace except its report line (and a
//! conflict record for self-loops).
//!
//! # Conflicts
//!
//! Reciprocal, Chain and ManyToMany candidates are committed, recorded in the
//! [`ConflictLog`] and reported as `AcceptedWithConflict`. After every
//! mutation the group's conflict flags are recomputed from a fresh scan, so a
//! flag clears once the offending edges are gone.

#![allow(clippy::module_name_repetitions)]

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::delta::{DeltaOp, StoreDelta};
use super::trigger::{NullSink, RefreshTrigger, TriggerSink};
use super::{BatchReport, CandidateEdge, RowOutcome, RowReport};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::conflicts::{ConflictFilter, ConflictLog, ConflictRecord};
use crate::engine::EngineError;
use crate::graph::{Classification, ConflictKind, RelationGraph};
use crate::model::{
    ArchivedEdge, Edge, EdgeId, EdgeKind, EdgeMetadata, EntityId, EntitySide, GroupId, NewEdge,
    Stage,
};
use crate::planner::{Assignment, GroupPlanner, PendingMember};
use crate::snapshot::{EngineSnapshot, SnapshotError, SNAPSHOT_VERSION};
use crate::store::EdgeStore;
use crate::transition::{StageRejection, StageTransitionHelper, TransitionContext};

// ---------------------------------------------------------------------------
// Row resolution
// ---------------------------------------------------------------------------

/// Replacement side of a resolved row.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Real(EntityId),
    Placeholder(EntityId),
    Discontinue,
}

impl Target {
    /// Replacement that takes part in grouping and classification.
    const fn real(&self) -> Option<&EntityId> {
        match self {
            Self::Real(id) => Some(id),
            Self::Placeholder(_) | Self::Discontinue => None,
        }
    }

    /// Value stored in `Edge::replacement`.
    const fn stored(&self) -> Option<&EntityId> {
        match self {
            Self::Real(id) | Self::Placeholder(id) => Some(id),
            Self::Discontinue => None,
        }
    }

    const fn kind(&self) -> EdgeKind {
        match self {
            Self::Real(_) => EdgeKind::Standard,
            Self::Placeholder(_) => EdgeKind::Pending,
            Self::Discontinue => EdgeKind::Discontinue,
        }
    }
}

#[derive(Debug, Clone)]
struct ResolvedRow {
    original: EntityId,
    target: Target,
    /// Placeholder being replaced when the row is a promotion.
    promote_from: Option<EntityId>,
    requested_stage: Option<Stage>,
    go_live_date: Option<NaiveDate>,
    restore: bool,
    external_ref: Option<String>,
}

/// What an accepted row did.
#[derive(Debug, Clone, Copy, Default)]
struct Applied {
    edge_id: Option<EdgeId>,
    group_id: Option<GroupId>,
    stage: Option<Stage>,
    conflict: Option<(ConflictKind, u64)>,
}

impl Applied {
    const fn for_edge(edge: &Edge) -> Self {
        Self {
            edge_id: Some(edge.id),
            group_id: Some(edge.group_id),
            stage: Some(edge.stage),
            conflict: None,
        }
    }
}

type RowResult = Result<Applied, RowOutcome>;

const fn stage_rejected(reason: StageRejection) -> RowOutcome {
    RowOutcome::RejectedStage { reason }
}

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// Read-only view of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub group_id: GroupId,
    pub members: Vec<EntityId>,
    pub edges: Vec<Edge>,
    pub pending: Vec<PendingMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_rollup: Option<Stage>,
    pub conflict_flags: BTreeSet<ConflictKind>,
    /// BLAKE3 hash of the sorted `(original, replacement, stage)` set.
    pub content_hash: String,
}

/// Result of an administrative split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitReport {
    pub source: GroupId,
    pub target: GroupId,
    pub moved_members: Vec<EntityId>,
    pub deltas: Vec<StoreDelta>,
    pub triggers: Vec<RefreshTrigger>,
}

// ---------------------------------------------------------------------------
// BatchCoordinator
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct BatchCoordinator {
    config: EngineConfig,
    transitions: StageTransitionHelper,
    store: EdgeStore,
    planner: GroupPlanner,
    conflicts: ConflictLog,
    archive: Vec<ArchivedEdge>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TriggerSink>,
}

impl BatchCoordinator {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            transitions: StageTransitionHelper::new(config.default_stage),
            config,
            store: EdgeStore::new(),
            planner: GroupPlanner::new(),
            conflicts: ConflictLog::new(),
            archive: Vec::new(),
            clock: Arc::new(SystemClock),
            sink: Arc::new(NullSink),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn TriggerSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &EdgeStore {
        &self.store
    }

    #[must_use]
    pub const fn planner(&self) -> &GroupPlanner {
        &self.planner
    }

    #[must_use]
    pub fn archive(&self) -> &[ArchivedEdge] {
        &self.archive
    }

    // -----------------------------------------------------------------------
    // Batch entry points
    // -----------------------------------------------------------------------

    /// Fail fast if a batch of `size` rows exceeds `max_batch_size`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BatchTooLarge`].
    pub const fn check_batch_size(&self, size: usize) -> Result<(), EngineError> {
        if size > self.config.max_batch_size {
            return Err(EngineError::BatchTooLarge {
                size,
                max: self.config.max_batch_size,
            });
        }
        Ok(())
    }

    /// Apply `candidates` in order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BatchTooLarge`] before touching any state when
    /// the batch exceeds `max_batch_size`. Row-level failures are reported in
    /// the [`BatchReport`], not as errors.
    #[instrument(skip(self, candidates), fields(rows = candidates.len()))]
    pub fn submit_batch(&mut self, candidates: &[CandidateEdge]) -> Result<BatchReport, EngineError> {
        self.check_batch_size(candidates.len())?;

        let mut report = BatchReport::default();
        for (index, candidate) in candidates.iter().enumerate() {
            report.extend(self.process_row(index, candidate));
        }

        info!(
            rows = report.rows.len(),
            accepted = report.accepted(),
            rejected = report.rejected(),
            conflicts = report.conflicts(),
            deltas = report.deltas.len(),
            "batch applied"
        );
        Ok(report)
    }

    /// Apply one row. The returned report holds exactly one row.
    pub fn process_row(&mut self, index: usize, candidate: &CandidateEdge) -> BatchReport {
        let now = self.clock.now();
        let mut out = BatchReport::default();

        let result = self
            .resolve(candidate, self.clock.today())
            .map_err(|reason| RowOutcome::RejectedInvalid { reason })
            .and_then(|row| self.apply_row(&row, now, &mut out));

        let mut row = RowReport {
            index,
            original_id: candidate.original_id.trim().to_string(),
            replacement_id: candidate
                .replacement_id
                .as_deref()
                .map(|r| r.trim().to_string()),
            outcome: RowOutcome::Accepted,
            edge_id: None,
            group_id: None,
            stage: None,
            conflict_id: None,
        };
        match result {
            Ok(applied) => {
                row.edge_id = applied.edge_id;
                row.group_id = applied.group_id;
                row.stage = applied.stage;
                if let Some((kind, record)) = applied.conflict {
                    row.outcome = RowOutcome::AcceptedWithConflict { kind };
                    row.conflict_id = Some(record);
                }
            }
            Err(outcome) => row.outcome = outcome,
        }

        debug!(
            row = index,
            original = %row.original_id,
            outcome = row.outcome.as_str(),
            "row processed"
        );
        out.rows.push(row);
        out
    }

    fn resolve(&self, candidate: &CandidateEdge, today: NaiveDate) -> Result<ResolvedRow, String> {
        let original = EntityId::new(&candidate.original_id)
            .map_err(|_| "original id is empty".to_string())?;
        if self.config.is_placeholder(original.as_str())
            || self.config.is_discontinue_sentinel(original.as_str())
        {
            return Err(format!("{original} is not allowed as an original"));
        }

        let replacement = candidate
            .replacement_id
            .as_deref()
            .filter(|raw| !self.config.is_discontinue_sentinel(raw));
        let explicit = candidate
            .pending_placeholder
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());
        let entity = |raw: &str| {
            EntityId::new(raw).map_err(|_| "replacement id is empty".to_string())
        };

        let (target, promote_from) = match (replacement, explicit) {
            (Some(raw), Some(_)) if self.config.is_placeholder(raw) => {
                return Err("replacement and pending_placeholder are both placeholders".to_string());
            }
            (Some(raw), Some(placeholder)) => (
                Target::Real(entity(raw)?),
                Some(EntityId::new_unchecked(placeholder)),
            ),
            (Some(raw), None) if self.config.is_placeholder(raw) => {
                (Target::Placeholder(entity(raw)?), None)
            }
            (Some(raw), None) => (Target::Real(entity(raw)?), None),
            (None, Some(placeholder)) => (Target::Placeholder(EntityId::new_unchecked(placeholder)), None),
            (None, None) => (Target::Discontinue, None),
        };

        if candidate.restore && promote_from.is_some() {
            return Err("a restore row cannot also promote a placeholder".to_string());
        }

        if let Some(date) = candidate.go_live_date {
            let (earliest, latest) = self.config.go_live_window(today);
            if date < earliest || date > latest {
                return Err(format!(
                    "go-live date {date} is outside {earliest}..={latest}"
                ));
            }
        }

        Ok(ResolvedRow {
            original,
            target,
            promote_from,
            requested_stage: candidate.requested_stage,
            go_live_date: candidate.go_live_date,
            restore: candidate.restore,
            external_ref: candidate.external_ref.clone(),
        })
    }

    fn apply_row(&mut self, row: &ResolvedRow, now: DateTime<Utc>, out: &mut BatchReport) -> RowResult {
        if row.target.real() == Some(&row.original) {
            self.record_self_loop(row, now);
            return Err(RowOutcome::RejectedSelfLoop);
        }
        if row.restore {
            return self.restore_row(row, now, out);
        }
        if let Some(placeholder) = &row.promote_from {
            return self.promote_row(row, placeholder, now, out);
        }
        if let Some(edge_id) = self.live_edge_for(row) {
            if row.requested_stage.is_none() && row.go_live_date.is_none() {
                return Err(RowOutcome::RejectedDuplicate);
            }
            return self.change_stage(edge_id, row, now, out);
        }
        if let (Some(requested), Some(archived)) = (row.requested_stage, self.latest_archived(row)) {
            // A stage request against an archived pair addresses the archived
            // edge, which is terminal. Only `restore` brings it back.
            let ctx = TransitionContext {
                go_live_date: row.go_live_date,
                unresolved_pending: 0,
            };
            self.transitions
                .evaluate(&archived.edge, requested, &ctx)
                .into_result()
                .map_err(stage_rejected)?;
        }
        self.insert_row(row, now, out)
    }

    fn archived_pairs<'s>(&'s self, row: &'s ResolvedRow) -> impl Iterator<Item = &'s ArchivedEdge> + 's {
        let stored = row.target.stored();
        self.archive
            .iter()
            .rev()
            .filter(move |a| a.edge.original == row.original && a.edge.replacement.as_ref() == stored)
    }

    fn latest_archived<'s>(&'s self, row: &'s ResolvedRow) -> Option<&'s ArchivedEdge> {
        self.archived_pairs(row).next()
    }

    /// Newest deleted copy of the pair, else the newest archived copy so a
    /// completed-only history still reports why it cannot be restored.
    fn restore_candidate<'s>(&'s self, row: &'s ResolvedRow) -> Option<&'s ArchivedEdge> {
        self.archived_pairs(row)
            .find(|a| a.edge.stage == Stage::Deleted)
            .or_else(|| self.latest_archived(row))
    }

    fn live_edge_for(&self, row: &ResolvedRow) -> Option<EdgeId> {
        let group = self.planner.group_of(&row.original)?;
        self.store
            .get_pair(&row.original, row.target.stored(), group)
            .map(|edge| edge.id)
    }

    // -----------------------------------------------------------------------
    // Row paths
    // -----------------------------------------------------------------------

    fn change_stage(
        &mut self,
        edge_id: EdgeId,
        row: &ResolvedRow,
        now: DateTime<Utc>,
        out: &mut BatchReport,
    ) -> RowResult {
        let edge = self
            .store
            .get_edge(edge_id)
            .cloned()
            .ok_or(RowOutcome::RejectedNotFound)?;
        let requested = row.requested_stage.unwrap_or(edge.stage);
        let ctx = TransitionContext {
            go_live_date: row.go_live_date.or(edge.go_live_date),
            unresolved_pending: self.planner.pending_count(edge.group_id),
        };
        let final_stage = self
            .transitions
            .evaluate(&edge, requested, &ctx)
            .into_result()
            .map_err(stage_rejected)?;

        let date_changed = row.go_live_date.is_some() && row.go_live_date != edge.go_live_date;
        if final_stage == edge.stage && !date_changed {
            return Ok(Applied::for_edge(&edge));
        }

        let updated = self
            .store
            .update_stage(edge_id, final_stage, row.go_live_date, now)
            .map_err(|_| RowOutcome::RejectedNotFound)?
            .clone();
        debug!(edge = %edge_id, from = %edge.stage, to = %final_stage, "stage updated");
        out.deltas.push(StoreDelta::new(DeltaOp::UpdateStage, updated.clone()));

        let applied = Applied::for_edge(&updated);
        if final_stage.archives_edge() {
            self.archive_edge(updated, now, out);
        }
        Ok(applied)
    }

    fn insert_row(&mut self, row: &ResolvedRow, now: DateTime<Utc>, out: &mut BatchReport) -> RowResult {
        let ctx = TransitionContext {
            go_live_date: row.go_live_date,
            unresolved_pending: 0,
        };
        let stage = self
            .transitions
            .initial_stage(row.target.kind(), row.requested_stage, &ctx)
            .into_result()
            .map_err(stage_rejected)?;
        self.place_edge(row, stage, row.go_live_date, now, out)
    }

    fn restore_row(&mut self, row: &ResolvedRow, now: DateTime<Utc>, out: &mut BatchReport) -> RowResult {
        let archived = self
            .restore_candidate(row)
            .cloned()
            .ok_or(RowOutcome::RejectedNotFound)?;
        if self.live_edge_for(row).is_some() {
            return Err(RowOutcome::RejectedDuplicate);
        }

        let requested = row
            .requested_stage
            .unwrap_or_else(|| self.transitions.default_stage());
        let go_live = row.go_live_date.or(archived.edge.go_live_date);
        let ctx = TransitionContext {
            go_live_date: go_live,
            unresolved_pending: 0,
        };
        let stage = self
            .transitions
            .restore(&archived, requested, &ctx)
            .into_result()
            .map_err(stage_rejected)?;

        let restored = ResolvedRow {
            external_ref: row
                .external_ref
                .clone()
                .or_else(|| archived.edge.metadata.external_ref.clone()),
            ..row.clone()
        };
        info!(original = %row.original, stage = %stage, "restoring deleted edge");
        self.place_edge(&restored, stage, go_live, now, out)
    }

    fn promote_row(
        &mut self,
        row: &ResolvedRow,
        placeholder: &EntityId,
        now: DateTime<Utc>,
        out: &mut BatchReport,
    ) -> RowResult {
        let Target::Real(real) = &row.target else {
            return Err(RowOutcome::RejectedInvalid {
                reason: "promotion needs a real replacement".to_string(),
            });
        };
        let group = self
            .planner
            .group_of(&row.original)
            .ok_or(RowOutcome::RejectedNotFound)?;
        let pending = self
            .store
            .get_pair(&row.original, Some(placeholder), group)
            .filter(|edge| edge.metadata.pending)
            .cloned()
            .ok_or(RowOutcome::RejectedNotFound)?;
        if self.store.get_pair(&row.original, Some(real), group).is_some() {
            return Err(RowOutcome::RejectedDuplicate);
        }

        let assignment = self.planner.plan(&row.original, Some(real));
        let classification = {
            let touched = assignment.touched();
            let edges = touched
                .iter()
                .flat_map(|g| self.store.edges_in_group(*g))
                .filter(|edge| edge.id != pending.id);
            RelationGraph::from_edges(edges)
                .with_candidate(&row.original, Some(real))
                .classify_candidate(&row.original, Some(real))
        };

        let mut promoted = pending.clone();
        promoted.replacement = Some(real.clone());
        promoted.metadata.pending = false;
        let target_stage = row
            .requested_stage
            .unwrap_or(Stage::PendingClinicalReadiness);
        let ctx = TransitionContext {
            go_live_date: row.go_live_date.or(pending.go_live_date),
            unresolved_pending: self.planner.pending_count(group).saturating_sub(1),
        };
        let stage = self
            .transitions
            .evaluate(&promoted, target_stage, &ctx)
            .into_result()
            .map_err(stage_rejected)?;
        if stage.archives_edge() {
            return Err(stage_rejected(StageRejection::StageLocked {
                kind: EdgeKind::Standard,
                to: stage,
            }));
        }

        if let Assignment::Merge { winner, loser } = assignment {
            self.merge_groups(winner, loser, now, out);
        }
        let group = self.planner.commit(assignment, &row.original, Some(real));
        self.store
            .replace_replacement(pending.id, real.clone(), now)
            .map_err(|_| RowOutcome::RejectedDuplicate)?;
        self.planner.remove_pending(group, pending.id);
        let edge = self
            .store
            .update_stage(pending.id, stage, row.go_live_date, now)
            .map_err(|_| RowOutcome::RejectedNotFound)?
            .clone();
        info!(edge = %edge.id, placeholder = %placeholder, real = %real, "promoted placeholder");
        out.deltas.push(StoreDelta::new(DeltaOp::Promote, edge.clone()));

        let conflict = self.record_conflict(group, &classification, &row.original, Some(real), now);
        self.refresh_flags(group);
        self.emit(group, vec![row.original.clone(), real.clone()], out);

        Ok(Applied {
            conflict,
            ..Applied::for_edge(&edge)
        })
    }

    /// Plan, classify, key-check and commit a new edge.
    fn place_edge(
        &mut self,
        row: &ResolvedRow,
        stage: Stage,
        go_live_date: Option<NaiveDate>,
        now: DateTime<Utc>,
        out: &mut BatchReport,
    ) -> RowResult {
        let real = row.target.real();
        let assignment = self.planner.plan(&row.original, real);
        let touched = assignment.touched();

        let classification = RelationGraph::for_groups(&self.store, touched.iter().copied())
            .with_candidate(&row.original, real)
            .classify_candidate(&row.original, real);
        if classification.kind.blocks_commit() {
            return Err(RowOutcome::RejectedSelfLoop);
        }
        for group in &touched {
            self.store
                .check_insert(*group, &row.original, row.target.stored())
                .map_err(|err| {
                    debug!(error = %err, "edge key collision");
                    RowOutcome::RejectedDuplicate
                })?;
        }

        if let Assignment::Merge { winner, loser } = assignment {
            self.merge_groups(winner, loser, now, out);
        }
        let group = self.planner.commit(assignment, &row.original, real);
        let edge_id = self
            .store
            .insert(NewEdge {
                group_id: group,
                original: row.original.clone(),
                replacement: row.target.stored().cloned(),
                stage,
                go_live_date,
                metadata: EdgeMetadata {
                    pending: matches!(row.target, Target::Placeholder(_)),
                    created_at: now,
                    updated_at: now,
                    external_ref: row.external_ref.clone(),
                },
            })
            .map_err(|err| {
                warn!(error = %err, "insert failed after validation");
                RowOutcome::RejectedDuplicate
            })?;
        let edge = self
            .store
            .get_edge(edge_id)
            .cloned()
            .ok_or(RowOutcome::RejectedNotFound)?;
        out.deltas.push(StoreDelta::new(DeltaOp::Insert, edge.clone()));

        if let Target::Placeholder(placeholder) = &row.target {
            self.planner.add_pending(
                group,
                PendingMember {
                    placeholder: placeholder.clone(),
                    original: row.original.clone(),
                    edge_id,
                    added_at: now,
                },
            );
        }

        let conflict = self.record_conflict(group, &classification, &row.original, real, now);
        self.refresh_flags(group);
        let mut entities = vec![row.original.clone()];
        entities.extend(real.cloned());
        self.emit(group, entities, out);

        Ok(Applied {
            conflict,
            ..Applied::for_edge(&edge)
        })
    }

    // -----------------------------------------------------------------------
    // Shared mutation steps
    // -----------------------------------------------------------------------

    fn merge_groups(&mut self, winner: GroupId, loser: GroupId, now: DateTime<Utc>, out: &mut BatchReport) {
        let moved = self.store.reassign_group(loser, winner, now);
        for id in moved {
            if let Some(edge) = self.store.get_edge(id) {
                out.deltas.push(StoreDelta::new(DeltaOp::Regroup, edge.clone()));
            }
        }
    }

    /// Archive then remove a live edge that reached a terminal stage.
    fn archive_edge(&mut self, edge: Edge, now: DateTime<Utc>, out: &mut BatchReport) {
        let group = edge.group_id;
        out.deltas.push(StoreDelta::new(DeltaOp::Archive, edge.clone()));
        if let Some(removed) = self.store.remove(edge.id) {
            out.deltas.push(StoreDelta::new(DeltaOp::Remove, removed));
        }
        if edge.metadata.pending {
            self.planner.remove_pending(group, edge.id);
        }

        let mut entities = vec![edge.original.clone()];
        entities.extend(edge.real_replacement().cloned());
        debug!(edge = %edge.id, stage = %edge.stage, "archived edge");
        self.after_removal(group);
        self.archive.push(ArchivedEdge {
            edge,
            archived_at: now,
        });
        self.emit(group, entities, out);
    }

    fn after_removal(&mut self, group: GroupId) {
        let detached = self.planner.detach_unused(group, &self.store);
        if !detached.is_empty() {
            debug!(group = %group, detached = detached.len(), "detached members");
        }
        if self.planner.destroy_if_empty(group, &self.store) {
            info!(group = %group, "group retired");
            return;
        }
        self.refresh_flags(group);
    }

    fn refresh_flags(&mut self, group: GroupId) {
        let flags = RelationGraph::for_groups(&self.store, [group]).scan();
        self.planner.set_flags(group, flags);
    }

    fn record_conflict(
        &mut self,
        group: GroupId,
        classification: &Classification,
        original: &EntityId,
        replacement: Option<&EntityId>,
        now: DateTime<Utc>,
    ) -> Option<(ConflictKind, u64)> {
        if classification.is_clean() {
            return None;
        }
        let counterpart = if &classification.entity == original {
            replacement
        } else {
            Some(original)
        };
        let record = self
            .conflicts
            .record(Some(group), classification, counterpart, now);
        warn!(
            group = %group,
            entity = %classification.entity,
            kind = %classification.kind,
            record,
            "conflict committed for review"
        );
        Some((classification.kind, record))
    }

    fn record_self_loop(&mut self, row: &ResolvedRow, now: DateTime<Utc>) {
        let group = self.planner.group_of(&row.original);
        let classification = RelationGraph::for_groups(&self.store, group)
            .with_candidate(&row.original, Some(&row.original))
            .classify_candidate(&row.original, Some(&row.original));
        let record = self.conflicts.record(group, &classification, None, now);
        warn!(entity = %row.original, record, "self-loop rejected");
    }

    fn emit(&self, group: GroupId, entity_ids: Vec<EntityId>, out: &mut BatchReport) {
        let trigger = RefreshTrigger {
            group_id: group,
            entity_ids,
        };
        self.sink.send(trigger.clone());
        out.triggers.push(trigger);
    }

    // -----------------------------------------------------------------------
    // Administrative split
    // -----------------------------------------------------------------------

    /// Move `members` out of `group` into a fresh group.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Plan`] when the split is invalid; nothing is
    /// mutated in that case.
    #[instrument(skip(self, members), fields(members = members.len()))]
    pub fn split_group(&mut self, group: GroupId, members: &[EntityId]) -> Result<SplitReport, EngineError> {
        let plan = self.planner.split(group, members, &self.store)?;
        let now = self.clock.now();
        let target = self.planner.apply_split(&plan);
        self.store.move_edges(&plan.edges, target, now);

        let mut out = BatchReport::default();
        for id in &plan.edges {
            if let Some(edge) = self.store.get_edge(*id) {
                out.deltas.push(StoreDelta::new(DeltaOp::Regroup, edge.clone()));
            }
        }
        self.refresh_flags(group);
        self.refresh_flags(target);

        let moved_members: Vec<EntityId> = plan.members.iter().cloned().collect();
        let remaining: Vec<EntityId> = self
            .planner
            .group(group)
            .map(|g| g.members.iter().cloned().collect())
            .unwrap_or_default();
        self.emit(group, remaining, &mut out);
        self.emit(target, moved_members.clone(), &mut out);

        Ok(SplitReport {
            source: group,
            target,
            moved_members,
            deltas: out.deltas,
            triggers: out.triggers,
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn group_snapshot(&self, group: GroupId) -> Option<GroupSnapshot> {
        let g = self.planner.group(group)?;
        let edges: Vec<Edge> = self
            .store
            .edges_in_group(group)
            .into_iter()
            .cloned()
            .collect();
        Some(GroupSnapshot {
            group_id: group,
            members: g.members.iter().cloned().collect(),
            pending: g.pending.clone(),
            stage_rollup: GroupPlanner::stage_rollup(group, &self.store),
            conflict_flags: g.conflict_flags.clone(),
            content_hash: content_hash(&edges),
            edges,
        })
    }

    /// Which side(s) `entity` occupies in its group.
    #[must_use]
    pub fn entity_side(&self, entity: &EntityId) -> EntitySide {
        let Some(group) = self.planner.group_of(entity) else {
            return EntitySide::None;
        };
        let is_original = !self.store.edges_from(entity, group).is_empty();
        let is_replacement = self
            .store
            .edges_to(entity)
            .iter()
            .any(|edge| edge.group_id == group && !edge.metadata.pending);
        match (is_original, is_replacement) {
            (true, true) => EntitySide::Both,
            (true, false) => EntitySide::Original,
            (false, true) => EntitySide::Replacement,
            (false, false) => EntitySide::None,
        }
    }

    #[must_use]
    pub fn list_conflicts(&self, filter: &ConflictFilter) -> Vec<ConflictRecord> {
        self.conflicts.list(filter)
    }

    /// Groups currently touched by `candidates`, plus the raw entity ids.
    /// Used to compute lease keys before a batch runs.
    #[must_use]
    pub fn footprint(&self, candidates: &[CandidateEdge]) -> (BTreeSet<EntityId>, BTreeSet<GroupId>) {
        let entities: BTreeSet<EntityId> = candidates
            .iter()
            .flat_map(|c| {
                [
                    Some(c.original_id.as_str()),
                    c.replacement_id.as_deref(),
                    c.pending_placeholder.as_deref(),
                ]
            })
            .flatten()
            .filter_map(|raw| EntityId::new(raw).ok())
            .collect();
        let groups = entities
            .iter()
            .filter_map(|e| self.planner.group_of(e))
            .collect();
        (entities, groups)
    }

    // -----------------------------------------------------------------------
    // Snapshot / hydrate
    // -----------------------------------------------------------------------

    /// Export the full engine state.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            next_edge_id: self.store.next_id().0,
            next_group_id: self.planner.next_id(),
            retired_groups: self.planner.retired().clone(),
            edges: self.store.iter().into_iter().cloned().collect(),
            groups: self.planner.groups().cloned().collect(),
            archive: self.archive.clone(),
            conflicts: self.conflicts.iter().cloned().collect(),
        }
    }

    /// Rebuild a coordinator from an exported snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`SnapshotError`] if the snapshot is inconsistent.
    pub fn hydrate(config: EngineConfig, snapshot: EngineSnapshot) -> Result<Self, SnapshotError> {
        snapshot.validate()?;

        let mut coordinator = Self::new(config);
        let mut edges = snapshot.edges;
        edges.sort_by_key(|edge| edge.id);
        for edge in edges {
            coordinator.store.insert_existing(edge)?;
        }
        coordinator.store.reserve_ids(snapshot.next_edge_id);
        if let Some(last) = snapshot.archive.iter().map(|a| a.edge.id.0).max() {
            coordinator.store.reserve_ids(last.saturating_add(1));
        }
        coordinator.planner =
            GroupPlanner::from_parts(snapshot.groups, snapshot.next_group_id, snapshot.retired_groups);
        coordinator.archive = snapshot.archive;
        coordinator.conflicts = ConflictLog::from_records(snapshot.conflicts);

        for group in coordinator.store.group_ids() {
            coordinator.refresh_flags(group);
        }
        info!(
            edges = coordinator.store.len(),
            groups = coordinator.planner.groups().count(),
            "hydrated coordinator"
        );
        Ok(coordinator)
    }
}

/// BLAKE3 hash of a group's edge content, independent of edge ids.
fn content_hash(edges: &[Edge]) -> String {
    let mut rows: Vec<(&str, &str, &str)> = edges
        .iter()
        .map(|e| (e.original.as_str(), e.replacement_label(), e.stage.as_str()))
        .collect();
    rows.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    for (original, replacement, stage) in rows {
        hasher.update(original.as_bytes());
        hasher.update(b"\x00");
        hasher.update(replacement.as_bytes());
        hasher.update(b"\x00");
        hasher.update(stage.as_bytes());
        hasher.update(b"\x00");
    }
    format!("blake3:{}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
