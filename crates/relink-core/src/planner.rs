//! Group assignment, merging and splitting.
//!
//! # Overview
//!
//! A group is the connected component of edges an entity belongs to. The
//! [`GroupPlanner`] is an arena of groups keyed by [`GroupId`] plus an
//! `entity -> group` membership map. Planning is pure ([`GroupPlanner::plan`]);
//! applying a plan ([`GroupPlanner::commit`]) mutates only the planner, and the
//! coordinator moves the matching edges in the store in the same unit of work.
//!
//! # Identity
//!
//! Group ids are allocated monotonically from 1. When two groups merge the
//! smaller id survives and the larger one is retired forever, so the final
//! grouping does not depend on the order in which bridging edges arrive.
//!
//! # Placeholders
//!
//! Pending placeholders are tracked per group as [`PendingMember`]s. They are
//! never members and never looked up, so two groups cannot be bridged by a
//! shared placeholder string.

#![allow(clippy::module_name_repetitions)]

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ErrorCode;
use crate::graph::{ConflictKind, RelationGraph};
use crate::model::{EdgeId, EntityId, GroupId, Stage};
use crate::store::EdgeStore;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Placeholder replacement awaiting a real item number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMember {
    pub placeholder: EntityId,
    pub original: EntityId,
    pub edge_id: EdgeId,
    pub added_at: DateTime<Utc>,
}

/// One connected component of edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub members: BTreeSet<EntityId>,
    #[serde(default)]
    pub pending: Vec<PendingMember>,
    #[serde(default)]
    pub conflict_flags: BTreeSet<ConflictKind>,
}

impl Group {
    fn new(id: GroupId) -> Self {
        Self {
            id,
            members: BTreeSet::new(),
            pending: Vec::new(),
            conflict_flags: BTreeSet::new(),
        }
    }
}

/// Where a candidate's edge will live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "assignment", rename_all = "snake_case")]
pub enum Assignment {
    /// Neither endpoint has a group; allocate this id.
    New(GroupId),
    /// Exactly one endpoint has a group.
    Attach(GroupId),
    /// Endpoints sit in different groups; `loser` folds into `winner`.
    Merge { winner: GroupId, loser: GroupId },
    /// Both endpoints already share a group.
    Existing(GroupId),
}

impl Assignment {
    /// Group the edge ends up in.
    #[must_use]
    pub const fn target(&self) -> GroupId {
        match *self {
            Self::New(id) | Self::Attach(id) | Self::Existing(id) => id,
            Self::Merge { winner, .. } => winner,
        }
    }

    /// Every existing group the assignment touches.
    #[must_use]
    pub fn touched(&self) -> Vec<GroupId> {
        match *self {
            Self::New(_) => Vec::new(),
            Self::Attach(id) | Self::Existing(id) => vec![id],
            Self::Merge { winner, loser } => vec![winner, loser],
        }
    }
}

/// Validated split, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    pub source: GroupId,
    pub target: GroupId,
    pub members: BTreeSet<EntityId>,
    pub edges: Vec<EdgeId>,
}

/// Errors from planner operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("group {0} does not exist")]
    UnknownGroup(GroupId),

    #[error("split must move at least one member and leave at least one behind")]
    EmptySplit,

    #[error("{entity} is not a member of group {group}")]
    NotAMember { entity: EntityId, group: GroupId },

    #[error("edge {edge} ({original} -> {replacement}) would cross the split")]
    SplitWouldOrphanEdge {
        edge: EdgeId,
        original: EntityId,
        replacement: EntityId,
    },
}

impl PlanError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownGroup(_) => ErrorCode::UnknownGroup,
            Self::EmptySplit | Self::NotAMember { .. } => ErrorCode::InvalidSplit,
            Self::SplitWouldOrphanEdge { .. } => ErrorCode::SplitWouldOrphanEdge,
        }
    }
}

// ---------------------------------------------------------------------------
// GroupPlanner
// ---------------------------------------------------------------------------

/// Arena of groups plus entity membership.
#[derive(Debug, Clone)]
pub struct GroupPlanner {
    groups: BTreeMap<GroupId, Group>,
    membership: HashMap<EntityId, GroupId>,
    next_id: u64,
    retired: BTreeSet<GroupId>,
}

impl Default for GroupPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupPlanner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: BTreeMap::new(),
            membership: HashMap::new(),
            next_id: 1,
            retired: BTreeSet::new(),
        }
    }

    /// Rebuild from exported groups. Membership is derived from the groups.
    ///
    /// The id counter is raised past every live and retired id, whatever
    /// `next_id` says.
    #[must_use]
    pub fn from_parts(groups: Vec<Group>, next_id: u64, retired: BTreeSet<GroupId>) -> Self {
        let floor = retired.last().map_or(1, |id| id.0.saturating_add(1));
        let mut planner = Self {
            next_id: next_id.max(floor),
            retired,
            ..Self::new()
        };
        for group in groups {
            planner.next_id = planner.next_id.max(group.id.0.saturating_add(1));
            for member in &group.members {
                planner.membership.insert(member.clone(), group.id);
            }
            planner.groups.insert(group.id, group);
        }
        planner
    }

    #[must_use]
    pub const fn next_id(&self) -> u64 {
        self.next_id
    }

    #[must_use]
    pub const fn retired(&self) -> &BTreeSet<GroupId> {
        &self.retired
    }

    #[must_use]
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    #[must_use]
    pub fn group_of(&self, entity: &EntityId) -> Option<GroupId> {
        self.membership.get(entity).copied()
    }

    /// Decide where an edge `original -> replacement` belongs.
    ///
    /// Pass `None` for discontinue markers and placeholders; neither is
    /// looked up.
    #[must_use]
    pub fn plan(&self, original: &EntityId, replacement: Option<&EntityId>) -> Assignment {
        let left = self.group_of(original);
        let right = replacement.and_then(|r| self.group_of(r));
        match (left, right) {
            (None, None) => Assignment::New(GroupId(self.next_id)),
            (Some(g), None) | (None, Some(g)) => Assignment::Attach(g),
            (Some(a), Some(b)) if a == b => Assignment::Existing(a),
            (Some(a), Some(b)) => Assignment::Merge {
                winner: a.min(b),
                loser: a.max(b),
            },
        }
    }

    /// Apply `assignment`, adding both endpoints as members.
    pub fn commit(
        &mut self,
        assignment: Assignment,
        original: &EntityId,
        replacement: Option<&EntityId>,
    ) -> GroupId {
        let target = match assignment {
            Assignment::New(_) => self.allocate(),
            Assignment::Attach(id) | Assignment::Existing(id) => id,
            Assignment::Merge { winner, loser } => {
                self.merge(winner, loser);
                winner
            }
        };
        self.add_member(target, original);
        if let Some(r) = replacement {
            self.add_member(target, r);
        }
        target
    }

    fn allocate(&mut self) -> GroupId {
        let id = GroupId(self.next_id);
        self.next_id += 1;
        self.groups.insert(id, Group::new(id));
        debug!(group = %id, "allocated group");
        id
    }

    fn add_member(&mut self, group: GroupId, entity: &EntityId) {
        self.groups
            .entry(group)
            .or_insert_with(|| Group::new(group))
            .members
            .insert(entity.clone());
        self.membership.insert(entity.clone(), group);
    }

    fn merge(&mut self, winner: GroupId, loser: GroupId) {
        let Some(absorbed) = self.groups.remove(&loser) else {
            return;
        };
        for member in &absorbed.members {
            self.membership.insert(member.clone(), winner);
        }
        let survivor = self
            .groups
            .entry(winner)
            .or_insert_with(|| Group::new(winner));
        survivor.members.extend(absorbed.members);
        survivor.pending.extend(absorbed.pending);
        survivor.conflict_flags.extend(absorbed.conflict_flags);
        self.retired.insert(loser);
        info!(winner = %winner, loser = %loser, "merged groups");
    }

    // -----------------------------------------------------------------------
    // Pending members and flags
    // -----------------------------------------------------------------------

    pub fn add_pending(&mut self, group: GroupId, member: PendingMember) {
        if let Some(g) = self.groups.get_mut(&group) {
            g.pending.push(member);
        }
    }

    /// Drop the pending member attached to `edge_id`.
    pub fn remove_pending(&mut self, group: GroupId, edge_id: EdgeId) -> Option<PendingMember> {
        let g = self.groups.get_mut(&group)?;
        let index = g.pending.iter().position(|p| p.edge_id == edge_id)?;
        Some(g.pending.remove(index))
    }

    #[must_use]
    pub fn pending_count(&self, group: GroupId) -> usize {
        self.groups.get(&group).map_or(0, |g| g.pending.len())
    }

    /// Replace the group's conflict flags with a fresh scan result.
    pub fn set_flags(&mut self, group: GroupId, flags: BTreeSet<ConflictKind>) {
        if let Some(g) = self.groups.get_mut(&group) {
            g.conflict_flags = flags;
        }
    }

    // -----------------------------------------------------------------------
    // Cleanup
    // -----------------------------------------------------------------------

    /// Drop members that no longer appear on any live edge in `group`.
    pub fn detach_unused(&mut self, group: GroupId, store: &EdgeStore) -> Vec<EntityId> {
        let Some(g) = self.groups.get_mut(&group) else {
            return Vec::new();
        };
        let live: BTreeSet<&EntityId> = store
            .edges_in_group(group)
            .into_iter()
            .flat_map(|e| std::iter::once(&e.original).chain(e.real_replacement()))
            .collect();
        let unused: Vec<EntityId> = g
            .members
            .iter()
            .filter(|m| !live.contains(m))
            .cloned()
            .collect();
        for entity in &unused {
            g.members.remove(entity);
            if self.membership.get(entity) == Some(&group) {
                self.membership.remove(entity);
            }
        }
        unused
    }

    /// Retire `group` if it has no live edges. Returns `true` if retired.
    pub fn destroy_if_empty(&mut self, group: GroupId, store: &EdgeStore) -> bool {
        if !store.edges_in_group(group).is_empty() {
            return false;
        }
        let Some(g) = self.groups.remove(&group) else {
            return false;
        };
        for member in &g.members {
            if self.membership.get(member) == Some(&group) {
                self.membership.remove(member);
            }
        }
        self.retired.insert(group);
        debug!(group = %group, "retired empty group");
        true
    }

    /// Least advanced live stage in `group`.
    #[must_use]
    pub fn stage_rollup(group: GroupId, store: &EdgeStore) -> Option<Stage> {
        Stage::rollup(store.edges_in_group(group).into_iter().map(|e| e.stage))
    }

    // -----------------------------------------------------------------------
    // Split
    // -----------------------------------------------------------------------

    /// Validate moving `members` out of `group` into a fresh group.
    ///
    /// Each weakly connected component of the group's edges must move as a
    /// whole or stay as a whole.
    ///
    /// # Errors
    ///
    /// - [`PlanError::UnknownGroup`] if `group` is not live.
    /// - [`PlanError::EmptySplit`] if nothing moves or nothing stays.
    /// - [`PlanError::NotAMember`] if a named entity is elsewhere.
    /// - [`PlanError::SplitWouldOrphanEdge`] if an edge joins both sides.
    pub fn split(
        &self,
        group: GroupId,
        members: &[EntityId],
        store: &EdgeStore,
    ) -> Result<SplitPlan, PlanError> {
        let g = self.groups.get(&group).ok_or(PlanError::UnknownGroup(group))?;
        let moving: BTreeSet<EntityId> = members.iter().cloned().collect();
        if moving.is_empty() || moving.len() >= g.members.len() {
            return Err(PlanError::EmptySplit);
        }
        if let Some(stranger) = moving.iter().find(|m| !g.members.contains(*m)) {
            return Err(PlanError::NotAMember {
                entity: stranger.clone(),
                group,
            });
        }

        let live = store.edges_in_group(group);
        let graph = RelationGraph::from_edges(live.iter().copied());
        for component in graph.components() {
            let movers = component.iter().filter(|e| moving.contains(**e)).count();
            if movers == 0 || movers == component.len() {
                continue;
            }
            let crossing = live.iter().find_map(|edge| {
                let replacement = edge.real_replacement()?;
                (component.contains(edge.original.as_str())
                    && moving.contains(&edge.original) != moving.contains(replacement))
                .then(|| PlanError::SplitWouldOrphanEdge {
                    edge: edge.id,
                    original: edge.original.clone(),
                    replacement: replacement.clone(),
                })
            });
            if let Some(err) = crossing {
                return Err(err);
            }
        }

        let edges = live
            .iter()
            .filter(|edge| moving.contains(&edge.original))
            .map(|edge| edge.id)
            .collect();

        Ok(SplitPlan {
            source: group,
            target: GroupId(self.next_id),
            members: moving,
            edges,
        })
    }

    /// Apply a validated split. Pending members follow their original.
    pub fn apply_split(&mut self, plan: &SplitPlan) -> GroupId {
        let target = self.allocate();
        let moved_pending = match self.groups.get_mut(&plan.source) {
            Some(source) => {
                source.members.retain(|m| !plan.members.contains(m));
                let (moved, kept): (Vec<_>, Vec<_>) = source
                    .pending
                    .drain(..)
                    .partition(|p| plan.members.contains(&p.original));
                source.pending = kept;
                moved
            }
            None => Vec::new(),
        };
        for member in &plan.members {
            self.add_member(target, member);
        }
        if let Some(g) = self.groups.get_mut(&target) {
            g.pending = moved_pending;
        }
        info!(source = %plan.source, target = %target, moved = plan.members.len(), "split group");
        target
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
