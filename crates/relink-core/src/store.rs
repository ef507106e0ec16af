//! Authoritative in-memory edge set with lookup indices.
//!
//! # Overview
//!
//! [`EdgeStore`] owns every live edge. It is a pure data holder: it enforces
//! the edge-key invariant on insert and keeps three hash indices current, but
//! it never decides *whether* a mutation is legal beyond that. Only the batch
//! coordinator writes to it.
//!
//! # Edge-key invariant
//!
//! Within one group and for one original:
//!
//! - at most one live edge exists per replacement,
//! - at most one discontinue marker (null replacement) exists,
//! - a discontinue marker and replacement edges never coexist.
//!
//! Violations surface as [`StoreError::DuplicateActiveEdge`].
//!
//! # Indices
//!
//! - `(group, original)` → edge ids (multi-index; fan-out is legal)
//! - `replacement` → edge ids (in-degree queries, across groups)
//! - `group` → edge ids (`edges_in_group` is O(group size))

#![allow(clippy::module_name_repetitions)]

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::ErrorCode;
use crate::model::{Edge, EdgeId, EntityId, GroupId, NewEdge, Stage};

/// Errors raised by [`EdgeStore`] mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The insert would break the edge-key invariant.
    #[error(
        "edge {original} -> {} conflicts with live edge {existing} in group {group}",
        .replacement.as_ref().map_or("NO REPLACEMENT", EntityId::as_str)
    )]
    DuplicateActiveEdge {
        group: GroupId,
        original: EntityId,
        replacement: Option<EntityId>,
        existing: EdgeId,
    },

    /// The edge id is not live.
    #[error("edge {0} not found")]
    UnknownEdge(EdgeId),

    /// Hydration supplied the same id twice.
    #[error("edge id {0} supplied twice")]
    DuplicateEdgeId(EdgeId),
}

impl StoreError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateActiveEdge { .. } => ErrorCode::DuplicateActiveEdge,
            Self::UnknownEdge(_) => ErrorCode::EdgeNotFound,
            Self::DuplicateEdgeId(_) => ErrorCode::CorruptSnapshot,
        }
    }
}

/// Live edges plus `(group, original)`, `replacement` and `group` indices.
#[derive(Debug, Clone, Default)]
pub struct EdgeStore {
    edges: HashMap<EdgeId, Edge>,
    by_original: HashMap<(GroupId, EntityId), BTreeSet<EdgeId>>,
    by_replacement: HashMap<EntityId, BTreeSet<EdgeId>>,
    by_group: HashMap<GroupId, BTreeSet<EdgeId>>,
    next_id: u64,
}

impl EdgeStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Number of live edges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Id the next insert will receive.
    #[must_use]
    pub const fn next_id(&self) -> EdgeId {
        EdgeId(self.next_id)
    }

    /// Never hand out ids below `next` (ids of archived edges stay burned).
    pub fn reserve_ids(&mut self, next: u64) {
        self.next_id = self.next_id.max(next);
    }

    /// All live edges in id order.
    #[must_use]
    pub fn iter(&self) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.values().collect();
        edges.sort_by_key(|edge| edge.id);
        edges
    }

    /// Check the edge-key invariant for a prospective edge without mutating.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateActiveEdge`] naming the live edge the
    /// candidate collides with.
    pub fn check_insert(
        &self,
        group: GroupId,
        original: &EntityId,
        replacement: Option<&EntityId>,
    ) -> Result<(), StoreError> {
        let Some(ids) = self.by_original.get(&(group, original.clone())) else {
            return Ok(());
        };

        for id in ids {
            let Some(existing) = self.edges.get(id) else {
                continue;
            };
            let collides = match replacement {
                // A discontinue marker excludes every other edge for the original.
                None => true,
                Some(repl) => {
                    existing.is_discontinue() || existing.replacement.as_ref() == Some(repl)
                }
            };
            if collides {
                return Err(StoreError::DuplicateActiveEdge {
                    group,
                    original: original.clone(),
                    replacement: replacement.cloned(),
                    existing: existing.id,
                });
            }
        }
        Ok(())
    }

    /// Insert a new edge and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateActiveEdge`] if the edge-key invariant
    /// would be violated. The store is unchanged on error.
    pub fn insert(&mut self, edge: NewEdge) -> Result<EdgeId, StoreError> {
        self.check_insert(edge.group_id, &edge.original, edge.replacement.as_ref())?;
        let id = EdgeId(self.next_id);
        self.next_id += 1;
        self.index(edge.with_id(id));
        Ok(id)
    }

    /// Insert an edge that already carries an id (hydration, restore).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateEdgeId`] if the id is live, or
    /// [`StoreError::DuplicateActiveEdge`] if the edge-key invariant fails.
    pub fn insert_existing(&mut self, edge: Edge) -> Result<EdgeId, StoreError> {
        if self.edges.contains_key(&edge.id) {
            return Err(StoreError::DuplicateEdgeId(edge.id));
        }
        self.check_insert(edge.group_id, &edge.original, edge.replacement.as_ref())?;
        let id = edge.id;
        self.next_id = self.next_id.max(id.0.saturating_add(1));
        self.index(edge);
        Ok(id)
    }

    fn index(&mut self, edge: Edge) {
        self.by_original
            .entry((edge.group_id, edge.original.clone()))
            .or_default()
            .insert(edge.id);
        if let Some(repl) = &edge.replacement {
            self.by_replacement
                .entry(repl.clone())
                .or_default()
                .insert(edge.id);
        }
        self.by_group.entry(edge.group_id).or_default().insert(edge.id);
        self.edges.insert(edge.id, edge);
    }

    fn unindex(&mut self, edge: &Edge) {
        let key = (edge.group_id, edge.original.clone());
        if let Some(ids) = self.by_original.get_mut(&key) {
            ids.remove(&edge.id);
            if ids.is_empty() {
                self.by_original.remove(&key);
            }
        }
        if let Some(repl) = &edge.replacement {
            if let Some(ids) = self.by_replacement.get_mut(repl) {
                ids.remove(&edge.id);
                if ids.is_empty() {
                    self.by_replacement.remove(repl);
                }
            }
        }
        if let Some(ids) = self.by_group.get_mut(&edge.group_id) {
            ids.remove(&edge.id);
            if ids.is_empty() {
                self.by_group.remove(&edge.group_id);
            }
        }
    }

    #[must_use]
    pub fn get_edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    /// The discontinue marker or the lowest-id live edge for `original` in
    /// `group`.
    #[must_use]
    pub fn get(&self, original: &EntityId, group: GroupId) -> Option<&Edge> {
        self.by_original
            .get(&(group, original.clone()))
            .and_then(|ids| ids.iter().next())
            .and_then(|id| self.edges.get(id))
    }

    /// Exact lookup of the live edge `original -> replacement` in `group`.
    #[must_use]
    pub fn get_pair(
        &self,
        original: &EntityId,
        replacement: Option<&EntityId>,
        group: GroupId,
    ) -> Option<&Edge> {
        self.edges_from(original, group)
            .into_iter()
            .find(|edge| edge.replacement.as_ref() == replacement)
    }

    /// Every live edge with `original` on the original side in `group`.
    #[must_use]
    pub fn edges_from(&self, original: &EntityId, group: GroupId) -> Vec<&Edge> {
        self.by_original
            .get(&(group, original.clone()))
            .map(|ids| ids.iter().filter_map(|id| self.edges.get(id)).collect())
            .unwrap_or_default()
    }

    /// Every live edge with `replacement` on the replacement side, any group.
    #[must_use]
    pub fn edges_to(&self, replacement: &EntityId) -> Vec<&Edge> {
        self.by_replacement
            .get(replacement)
            .map(|ids| ids.iter().filter_map(|id| self.edges.get(id)).collect())
            .unwrap_or_default()
    }

    /// Every live edge in `group`, ordered by id.
    #[must_use]
    pub fn edges_in_group(&self, group: GroupId) -> Vec<&Edge> {
        self.by_group
            .get(&group)
            .map(|ids| ids.iter().filter_map(|id| self.edges.get(id)).collect())
            .unwrap_or_default()
    }

    /// Groups with at least one live edge.
    #[must_use]
    pub fn group_ids(&self) -> BTreeSet<GroupId> {
        self.by_group.keys().copied().collect()
    }

    /// Set the stage (and optionally the go-live date) of a live edge.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownEdge`] if the edge is not live.
    pub fn update_stage(
        &mut self,
        id: EdgeId,
        stage: Stage,
        go_live_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<&Edge, StoreError> {
        let edge = self.edges.get_mut(&id).ok_or(StoreError::UnknownEdge(id))?;
        edge.stage = stage;
        if go_live_date.is_some() {
            edge.go_live_date = go_live_date;
        }
        edge.metadata.updated_at = now;
        Ok(edge)
    }

    /// Turn a pending edge's placeholder into a real replacement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownEdge`] if the edge is not live, or
    /// [`StoreError::DuplicateActiveEdge`] if `original -> real` already exists.
    pub fn replace_replacement(
        &mut self,
        id: EdgeId,
        real: EntityId,
        now: DateTime<Utc>,
    ) -> Result<&Edge, StoreError> {
        let current = self.edges.get(&id).ok_or(StoreError::UnknownEdge(id))?;
        if let Some(existing) = self.get_pair(&current.original, Some(&real), current.group_id) {
            return Err(StoreError::DuplicateActiveEdge {
                group: current.group_id,
                original: current.original.clone(),
                replacement: Some(real),
                existing: existing.id,
            });
        }

        let mut edge = self.edges.remove(&id).ok_or(StoreError::UnknownEdge(id))?;
        self.unindex(&edge);
        edge.replacement = Some(real);
        edge.metadata.pending = false;
        edge.metadata.updated_at = now;
        self.index(edge);
        self.edges.get(&id).ok_or(StoreError::UnknownEdge(id))
    }

    /// Remove a live edge, returning it.
    pub fn remove(&mut self, id: EdgeId) -> Option<Edge> {
        let edge = self.edges.remove(&id)?;
        self.unindex(&edge);
        Some(edge)
    }

    /// Move every edge of `from` into `to` (group merge). Returns moved ids.
    pub fn reassign_group(&mut self, from: GroupId, to: GroupId, now: DateTime<Utc>) -> Vec<EdgeId> {
        let ids: Vec<EdgeId> = self
            .by_group
            .get(&from)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        self.move_edges(&ids, to, now);
        ids
    }

    /// Move the given edges into group `to` (group split).
    pub fn move_edges(&mut self, ids: &[EdgeId], to: GroupId, now: DateTime<Utc>) {
        for id in ids {
            let Some(mut edge) = self.edges.remove(id) else {
                continue;
            };
            self.unindex(&edge);
            edge.group_id = to;
            edge.metadata.updated_at = now;
            self.index(edge);
        }
    }
}
