//! Thread-safe front door to the coordinator.
//!
//! # Overview
//!
//! [`Engine`] is `Send + Sync`. Batches first lease the entities they name
//! and the groups those entities belong to, then apply rows one at a time
//! under the coordinator mutex. Batches over disjoint groups interleave row
//! by row; batches that share a group or entity run one after the other.
//!
//! A concurrent merge can move an entity into a group the lease does not
//! cover while we wait. After acquiring, the footprint is recomputed and the
//! lease is retried with the union of both key sets until it covers the
//! current footprint.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};

use crate::batch::{
    BatchCoordinator, BatchReport, CandidateEdge, GroupSnapshot, SplitReport, TriggerSink,
};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::conflicts::{ConflictFilter, ConflictRecord};
use crate::error::ErrorCode;
use crate::lease::{LeaseError, LeaseGuard, LeaseKey, LeaseTable};
use crate::model::{EntityId, EntitySide, GroupId};
use crate::planner::PlanError;
use crate::snapshot::{EngineSnapshot, SnapshotError};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("batch of {size} rows exceeds max_batch_size {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("coordinator state is poisoned by an earlier panic")]
    Poisoned,
}

impl EngineError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BatchTooLarge { .. } => ErrorCode::BatchTooLarge,
            Self::Plan(err) => err.code(),
            Self::Store(err) => err.code(),
            Self::Lease(err) => err.code(),
            Self::Snapshot(err) => err.code(),
            Self::Poisoned => ErrorCode::InternalUnexpected,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

#[derive(Debug)]
pub struct Engine {
    coordinator: Mutex<BatchCoordinator>,
    leases: LeaseTable,
    lease_timeout: Duration,
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::from_coordinator(BatchCoordinator::new(config))
    }

    #[must_use]
    pub fn from_coordinator(coordinator: BatchCoordinator) -> Self {
        let lease_timeout = Duration::from_millis(coordinator.config().lease_timeout_ms);
        Self {
            coordinator: Mutex::new(coordinator),
            leases: LeaseTable::new(),
            lease_timeout,
        }
    }

    /// Rebuild an engine from an exported snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Snapshot`] if the snapshot is inconsistent.
    pub fn hydrate(
        config: EngineConfig,
        snapshot: EngineSnapshot,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn TriggerSink>,
    ) -> Result<Self, EngineError> {
        let coordinator = BatchCoordinator::hydrate(config, snapshot)?
            .with_clock(clock)
            .with_sink(sink);
        Ok(Self::from_coordinator(coordinator))
    }

    fn lock(&self) -> Result<MutexGuard<'_, BatchCoordinator>, EngineError> {
        self.coordinator.lock().map_err(|_| EngineError::Poisoned)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Validate and apply `candidates` in order.
    ///
    /// # Errors
    ///
    /// - [`EngineError::BatchTooLarge`] before any lease or mutation.
    /// - [`EngineError::Lease`] if the batch's groups stay busy past
    ///   `lease_timeout_ms`.
    #[instrument(skip(self, candidates), fields(rows = candidates.len()))]
    pub fn submit_batch(&self, candidates: &[CandidateEdge]) -> Result<BatchReport, EngineError> {
        self.lock()?.check_batch_size(candidates.len())?;
        let _lease = self.lease_for(|c| c.footprint(candidates))?;

        let mut report = BatchReport::default();
        for (index, candidate) in candidates.iter().enumerate() {
            let row = self.lock()?.process_row(index, candidate);
            report.extend(row);
        }

        info!(
            rows = report.rows.len(),
            accepted = report.accepted(),
            rejected = report.rejected(),
            conflicts = report.conflicts(),
            "batch applied"
        );
        Ok(report)
    }

    /// Move `members` of `group` into a new group.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Plan`] for an invalid split and
    /// [`EngineError::Lease`] on contention.
    #[instrument(skip(self, members))]
    pub fn split_group(&self, group: GroupId, members: &[EntityId]) -> Result<SplitReport, EngineError> {
        let _lease = self.lease_for(|_| {
            let entities: BTreeSet<EntityId> = members.iter().cloned().collect();
            (entities, BTreeSet::from([group]))
        })?;
        self.lock()?.split_group(group, members)
    }

    /// Lease the footprint `compute` reports, retrying until the held keys
    /// cover the footprint as it stands after acquisition.
    fn lease_for<F>(&self, compute: F) -> Result<LeaseGuard<'_>, EngineError>
    where
        F: Fn(&BatchCoordinator) -> (BTreeSet<EntityId>, BTreeSet<GroupId>),
    {
        let start = Instant::now();
        let mut wanted = lease_keys(compute(&*self.lock()?));
        loop {
            let remaining = self.lease_timeout.saturating_sub(start.elapsed());
            let guard = self.leases.acquire(wanted.clone(), remaining)?;
            let current = lease_keys(compute(&*self.lock()?));
            if guard.covers(&current) {
                return Ok(guard);
            }
            debug!(held = guard.keys().len(), "footprint moved while waiting; re-leasing");
            drop(guard);
            wanted.extend(current);
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`EngineError::Poisoned`] if a writer panicked.
    pub fn group_snapshot(&self, group: GroupId) -> Result<Option<GroupSnapshot>, EngineError> {
        Ok(self.lock()?.group_snapshot(group))
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Poisoned`] if a writer panicked.
    pub fn entity_side(&self, entity: &EntityId) -> Result<EntitySide, EngineError> {
        Ok(self.lock()?.entity_side(entity))
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Poisoned`] if a writer panicked.
    pub fn list_conflicts(&self, filter: &ConflictFilter) -> Result<Vec<ConflictRecord>, EngineError> {
        Ok(self.lock()?.list_conflicts(filter))
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Poisoned`] if a writer panicked.
    pub fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        Ok(self.lock()?.snapshot())
    }

    /// Consume the engine and return the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Poisoned`] if a writer panicked.
    pub fn into_coordinator(self) -> Result<BatchCoordinator, EngineError> {
        self.coordinator.into_inner().map_err(|_| EngineError::Poisoned)
    }
}

fn lease_keys((entities, groups): (BTreeSet<EntityId>, BTreeSet<GroupId>)) -> BTreeSet<LeaseKey> {
    groups
        .into_iter()
        .map(LeaseKey::Group)
        .chain(entities.into_iter().map(LeaseKey::Entity))
        .collect()
}
