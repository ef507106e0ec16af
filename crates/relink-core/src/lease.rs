//! In-process leases over groups and entities.
//!
//! A batch leases every entity it names plus every group those entities
//! belong to. Keys are taken all-or-nothing: a caller waits on the condvar
//! until none of its keys is held, then claims them in one step, so two
//! batches can never each hold half of the other's keys.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ErrorCode;
use crate::model::{EntityId, GroupId};

/// Something a batch can hold exclusively.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LeaseKey {
    Group(GroupId),
    Entity(EntityId),
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(id) => write!(f, "group:{id}"),
            Self::Entity(id) => write!(f, "entity:{id}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("lease on {contended} not granted after {waited:?}")]
    Timeout { contended: LeaseKey, waited: Duration },
}

impl LeaseError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LeaseTimeout,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

#[derive(Debug, Default)]
pub struct LeaseTable {
    held: Mutex<BTreeSet<LeaseKey>>,
    released: Condvar,
}

impl LeaseTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<LeaseKey>> {
        // The set is only mutated by insert/remove loops that cannot panic.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until every key in `keys` is free, then hold them all.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Timeout`] if some key is still held after
    /// `timeout`. Nothing is held in that case.
    pub fn acquire(
        &self,
        keys: BTreeSet<LeaseKey>,
        timeout: Duration,
    ) -> Result<LeaseGuard<'_>, LeaseError> {
        let start = Instant::now();
        let mut held = self.lock();
        loop {
            let Some(contended) = keys.iter().find(|k| held.contains(*k)) else {
                held.extend(keys.iter().cloned());
                debug!(keys = keys.len(), "leases granted");
                return Ok(LeaseGuard { table: self, keys });
            };

            let waited = start.elapsed();
            let Some(remaining) = timeout.checked_sub(waited).filter(|d| !d.is_zero()) else {
                return Err(LeaseError::Timeout {
                    contended: contended.clone(),
                    waited,
                });
            };
            held = self
                .released
                .wait_timeout(held, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Number of keys currently held by anyone.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, keys: &BTreeSet<LeaseKey>) {
        let mut held = self.lock();
        for key in keys {
            held.remove(key);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Held leases. Released on drop.
#[derive(Debug)]
pub struct LeaseGuard<'a> {
    table: &'a LeaseTable,
    keys: BTreeSet<LeaseKey>,
}

impl LeaseGuard<'_> {
    #[must_use]
    pub const fn keys(&self) -> &BTreeSet<LeaseKey> {
        &self.keys
    }

    /// `true` if every key in `keys` is already held by this guard.
    #[must_use]
    pub fn covers(&self, keys: &BTreeSet<LeaseKey>) -> bool {
        keys.is_subset(&self.keys)
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.keys);
    }
}
