//! Hand-off of downstream refresh jobs.
//!
//! The engine never runs recomputation itself. Each accepted mutation that
//! changes a group's live edge set yields one [`RefreshTrigger`], pushed through
//! a [`TriggerSink`]. Sinks must not block the batch; failures are logged and
//! the trigger is dropped.

use std::sync::mpsc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{EntityId, GroupId};

/// Request to recompute derived data for a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTrigger {
    pub group_id: GroupId,
    pub entity_ids: Vec<EntityId>,
}

/// Destination for refresh triggers.
pub trait TriggerSink: Send + Sync + std::fmt::Debug {
    fn send(&self, trigger: RefreshTrigger);
}

/// Discards every trigger.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TriggerSink for NullSink {
    fn send(&self, _trigger: RefreshTrigger) {}
}

/// Forwards triggers over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RefreshTrigger>,
}

impl ChannelSink {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<RefreshTrigger>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end for the job scheduler.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<RefreshTrigger>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }
}

impl TriggerSink for ChannelSink {
    fn send(&self, trigger: RefreshTrigger) {
        let group = trigger.group_id;
        if let Err(err) = self.tx.send(trigger) {
            warn!(group = %group, error = %err, "dropping refresh trigger");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(group: u64) -> RefreshTrigger {
        RefreshTrigger {
            group_id: GroupId(group),
            entity_ids: vec![EntityId::new_unchecked("A")],
        }
    }

    #[test]
    fn channel_sink_delivers_in_order() {
        let (sink, rx) = ChannelSink::channel();
        sink.send(trigger(1));
        sink.send(trigger(2));
        let groups: Vec<u64> = rx.try_iter().map(|t| t.group_id.0).collect();
        assert_eq!(groups, vec![1, 2]);
    }

    #[test]
    fn closed_channel_does_not_panic() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.send(trigger(1));
    }
}
