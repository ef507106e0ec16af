//! Lifecycle stages attached to every edge.
//!
//! # Ordering
//!
//! Stages carry a rank used to detect backward moves:
//!
//! ```text
//! PendingItemNumber(0) < PendingClinicalReadiness(1) < TrackingItemTransition(2)
//!   < TrackingDiscontinued(3) < TrackingCompleted(4) < Deleted(5)
//! ```
//!
//! `TrackingDiscontinued` is a side branch reachable from every non-terminal
//! stage; its rank only matters for moves *out* of it. `TrackingCompleted` and
//! `Deleted` are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Edge lifecycle stage with a total ordering by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Stage {
    PendingItemNumber = 0,
    PendingClinicalReadiness = 1,
    TrackingItemTransition = 2,
    TrackingDiscontinued = 3,
    TrackingCompleted = 4,
    Deleted = 5,
}

impl Stage {
    /// All stages in rank order.
    pub const ALL: [Self; 6] = [
        Self::PendingItemNumber,
        Self::PendingClinicalReadiness,
        Self::TrackingItemTransition,
        Self::TrackingDiscontinued,
        Self::TrackingCompleted,
        Self::Deleted,
    ];

    /// Return the numeric rank of this stage.
    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }

    /// Machine name (matches the serde representation).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingItemNumber => "pending_item_number",
            Self::PendingClinicalReadiness => "pending_clinical_readiness",
            Self::TrackingItemTransition => "tracking_item_transition",
            Self::TrackingDiscontinued => "tracking_discontinued",
            Self::TrackingCompleted => "tracking_completed",
            Self::Deleted => "deleted",
        }
    }

    /// Label used by the catalog team's spreadsheets and review screens.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PendingItemNumber => "Pending Item Number",
            Self::PendingClinicalReadiness => "Pending Clinical Readiness",
            Self::TrackingItemTransition => "Tracking - Item Transition",
            Self::TrackingDiscontinued => "Tracking - Discontinued",
            Self::TrackingCompleted => "Tracking Completed",
            Self::Deleted => "Deleted",
        }
    }

    /// `true` for stages with no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::TrackingCompleted | Self::Deleted)
    }

    /// `true` for the stages that archive and remove the live row.
    #[must_use]
    pub const fn archives_edge(self) -> bool {
        self.is_terminal()
    }

    /// `true` for stages that require an expected go-live date.
    #[must_use]
    pub const fn requires_go_live(self) -> bool {
        matches!(self, Self::TrackingItemTransition | Self::TrackingCompleted)
    }

    /// Least advanced stage among `stages`, used as the group-level rollup.
    pub fn rollup(stages: impl IntoIterator<Item = Self>) -> Option<Self> {
        stages.into_iter().min()
    }
}

impl PartialOrd for Stage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stage {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = ParseStageError;

    /// Accepts the machine name or the spreadsheet label, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|stage| {
                stage.as_str().eq_ignore_ascii_case(needle)
                    || stage.label().eq_ignore_ascii_case(needle)
            })
            .ok_or_else(|| ParseStageError {
                got: s.to_string(),
            })
    }
}

/// Error returned when parsing a stage from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage: '{got}'")]
pub struct ParseStageError {
    pub got: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_follow_declaration_order() {
        for pair in Stage::ALL.windows(2) {
            assert!(pair[0] < pair[1], "{} should rank below {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn parse_accepts_machine_name_and_label() {
        assert_eq!(
            "tracking_item_transition".parse::<Stage>(),
            Ok(Stage::TrackingItemTransition)
        );
        assert_eq!(
            "Tracking - Discontinued".parse::<Stage>(),
            Ok(Stage::TrackingDiscontinued)
        );
        assert_eq!(" deleted ".parse::<Stage>(), Ok(Stage::Deleted));
        assert!("archived".parse::<Stage>().is_err());
    }

    #[test]
    fn terminal_stages() {
        let terminal: Vec<Stage> = Stage::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![Stage::TrackingCompleted, Stage::Deleted]);
    }

    #[test]
    fn rollup_picks_least_advanced() {
        let rollup = Stage::rollup([
            Stage::TrackingItemTransition,
            Stage::PendingClinicalReadiness,
            Stage::TrackingDiscontinued,
        ]);
        assert_eq!(rollup, Some(Stage::PendingClinicalReadiness));
        assert_eq!(Stage::rollup([]), None);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&Stage::PendingItemNumber).expect("serialize");
        assert_eq!(json, "\"pending_item_number\"");
    }
}
