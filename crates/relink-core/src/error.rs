use std::fmt;

/// Machine-readable error codes for review tooling and batch callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    CorruptSnapshot,
    BatchTooLarge,
    InvalidCandidate,
    EdgeNotFound,
    SelfLoop,
    DuplicateActiveEdge,
    SplitWouldOrphanEdge,
    UnknownGroup,
    InvalidSplit,
    BackwardTransition,
    NotAdjacent,
    StageLocked,
    MissingGoLiveDate,
    PendingMembersUnresolved,
    InvalidFromTerminal,
    LeaseTimeout,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::CorruptSnapshot => "E1002",
            Self::BatchTooLarge => "E2001",
            Self::InvalidCandidate => "E2002",
            Self::EdgeNotFound => "E2003",
            Self::SelfLoop => "E3001",
            Self::DuplicateActiveEdge => "E3002",
            Self::SplitWouldOrphanEdge => "E3003",
            Self::UnknownGroup => "E3004",
            Self::InvalidSplit => "E3005",
            Self::BackwardTransition => "E4001",
            Self::NotAdjacent => "E4002",
            Self::StageLocked => "E4003",
            Self::MissingGoLiveDate => "E4004",
            Self::PendingMembersUnresolved => "E4005",
            Self::InvalidFromTerminal => "E4006",
            Self::LeaseTimeout => "E5001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .relink/config.toml and retry."),
            Self::CorruptSnapshot => {
                Some("Re-export the snapshot from the store; edge groups disagree with the group table.")
            }
            Self::BatchTooLarge => Some("Split the batch or raise max_batch_size."),
            Self::InvalidCandidate => {
                Some("Placeholders and sentinels are only allowed on the replacement side.")
            }
            Self::EdgeNotFound | Self::UnknownGroup => None,
            Self::SelfLoop => Some("Choose a different replacement item."),
            Self::DuplicateActiveEdge => {
                Some("Update the existing edge's stage instead of adding it again.")
            }
            Self::SplitWouldOrphanEdge => {
                Some("Include both endpoints of every edge in the split member set.")
            }
            Self::InvalidSplit => {
                Some("Name current members of the group and leave at least one behind.")
            }
            Self::BackwardTransition | Self::NotAdjacent => Some(
                "Follow the progression: pending item number -> clinical readiness -> item transition -> completed.",
            ),
            Self::StageLocked => {
                Some("Discontinue markers stay discontinued; promote pending placeholders first.")
            }
            Self::MissingGoLiveDate => Some("Supply go_live_date in the same row."),
            Self::PendingMembersUnresolved => {
                Some("Promote or remove every pending placeholder in the group first.")
            }
            Self::InvalidFromTerminal => {
                Some("Use the restore override for deleted edges; completed edges are final.")
            }
            Self::LeaseTimeout => Some("Retry after the overlapping batch finishes."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::CorruptSnapshot,
            ErrorCode::BatchTooLarge,
            ErrorCode::InvalidCandidate,
            ErrorCode::EdgeNotFound,
            ErrorCode::SelfLoop,
            ErrorCode::DuplicateActiveEdge,
            ErrorCode::SplitWouldOrphanEdge,
            ErrorCode::UnknownGroup,
            ErrorCode::InvalidSplit,
            ErrorCode::BackwardTransition,
            ErrorCode::NotAdjacent,
            ErrorCode::StageLocked,
            ErrorCode::MissingGoLiveDate,
            ErrorCode::PendingMembersUnresolved,
            ErrorCode::InvalidFromTerminal,
            ErrorCode::LeaseTimeout,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::SplitWouldOrphanEdge.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }
}
