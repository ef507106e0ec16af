//! Structural conflict classification.
//!
//! # Overview
//!
//! Conversions are meant to be 1-1, 1-many or many-1 without chaining,
//! self-reference or cycles. This module names the ways a group can break
//! that shape and decides which one to report for a candidate edge.
//!
//! # Precedence
//!
//! When several kinds apply to the same candidate only the most severe is
//! reported:
//!
//! ```text
//! SelfLoop > Reciprocal > Chain > ManyToMany > Clean
//! ```
//!
//! The enum's declaration order encodes this, so `Ord::max` picks the winner.
//!
//! # Warn, don't block
//!
//! Only [`ConflictKind::SelfLoop`] rejects a candidate. The other kinds are
//! committed and recorded for human review.

#![allow(clippy::module_name_repetitions)]

use std::fmt;

use serde::{Deserialize, Serialize};

use super::relation::RelationGraph;
use crate::model::{EntityId, Side};

// ---------------------------------------------------------------------------
// ConflictKind
// ---------------------------------------------------------------------------

/// Closed set of structural classifications, ordered by precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Clean,
    ManyToMany,
    Chain,
    Reciprocal,
    SelfLoop,
}

impl ConflictKind {
    /// All kinds in precedence order, lowest first.
    pub const ALL: [Self; 5] = [
        Self::Clean,
        Self::ManyToMany,
        Self::Chain,
        Self::Reciprocal,
        Self::SelfLoop,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::ManyToMany => "many_to_many",
            Self::Chain => "chain",
            Self::Reciprocal => "reciprocal",
            Self::SelfLoop => "self_loop",
        }
    }

    #[must_use]
    pub const fn is_clean(self) -> bool {
        matches!(self, Self::Clean)
    }

    /// `true` if a candidate with this classification must not be committed.
    #[must_use]
    pub const fn blocks_commit(self) -> bool {
        match self {
            Self::SelfLoop => true,
            Self::Clean | Self::ManyToMany | Self::Chain | Self::Reciprocal => false,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConflictKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| format!("unknown conflict kind: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Result of classifying a candidate edge: the winning kind plus the entity
/// it was detected on and that entity's degrees in the hypothetical view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ConflictKind,
    pub entity: EntityId,
    pub degree_out: usize,
    pub degree_in: usize,
    pub detail: String,
}

impl Classification {
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.kind.is_clean()
    }
}

impl RelationGraph<'_> {
    /// Classify one entity against the current view.
    ///
    /// Checks run in precedence order and the first match wins.
    #[must_use]
    pub fn classify(&self, entity: &str) -> ConflictKind {
        if !self.contains(entity) {
            return ConflictKind::Clean;
        }
        if self.has_edge(entity, entity) {
            return ConflictKind::SelfLoop;
        }
        if self
            .successors(entity)
            .iter()
            .any(|next| self.has_edge(next, entity))
        {
            return ConflictKind::Reciprocal;
        }
        if self.degree_in(entity) > 0 && self.degree_out(entity) > 0 {
            return ConflictKind::Chain;
        }
        if self.is_many_to_many(entity) {
            return ConflictKind::ManyToMany;
        }
        ConflictKind::Clean
    }

    /// Fan-out and fan-in meet at `entity`: either it fans out and reaches a
    /// different entity with in-degree > 1, or it fans in and is reached from
    /// a different entity with out-degree > 1.
    fn is_many_to_many(&self, entity: &str) -> bool {
        let fans_out = self.degree_out(entity) > 1
            && self
                .reachable_from(entity)
                .into_iter()
                .any(|y| y != entity && self.degree_in(y) > 1);
        let fans_in = self.degree_in(entity) > 1
            && self
                .reaching(entity)
                .into_iter()
                .any(|x| x != entity && self.degree_out(x) > 1);
        fans_out || fans_in
    }

    /// Classify a candidate edge `original -> replacement`.
    ///
    /// The view must already contain the candidate (see
    /// [`RelationGraph::with_candidate`]). Both endpoints are classified and
    /// the higher-precedence result is returned; ties blame the original.
    #[must_use]
    pub fn classify_candidate(
        &self,
        original: &EntityId,
        replacement: Option<&EntityId>,
    ) -> Classification {
        if replacement == Some(original) {
            return self.describe(ConflictKind::SelfLoop, original, replacement);
        }

        let mut kind = self.classify(original.as_str());
        if self.would_violate_side_exclusivity(original.as_str(), Side::Original) {
            kind = kind.max(ConflictKind::Chain);
        }
        let mut blamed = original;

        if let Some(repl) = replacement {
            let mut repl_kind = self.classify(repl.as_str());
            if self.would_violate_side_exclusivity(repl.as_str(), Side::Replacement) {
                repl_kind = repl_kind.max(ConflictKind::Chain);
            }
            if repl_kind > kind {
                kind = repl_kind;
                blamed = repl;
            }
        }

        self.describe(kind, blamed, replacement)
    }

    fn describe(
        &self,
        kind: ConflictKind,
        entity: &EntityId,
        replacement: Option<&EntityId>,
    ) -> Classification {
        let degree_out = self.degree_out(entity.as_str());
        let degree_in = self.degree_in(entity.as_str());
        let detail = match kind {
            ConflictKind::Clean => String::new(),
            ConflictKind::SelfLoop => format!("item {entity} cannot reference itself as a replacement"),
            ConflictKind::Reciprocal => {
                let partner = replacement.map_or("?", EntityId::as_str);
                format!("{entity} and {partner} replace each other")
            }
            ConflictKind::Chain => format!(
                "{entity} is both a replacement (in {degree_in}) and an original (out {degree_out})"
            ),
            ConflictKind::ManyToMany => format!(
                "{entity} joins fan-out and fan-in in one group (out {degree_out}, in {degree_in})"
            ),
        };
        Classification {
            kind,
            entity: entity.clone(),
            degree_out,
            degree_in,
            detail,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> EntityId {
        EntityId::new_unchecked(raw)
    }

    fn candidate(existing: &[(&str, &str)], original: &str, replacement: &str) -> ConflictKind {
        let owned: Vec<(EntityId, EntityId)> =
            existing.iter().map(|(a, b)| (id(a), id(b))).collect();
        let o = id(original);
        let r = id(replacement);
        let graph = RelationGraph::from_pairs(owned.iter().map(|(a, b)| (a, Some(b))))
            .with_candidate(&o, Some(&r));
        graph.classify_candidate(&o, Some(&r)).kind
    }

    #[test]
    fn precedence_follows_declaration_order() {
        assert!(ConflictKind::SelfLoop > ConflictKind::Reciprocal);
        assert!(ConflictKind::Reciprocal > ConflictKind::Chain);
        assert!(ConflictKind::Chain > ConflictKind::ManyToMany);
        assert!(ConflictKind::ManyToMany > ConflictKind::Clean);
    }

    #[test]
    fn only_self_loop_blocks() {
        let blocking: Vec<_> = ConflictKind::ALL
            .into_iter()
            .filter(|k| k.blocks_commit())
            .collect();
        assert_eq!(blocking, vec![ConflictKind::SelfLoop]);
    }

    #[test]
    fn self_loop_on_empty_graph() {
        assert_eq!(candidate(&[], "A", "A"), ConflictKind::SelfLoop);
    }

    #[test]
    fn reciprocal_beats_chain() {
        assert_eq!(candidate(&[("B", "A")], "A", "B"), ConflictKind::Reciprocal);
    }

    #[test]
    fn chain_through_original() {
        // X -> A exists; adding A -> B makes A both sides.
        assert_eq!(candidate(&[("X", "A")], "A", "B"), ConflictKind::Chain);
    }

    #[test]
    fn chain_through_replacement() {
        // B -> C exists; adding A -> B makes B both sides.
        assert_eq!(candidate(&[("B", "C")], "A", "B"), ConflictKind::Chain);
    }

    #[test]
    fn fan_out_alone_is_clean() {
        assert_eq!(candidate(&[("A", "B")], "A", "C"), ConflictKind::Clean);
    }

    #[test]
    fn fan_in_alone_is_clean() {
        assert_eq!(candidate(&[("A", "C")], "B", "C"), ConflictKind::Clean);
    }

    #[test]
    fn bridging_fan_out_and_fan_in_is_many_to_many() {
        // A -> X and Y -> B exist; A -> B gives A out 2 and B in 2.
        assert_eq!(
            candidate(&[("A", "X"), ("Y", "B")], "A", "B"),
            ConflictKind::ManyToMany
        );
    }

    #[test]
    fn fan_in_onto_fan_out_target_is_many_to_many() {
        assert_eq!(
            candidate(&[("A", "B"), ("A", "C")], "E", "C"),
            ConflictKind::ManyToMany
        );
    }

    #[test]
    fn classify_entity_reports_chain() {
        let pairs = [(id("A"), id("B")), (id("B"), id("C"))];
        let graph = RelationGraph::from_pairs(pairs.iter().map(|(a, b)| (a, Some(b))));
        assert_eq!(graph.classify("B"), ConflictKind::Chain);
        assert_eq!(graph.classify("A"), ConflictKind::Clean);
        assert_eq!(graph.classify("missing"), ConflictKind::Clean);
    }

    #[test]
    fn candidate_blames_replacement_when_it_is_worse() {
        let pairs = [(id("B"), id("C"))];
        let o = id("A");
        let r = id("B");
        let graph = RelationGraph::from_pairs(pairs.iter().map(|(a, b)| (a, Some(b))))
            .with_candidate(&o, Some(&r));
        let result = graph.classify_candidate(&o, Some(&r));
        assert_eq!(result.kind, ConflictKind::Chain);
        assert_eq!(result.entity, r);
        assert_eq!((result.degree_out, result.degree_in), (1, 1));
    }

    #[test]
    fn kind_parses_from_str() {
        assert_eq!("many_to_many".parse::<ConflictKind>(), Ok(ConflictKind::ManyToMany));
        assert!("loop".parse::<ConflictKind>().is_err());
    }
}
