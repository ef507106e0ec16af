//! Adjacency view over one or more groups' edges.
//!
//! # Overview
//!
//! [`RelationGraph`] borrows edges from the [`EdgeStore`] and lays them out as
//! a `petgraph` [`DiGraphMap`] keyed by entity id. The view is read-only and
//! cheap to throw away; the coordinator builds one per candidate, optionally
//! overlaying the candidate itself so classification sees the graph *as if*
//! the edge were already committed.
//!
//! Discontinue markers and pending placeholders are not graph edges. They are
//! counted toward the original's out-degree so a discontinued item still
//! reads as an original.

#![allow(clippy::module_name_repetitions)]

use std::collections::{BTreeMap, BTreeSet, HashSet};

use petgraph::Direction;
use petgraph::graphmap::{DiGraphMap, UnGraphMap};
use petgraph::visit::{Bfs, Dfs, Reversed};

use super::classify::ConflictKind;
use crate::model::{Edge, EntityId, GroupId, Side};
use crate::store::EdgeStore;

/// Directed view of original → replacement relationships.
#[derive(Debug, Clone, Default)]
pub struct RelationGraph<'a> {
    graph: DiGraphMap<&'a str, ()>,
    /// Outgoing relationships without a real replacement node.
    markers: BTreeMap<&'a str, usize>,
    names: BTreeSet<&'a str>,
}

impl<'a> RelationGraph<'a> {
    /// Build a view from live edges.
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = &'a Edge>,
    {
        Self::from_pairs(
            edges
                .into_iter()
                .map(|edge| (&edge.original, edge.real_replacement())),
        )
    }

    /// Build a view from `(original, replacement)` pairs; `None` is a marker.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a EntityId, Option<&'a EntityId>)>,
    {
        let mut view = Self::default();
        for (original, replacement) in pairs {
            view.add(original, replacement);
        }
        view
    }

    /// View over every live edge in `groups`.
    pub fn for_groups(store: &'a EdgeStore, groups: impl IntoIterator<Item = GroupId>) -> Self {
        let edges: Vec<&'a Edge> = groups
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .flat_map(|group| store.edges_in_group(group))
            .collect();
        Self::from_edges(edges)
    }

    /// Overlay a hypothetical candidate edge.
    #[must_use]
    pub fn with_candidate(mut self, original: &'a EntityId, replacement: Option<&'a EntityId>) -> Self {
        self.add(original, replacement);
        self
    }

    fn add(&mut self, original: &'a EntityId, replacement: Option<&'a EntityId>) {
        let from = original.as_str();
        self.names.insert(from);
        self.graph.add_node(from);
        match replacement {
            Some(to) => {
                let to = to.as_str();
                self.names.insert(to);
                self.graph.add_edge(from, to, ());
            }
            None => *self.markers.entry(from).or_default() += 1,
        }
    }

    fn node(&self, entity: &str) -> Option<&'a str> {
        self.names.get(entity).copied()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn contains(&self, entity: &str) -> bool {
        self.node(entity).is_some()
    }

    #[must_use]
    pub fn has_edge(&self, original: &str, replacement: &str) -> bool {
        match (self.node(original), self.node(replacement)) {
            (Some(a), Some(b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    /// Entities in the view, sorted.
    pub fn entities(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.names.iter().copied()
    }

    /// Real replacements of `entity`.
    #[must_use]
    pub fn successors(&self, entity: &str) -> Vec<&'a str> {
        self.node(entity).map_or_else(Vec::new, |n| {
            self.graph
                .neighbors_directed(n, Direction::Outgoing)
                .collect()
        })
    }

    /// Outgoing relationships, discontinue markers and placeholders included.
    #[must_use]
    pub fn degree_out(&self, entity: &str) -> usize {
        self.node(entity).map_or(0, |n| {
            self.graph.neighbors_directed(n, Direction::Outgoing).count()
                + self.markers.get(n).copied().unwrap_or(0)
        })
    }

    #[must_use]
    pub fn degree_in(&self, entity: &str) -> usize {
        self.node(entity).map_or(0, |n| {
            self.graph.neighbors_directed(n, Direction::Incoming).count()
        })
    }

    /// `true` if placing `entity` on `proposed` would put it on both sides.
    #[must_use]
    pub fn would_violate_side_exclusivity(&self, entity: &str, proposed: Side) -> bool {
        match proposed {
            Side::Original => self.degree_in(entity) > 0,
            Side::Replacement => self.degree_out(entity) > 0,
        }
    }

    /// Entities reachable from `entity` along directed edges (excluding the
    /// start unless a cycle leads back to it).
    #[must_use]
    pub fn reachable_from(&self, entity: &str) -> Vec<&'a str> {
        let Some(start) = self.node(entity) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut found = Vec::new();
        while let Some(next) = bfs.next(&self.graph) {
            if next != start {
                found.push(next);
            }
        }
        found
    }

    /// Entities from which `entity` is reachable.
    #[must_use]
    pub fn reaching(&self, entity: &str) -> Vec<&'a str> {
        let Some(start) = self.node(entity) else {
            return Vec::new();
        };
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);
        let mut found = Vec::new();
        while let Some(next) = bfs.next(reversed) {
            if next != start {
                found.push(next);
            }
        }
        found
    }

    /// Every non-clean kind present in the view.
    #[must_use]
    pub fn scan(&self) -> BTreeSet<ConflictKind> {
        self.graph
            .nodes()
            .map(|entity| self.classify(entity))
            .filter(|kind| !kind.is_clean())
            .collect()
    }

    /// Weakly connected components, each sorted, ordered by first member.
    #[must_use]
    pub fn components(&self) -> Vec<BTreeSet<&'a str>> {
        let mut undirected = UnGraphMap::<&'a str, ()>::new();
        for node in self.graph.nodes() {
            undirected.add_node(node);
        }
        for (from, to, _) in self.graph.all_edges() {
            undirected.add_edge(from, to, ());
        }

        let mut seen: HashSet<&'a str> = HashSet::new();
        let mut components = Vec::new();
        for start in undirected.nodes() {
            if seen.contains(start) {
                continue;
            }
            let mut dfs = Dfs::new(&undirected, start);
            let mut component = BTreeSet::new();
            while let Some(node) = dfs.next(&undirected) {
                seen.insert(node);
                component.insert(node);
            }
            components.push(component);
        }
        components.sort();
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<EntityId> {
        raw.iter().map(|s| EntityId::new_unchecked(*s)).collect()
    }

    #[test]
    fn degrees_count_markers_toward_out() {
        let e = ids(&["A", "B", "C"]);
        let graph = RelationGraph::from_pairs([
            (&e[0], Some(&e[1])),
            (&e[2], None),
        ]);
        assert_eq!(graph.degree_out("A"), 1);
        assert_eq!(graph.degree_in("B"), 1);
        assert_eq!(graph.degree_out("C"), 1);
        assert_eq!(graph.degree_in("C"), 0);
        assert_eq!(graph.degree_out("missing"), 0);
    }

    #[test]
    fn side_exclusivity_checks_opposite_degree() {
        let e = ids(&["A", "B"]);
        let graph = RelationGraph::from_pairs([(&e[0], Some(&e[1]))]);
        assert!(graph.would_violate_side_exclusivity("B", Side::Original));
        assert!(graph.would_violate_side_exclusivity("A", Side::Replacement));
        assert!(!graph.would_violate_side_exclusivity("A", Side::Original));
        assert!(!graph.would_violate_side_exclusivity("Z", Side::Replacement));
    }

    #[test]
    fn reachability_follows_direction() {
        let e = ids(&["A", "B", "C"]);
        let graph = RelationGraph::from_pairs([(&e[0], Some(&e[1])), (&e[1], Some(&e[2]))]);
        let mut down = graph.reachable_from("A");
        down.sort_unstable();
        assert_eq!(down, vec!["B", "C"]);
        assert!(graph.reachable_from("C").is_empty());
        let mut up = graph.reaching("C");
        up.sort_unstable();
        assert_eq!(up, vec!["A", "B"]);
    }

    #[test]
    fn candidate_overlay_is_visible() {
        let e = ids(&["A", "B"]);
        let graph = RelationGraph::default().with_candidate(&e[0], Some(&e[1]));
        assert!(graph.has_edge("A", "B"));
        assert!(!graph.has_edge("B", "A"));
    }

    #[test]
    fn components_split_on_missing_links() {
        let e = ids(&["A", "B", "C", "D", "E"]);
        let graph = RelationGraph::from_pairs([
            (&e[0], Some(&e[1])),
            (&e[2], Some(&e[1])),
            (&e[3], Some(&e[4])),
        ]);
        let components = graph.components();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], BTreeSet::from(["A", "B", "C"]));
        assert_eq!(components[1], BTreeSet::from(["D", "E"]));
    }

    #[test]
    fn scan_reports_chain() {
        let e = ids(&["A", "B", "C"]);
        let graph = RelationGraph::from_pairs([(&e[0], Some(&e[1])), (&e[1], Some(&e[2]))]);
        assert_eq!(graph.scan(), BTreeSet::from([ConflictKind::Chain]));
    }

    #[test]
    fn scan_of_clean_fan_out_is_empty() {
        let e = ids(&["A", "B", "C"]);
        let graph = RelationGraph::from_pairs([(&e[0], Some(&e[1])), (&e[0], Some(&e[2]))]);
        assert!(graph.scan().is_empty());
    }
}
