use std::collections::{BTreeMap, BTreeSet};

use crate::model::graph::{MutationGraph, Reference};
use crate::model::ids::NodeId;

/// Blank reference key: identifier plus lowercased type
pub type BlankKey = (String, String);

fn key(id: &NodeId, type_name: &str) -> Option<BlankKey> {
    match id {
        NodeId::Blank(b) => Some((b.as_str().to_string(), type_name.to_lowercase())),
        NodeId::Concrete(_) => None,
    }
}

/// Blank identifiers defined as nodes of the graph
///
/// A merge node materializes no entity, so its identifier is not a target.
pub fn defined_blanks(graph: &MutationGraph) -> BTreeSet<BlankKey> {
    graph
        .nodes
        .iter()
        .filter(|n| !n.is_merge())
        .filter_map(|n| key(&n.id, &n.node_type))
        .collect()
}

/// Blank references made anywhere in the graph, first spelling kept
pub fn referenced_blanks(graph: &MutationGraph) -> BTreeMap<BlankKey, Reference> {
    let mut out = BTreeMap::new();
    for reference in graph.nodes.iter().flat_map(|n| n.references()) {
        if let Some(k) = key(&reference.id, &reference.ref_type) {
            out.entry(k).or_insert(reference);
        }
    }
    out
}

/// Referenced-but-undefined blank references, sorted by identifier then type
///
/// A reference matches a node only if both the identifier and the type
/// (case-insensitively) agree.
pub fn find_unresolved_blanks(graph: &MutationGraph) -> Vec<Reference> {
    let defined = defined_blanks(graph);
    referenced_blanks(graph)
        .into_iter()
        .filter(|(k, _)| !defined.contains(k))
        .map(|(_, r)| r)
        .collect()
}
