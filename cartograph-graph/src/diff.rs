// Snapshot diffing: set difference of nodes keyed by id.
//
// Edges are not compared: they are a pure function of node dependencies, so a
// dependency change already surfaces as a modified node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::KnowledgeGraphNode;

/// Node-level difference between two snapshots A and B.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDelta {
    pub from_version: u64,
    pub to_version: u64,
    /// Nodes present in B but not A.
    pub added: Vec<KnowledgeGraphNode>,
    /// Nodes present in A but not B.
    pub removed: Vec<KnowledgeGraphNode>,
    /// Nodes present in both with unequal values, reported with B's value.
    pub modified: Vec<KnowledgeGraphNode>,
    pub total_changes: usize,
}

impl GraphDelta {
    pub fn is_empty(&self) -> bool {
        self.total_changes == 0
    }

    pub fn added_ids(&self) -> Vec<&str> {
        self.added.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn removed_ids(&self) -> Vec<&str> {
        self.removed.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn modified_ids(&self) -> Vec<&str> {
        self.modified.iter().map(|n| n.id.as_str()).collect()
    }
}

/// Compute the delta from node set `a` to node set `b`. All lists are sorted
/// by id. If an id repeats within one side, the last occurrence is used.
pub fn diff_nodes(a: &[KnowledgeGraphNode], b: &[KnowledgeGraphNode]) -> GraphDelta {
    let old: BTreeMap<&str, &KnowledgeGraphNode> = a.iter().map(|n| (n.id.as_str(), n)).collect();
    let new: BTreeMap<&str, &KnowledgeGraphNode> = b.iter().map(|n| (n.id.as_str(), n)).collect();

    let added: Vec<KnowledgeGraphNode> = new
        .iter()
        .filter(|(id, _)| !old.contains_key(*id))
        .map(|(_, n)| (*n).clone())
        .collect();

    let removed: Vec<KnowledgeGraphNode> = old
        .iter()
        .filter(|(id, _)| !new.contains_key(*id))
        .map(|(_, n)| (*n).clone())
        .collect();

    let modified: Vec<KnowledgeGraphNode> = new
        .iter()
        .filter_map(|(id, n)| match old.get(id) {
            Some(prev) if prev != n => Some((*n).clone()),
            _ => None,
        })
        .collect();

    let total_changes = added.len() + removed.len() + modified.len();
    GraphDelta {
        from_version: 0,
        to_version: 0,
        added,
        removed,
        modified,
        total_changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeType;
    use proptest::prelude::*;

    fn node(id: &str, deps: &[&str]) -> KnowledgeGraphNode {
        KnowledgeGraphNode::new(id, NodeType::Module).with_dependencies(deps.iter().copied())
    }

    #[test]
    fn identical_sets_produce_empty_delta() {
        let nodes = vec![node("a", &["b"]), node("b", &[])];
        let delta = diff_nodes(&nodes, &nodes);
        assert!(delta.is_empty());
        assert!(delta.added.is_empty() && delta.removed.is_empty() && delta.modified.is_empty());
    }

    #[test]
    fn classifies_added_removed_modified() {
        let a = vec![node("keep", &[]), node("gone", &[]), node("changed", &[])];
        let b = vec![node("keep", &[]), node("new", &[]), node("changed", &["keep"])];

        let delta = diff_nodes(&a, &b);
        assert_eq!(delta.added_ids(), vec!["new"]);
        assert_eq!(delta.removed_ids(), vec!["gone"]);
        assert_eq!(delta.modified_ids(), vec!["changed"]);
        assert_eq!(delta.modified[0].dependencies, vec!["keep".to_string()]);
        assert_eq!(delta.total_changes, 3);
    }

    #[test]
    fn output_is_sorted_by_id() {
        let b = vec![node("zeta", &[]), node("alpha", &[]), node("mid", &[])];
        let delta = diff_nodes(&[], &b);
        assert_eq!(delta.added_ids(), vec!["alpha", "mid", "zeta"]);
    }

    fn arb_nodes() -> impl Strategy<Value = Vec<KnowledgeGraphNode>> {
        proptest::collection::btree_map("[a-f]{1,2}", proptest::collection::vec("[a-f]", 0..3), 0..8)
            .prop_map(|m| {
                m.into_iter()
                    .map(|(id, deps)| KnowledgeGraphNode::new(id, NodeType::Module).with_dependencies(deps))
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn diff_is_antisymmetric(a in arb_nodes(), b in arb_nodes()) {
            let ab = diff_nodes(&a, &b);
            let ba = diff_nodes(&b, &a);
            prop_assert_eq!(ab.added_ids(), ba.removed_ids());
            prop_assert_eq!(ab.removed_ids(), ba.added_ids());
            prop_assert_eq!(ab.modified_ids(), ba.modified_ids());
            prop_assert_eq!(ab.total_changes, ba.total_changes);
        }

        #[test]
        fn self_diff_is_empty(a in arb_nodes()) {
            prop_assert_eq!(diff_nodes(&a, &a).total_changes, 0);
        }
    }
}
