// Structural checks over a knowledge graph: dependency cycles and dangling
// references to components that are not nodes of the snapshot.

use std::collections::HashSet;

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use crate::model::{DEPENDS_ON, KnowledgeGraph};

/// Strongly connected components of size > 1 in the `depends_on` relation.
///
/// Each cycle is sorted by id, and cycles are sorted by their first member.
pub fn dependency_cycles(graph: &KnowledgeGraph) -> Vec<Vec<String>> {
    let mut g: DiGraphMap<&str, ()> = DiGraphMap::new();
    for node in &graph.nodes {
        g.add_node(node.id.as_str());
    }
    for edge in graph.edges.iter().filter(|e| e.relation == DEPENDS_ON) {
        g.add_edge(edge.from.as_str(), edge.to.as_str(), ());
    }

    let mut cycles: Vec<Vec<String>> = tarjan_scc(&g)
        .into_iter()
        .filter(|scc| scc.len() > 1 || scc.first().is_some_and(|n| g.contains_edge(*n, *n)))
        .map(|scc| {
            let mut ids: Vec<String> = scc.into_iter().map(str::to_string).collect();
            ids.sort();
            ids
        })
        .collect();
    cycles.sort();
    cycles
}

/// `(node, dependency)` pairs whose dependency is not a node of the graph.
pub fn dangling_dependencies(graph: &KnowledgeGraph) -> Vec<(String, String)> {
    let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    graph
        .nodes
        .iter()
        .flat_map(|n| {
            n.dependencies
                .iter()
                .filter(|d| !ids.contains(d.as_str()))
                .map(|d| (n.id.clone(), d.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KnowledgeGraphNode, NodeType};

    fn graph(layout: &[(&str, &[&str])]) -> KnowledgeGraph {
        KnowledgeGraph::from_nodes(
            layout.iter()
                .map(|(id, deps)| {
                    KnowledgeGraphNode::new(*id, NodeType::Module).with_dependencies(deps.iter().copied())
                })
                .collect(),
        )
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        assert!(dependency_cycles(&g).is_empty());
    }

    #[test]
    fn detects_two_node_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &["a"])]);
        assert_eq!(
            dependency_cycles(&g),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
    }

    #[test]
    fn reports_dangling_dependencies() {
        let g = graph(&[("a", &["b", "missing"]), ("b", &[])]);
        assert_eq!(
            dangling_dependencies(&g),
            vec![("a".to_string(), "missing".to_string())]
        );
    }
}
