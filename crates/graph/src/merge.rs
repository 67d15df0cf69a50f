use extract::{ExtractionFragment, GraphNode, GraphRelationship};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Deduplicated graph with a degree score per node.
///
/// Every relationship has both endpoints in `nodes`, and `degrees` counts each
/// relationship once for its source and once for its target.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergedGraph {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
    pub degrees: BTreeMap<String, usize>,
    #[serde(skip)]
    node_to_idx: HashMap<String, usize>,
}

impl MergedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, replacing any node with the same id in place.
    /// Returns the node's position and whether it replaced an existing one.
    fn upsert_node(&mut self, node: GraphNode) -> (usize, bool) {
        if let Some(&idx) = self.node_to_idx.get(&node.id) {
            self.nodes[idx] = node;
            return (idx, true);
        }

        let idx = self.nodes.len();
        self.node_to_idx.insert(node.id.clone(), idx);
        self.nodes.push(node);
        (idx, false)
    }

    fn from_parts(nodes: Vec<GraphNode>, relationships: Vec<GraphRelationship>) -> Self {
        let mut graph = Self::new();
        for node in nodes {
            graph.upsert_node(node);
        }
        graph.relationships = relationships;
        graph.recompute_degrees();
        graph
    }

    fn recompute_degrees(&mut self) {
        self.degrees = self.nodes.iter().map(|n| (n.id.clone(), 0)).collect();
        for rel in &self.relationships {
            if let Some(d) = self.degrees.get_mut(&rel.source) {
                *d += 1;
            }
            if let Some(d) = self.degrees.get_mut(&rel.target) {
                *d += 1;
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_to_idx.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_to_idx.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn degree(&self, id: &str) -> usize {
        self.degrees.get(id).copied().unwrap_or(0)
    }

    pub fn max_degree(&self) -> usize {
        self.degrees.values().copied().max().unwrap_or(0)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The whole graph as a single fragment, e.g. to merge it with new extractions.
    pub fn to_fragment(&self) -> ExtractionFragment {
        ExtractionFragment {
            chunk_index: 0,
            nodes: self.nodes.clone(),
            relationships: self.relationships.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub fragments: usize,
    pub empty_fragments: usize,
    pub overwritten_nodes: usize,
    pub dangling_relationships: usize,
    pub duplicate_relationships: usize,
    pub truncated_nodes: usize,
    /// Relationships lost because an endpoint was cut by `max_nodes`.
    pub truncated_relationships: usize,
}

#[derive(Debug, Clone, Default)]
pub struct GraphMerger {
    max_nodes: Option<usize>,
}

impl GraphMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the `max_nodes` highest-degree nodes (display safeguard).
    pub fn with_max_nodes(mut self, max_nodes: Option<usize>) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn merge(&self, fragments: &[ExtractionFragment]) -> MergedGraph {
        self.merge_with_stats(fragments).0
    }

    pub fn merge_with_stats(&self, fragments: &[ExtractionFragment]) -> (MergedGraph, MergeStats) {
        let mut stats = MergeStats {
            fragments: fragments.len(),
            empty_fragments: fragments.iter().filter(|f| f.is_empty()).count(),
            ..MergeStats::default()
        };

        // Fixed order so that last-write-wins does not depend on arrival order.
        let mut ordered: Vec<&ExtractionFragment> = fragments.iter().collect();
        ordered.sort_by_key(|f| f.chunk_index);

        let mut graph = MergedGraph::new();
        for fragment in &ordered {
            for node in &fragment.nodes {
                let (_, replaced) = graph.upsert_node(node.clone());
                if replaced {
                    stats.overwritten_nodes += 1;
                }
            }
        }

        let mut seen: HashSet<&GraphRelationship> = HashSet::new();
        for rel in ordered.iter().flat_map(|f| f.relationships.iter()) {
            if !graph.contains(&rel.source) || !graph.contains(&rel.target) {
                stats.dangling_relationships += 1;
                continue;
            }
            if !seen.insert(rel) {
                stats.duplicate_relationships += 1;
                continue;
            }
            graph.relationships.push(rel.clone());
        }
        graph.recompute_degrees();

        if let Some(max_nodes) = self.max_nodes {
            if graph.node_count() > max_nodes {
                let before = graph.relationship_count();
                stats.truncated_nodes = graph.node_count() - max_nodes;
                graph = truncate(graph, max_nodes);
                stats.truncated_relationships = before - graph.relationship_count();
            }
        }

        debug!(
            nodes = graph.node_count(),
            relationships = graph.relationship_count(),
            overwritten_nodes = stats.overwritten_nodes,
            dangling_relationships = stats.dangling_relationships,
            duplicate_relationships = stats.duplicate_relationships,
            truncated_nodes = stats.truncated_nodes,
            truncated_relationships = stats.truncated_relationships,
            "merged fragments"
        );

        (graph, stats)
    }
}

/// Keep the top `max_nodes` by degree (ties by insertion order), preserving insertion order.
fn truncate(graph: MergedGraph, max_nodes: usize) -> MergedGraph {
    let mut ranked: Vec<usize> = (0..graph.nodes.len()).collect();
    ranked.sort_by(|&a, &b| {
        graph
            .degree(&graph.nodes[b].id)
            .cmp(&graph.degree(&graph.nodes[a].id))
    });
    let keep: HashSet<usize> = ranked.into_iter().take(max_nodes).collect();

    let nodes: Vec<GraphNode> = graph
        .nodes
        .iter()
        .enumerate()
        .filter(|(idx, _)| keep.contains(idx))
        .map(|(_, node)| node.clone())
        .collect();
    let kept_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let relationships = graph
        .relationships
        .iter()
        .filter(|r| kept_ids.contains(r.source.as_str()) && kept_ids.contains(r.target.as_str()))
        .cloned()
        .collect();

    MergedGraph::from_parts(nodes, relationships)
}
