use regex::Regex;
use std::sync::LazyLock;

use crate::schema::{ExtractionResult, GraphNode, GraphRelationship};

static SPACES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
static RELATION_SEPARATORS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-]+").expect("valid separator pattern"));

/// Canonical forms for model output so the same entity gets the same id in every chunk.
#[derive(Debug, Default, Clone, Copy)]
pub struct EntityNormalizer;

impl EntityNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Trim, collapse whitespace and capitalize each word. Acronyms are left alone.
    pub fn normalize_id(&self, name: &str) -> String {
        let collapsed = SPACES_RE.replace_all(name.trim(), " ");
        collapsed
            .split(' ')
            .map(capitalize_first)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `person` and `PERSON` both become `Person`.
    pub fn normalize_type(&self, label: &str) -> String {
        let label = label.trim();
        let mut chars = label.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
            None => String::new(),
        }
    }

    /// `works at` and `works-at` both become `WORKS_AT`.
    pub fn normalize_relation_type(&self, label: &str) -> String {
        RELATION_SEPARATORS_RE
            .replace_all(label.trim(), "_")
            .to_uppercase()
    }

    /// Normalize every id and label; nodes without an id are dropped.
    pub fn normalize_result(&self, result: ExtractionResult) -> ExtractionResult {
        let nodes = result
            .nodes
            .into_iter()
            .map(|node| GraphNode {
                id: self.normalize_id(&node.id),
                node_type: self.normalize_type(&node.node_type),
            })
            .filter(|node| !node.id.is_empty())
            .collect();

        let relationships = result
            .relationships
            .into_iter()
            .map(|rel| GraphRelationship {
                source: self.normalize_id(&rel.source),
                target: self.normalize_id(&rel.target),
                relation_type: self.normalize_relation_type(&rel.relation_type),
            })
            .collect();

        ExtractionResult {
            nodes,
            relationships,
        }
    }
}

fn capitalize_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let normalizer = EntityNormalizer::new();

        assert_eq!(normalizer.normalize_id("alice"), "Alice");
        assert_eq!(normalizer.normalize_id("  acme   corp "), "Acme Corp");
        assert_eq!(normalizer.normalize_id("IBM research"), "IBM Research");
    }

    #[test]
    fn test_type_and_relation_labels() {
        let normalizer = EntityNormalizer::new();

        assert_eq!(normalizer.normalize_type("ORGANIZATION"), "Organization");
        assert_eq!(normalizer.normalize_type(" person"), "Person");
        assert_eq!(normalizer.normalize_type(""), "");
        assert_eq!(normalizer.normalize_relation_type("works at"), "WORKS_AT");
        assert_eq!(normalizer.normalize_relation_type("part-of"), "PART_OF");
    }

    #[test]
    fn test_result_endpoints_match_node_ids() {
        let normalizer = EntityNormalizer::new();
        let result = ExtractionResult {
            nodes: vec![
                GraphNode::new("alice", "person"),
                GraphNode::new("acme", "organization"),
                GraphNode::new("  ", "concept"),
            ],
            relationships: vec![GraphRelationship::new("alice", "works at", "acme")],
        };

        let normalized = normalizer.normalize_result(result);

        assert_eq!(normalized.nodes.len(), 2);
        assert_eq!(normalized.nodes[0], GraphNode::new("Alice", "Person"));
        assert_eq!(
            normalized.relationships[0],
            GraphRelationship::new("Alice", "WORKS_AT", "Acme")
        );
    }
}
