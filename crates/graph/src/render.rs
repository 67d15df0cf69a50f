use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;

use crate::merge::MergedGraph;

const VIS_NETWORK_CDN: &str =
    "https://unpkg.com/vis-network@9.1.9/standalone/umd/vis-network.min.js";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub height: String,
    pub background: String,
    pub font_color: String,
    pub label_max_len: usize,
    pub min_node_size: f64,
    pub max_node_size: f64,
    /// Draw nodes that take part in no relationship.
    pub show_isolated: bool,
    pub script_url: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            height: "900px".to_string(),
            background: "#1e1e1e".to_string(),
            font_color: "white".to_string(),
            label_max_len: 30,
            min_node_size: 20.0,
            max_node_size: 50.0,
            show_isolated: false,
            script_url: VIS_NETWORK_CDN.to_string(),
        }
    }
}

pub fn node_color(node_type: &str) -> &'static str {
    match node_type {
        "Person" => "#FFB347",
        "Organization" => "#87CEEB",
        "Location" => "#90EE90",
        "Concept" => "#DA70D6",
        "Event" => "#FF6F61",
        _ => "#D3D3D3",
    }
}

/// Renders a merged graph as a standalone vis-network HTML page.
#[derive(Debug, Clone, Default)]
pub struct GraphRenderer {
    config: RenderConfig,
}

impl GraphRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn render(&self, graph: &MergedGraph, title: &str) -> String {
        let data = self.network_data(graph);
        let options = self.options();

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="{script}"></script>
<style>
  body {{ margin: 0; background-color: {bg}; }}
  #graph {{ width: 100%; height: {height}; background-color: {bg}; }}
</style>
</head>
<body>
<div id="graph"></div>
<script>
  var data = {data};
  var nodes = new vis.DataSet(data.nodes);
  var edges = new vis.DataSet(data.edges);
  var container = document.getElementById("graph");
  var network = new vis.Network(container, {{ nodes: nodes, edges: edges }}, {options});
</script>
</body>
</html>
"#,
            title = escape_html(title),
            script = escape_html(&self.config.script_url),
            bg = escape_html(&self.config.background),
            height = escape_html(&self.config.height),
            data = script_json(&data),
            options = script_json(&options),
        )
    }

    /// The `{nodes, edges}` payload handed to vis-network.
    pub fn network_data(&self, graph: &MergedGraph) -> Value {
        let connected: HashSet<&str> = graph
            .relationships
            .iter()
            .flat_map(|r| [r.source.as_str(), r.target.as_str()])
            .collect();
        let max_degree = graph.max_degree();

        let nodes: Vec<Value> = graph
            .nodes
            .iter()
            .filter(|n| self.config.show_isolated || connected.contains(n.id.as_str()))
            .map(|node| {
                let degree = graph.degree(&node.id);
                json!({
                    "id": node.id,
                    "label": truncate_label(&node.id, self.config.label_max_len),
                    "title": format!("ID: {}\nType: {}", node.id, node.node_type),
                    "color": node_color(&node.node_type),
                    "group": node.node_type,
                    "shape": "dot",
                    "size": self.node_size(degree, max_degree),
                    "value": degree,
                    "font": { "size": 20, "color": self.config.font_color },
                })
            })
            .collect();

        let edges: Vec<Value> = graph
            .relationships
            .iter()
            .map(|rel| {
                json!({
                    "from": rel.source,
                    "to": rel.target,
                    "label": title_case(&rel.relation_type),
                    "arrows": "to",
                    "color": "#999999",
                    "font": { "color": "#ffffff", "size": 14, "face": "arial" },
                })
            })
            .collect();

        json!({ "nodes": nodes, "edges": edges })
    }

    fn node_size(&self, degree: usize, max_degree: usize) -> f64 {
        let (min, max) = (self.config.min_node_size, self.config.max_node_size);
        if max_degree == 0 {
            return min;
        }
        min + (max - min) * degree as f64 / max_degree as f64
    }

    fn options(&self) -> Value {
        json!({
            "layout": { "improvedLayout": true },
            "nodes": { "borderWidth": 1, "shadow": true },
            "edges": {
                "color": { "inherit": false },
                "smooth": { "enabled": true, "type": "dynamic" }
            },
            "interaction": {
                "hover": true,
                "navigationButtons": true,
                "keyboard": { "enabled": true },
                "tooltipDelay": 200
            },
            "physics": {
                "enabled": true,
                "solver": "barnesHut",
                "barnesHut": {
                    "gravitationalConstant": -2500,
                    "centralGravity": 0.2,
                    "springLength": 200,
                    "springConstant": 0.02,
                    "damping": 0.09
                },
                "minVelocity": 0.75,
                "stabilization": { "enabled": true, "iterations": 200 }
            }
        })
    }
}

fn truncate_label(label: &str, max_len: usize) -> String {
    if label.chars().count() <= max_len {
        return label.to_string();
    }
    let head: String = label.chars().take(max_len).collect();
    format!("{head}...")
}

/// Uppercase the first letter of every alphabetic run, lowercase the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// Inline JSON must not be able to close the surrounding <script> element.
fn script_json(value: &Value) -> String {
    value.to_string().replace("</", "<\\/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::GraphMerger;
    use extract::{ExtractionFragment, GraphNode, GraphRelationship};

    fn sample_graph() -> MergedGraph {
        GraphMerger::new().merge(&[ExtractionFragment {
            chunk_index: 0,
            nodes: vec![
                GraphNode::new("Alice", "Person"),
                GraphNode::new("Bob", "Person"),
                GraphNode::new("Acme", "Organization"),
                GraphNode::new("Loner", "Concept"),
            ],
            relationships: vec![
                GraphRelationship::new("Alice", "WORKS_AT", "Acme"),
                GraphRelationship::new("Bob", "LEADS", "Acme"),
            ],
        }])
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("WORKS_AT"), "Works_At");
        assert_eq!(title_case("leads"), "Leads");
        assert_eq!(title_case("part of"), "Part Of");
    }

    #[test]
    fn test_truncate_label() {
        assert_eq!(truncate_label("short", 30), "short");
        let long = "a".repeat(35);
        assert_eq!(truncate_label(&long, 30), format!("{}...", "a".repeat(30)));
    }

    #[test]
    fn test_isolated_nodes_hidden_by_default() {
        let graph = sample_graph();
        let data = GraphRenderer::default().network_data(&graph);

        let ids: Vec<&str> = data["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["Alice", "Bob", "Acme"]);
        assert_eq!(data["edges"].as_array().unwrap().len(), 2);

        let shown = GraphRenderer::new(RenderConfig {
            show_isolated: true,
            ..RenderConfig::default()
        })
        .network_data(&graph);
        assert_eq!(shown["nodes"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_node_style_follows_type_and_degree() {
        let data = GraphRenderer::default().network_data(&sample_graph());
        let nodes = data["nodes"].as_array().unwrap();

        let alice = &nodes[0];
        let acme = &nodes[2];
        assert_eq!(alice["color"], "#FFB347");
        assert_eq!(acme["color"], "#87CEEB");
        assert_eq!(acme["size"].as_f64().unwrap(), 50.0);
        assert_eq!(alice["size"].as_f64().unwrap(), 35.0);
        assert_eq!(data["edges"][0]["label"], "Works_At");
        assert_eq!(data["edges"][0]["arrows"], "to");
    }

    #[test]
    fn test_render_escapes_script_close() {
        let graph = GraphMerger::new().merge(&[ExtractionFragment {
            chunk_index: 0,
            nodes: vec![
                GraphNode::new("</script><b>", "Concept"),
                GraphNode::new("Acme", "Organization"),
            ],
            relationships: vec![GraphRelationship::new("</script><b>", "MENTIONS", "Acme")],
        }]);

        let html = GraphRenderer::default().render(&graph, "Doc <1>");

        assert!(html.contains("<title>Doc &lt;1&gt;</title>"));
        assert_eq!(html.matches("</script>").count(), 2);
        assert!(html.contains("new vis.Network"));
    }

    #[test]
    fn test_unknown_type_gets_default_color() {
        assert_eq!(node_color("Gadget"), "#D3D3D3");
    }
}
