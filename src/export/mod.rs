//! Canonical topology export
//!
//! Two projections of a [`Graph`]:
//!
//! - [`RichTopology`]: every router and switch with a per-peer link map
//!   carrying interface names, plus metadata.
//! - [`SimpleTopology`]: router name to the sorted, duplicate-free list of
//!   switches it is directly wired to.
//!
//! Both are built on `BTreeMap`/sorted `Vec`s, so serializing the same graph
//! twice yields identical bytes no matter in which order an extractor
//! discovered nodes and links.

use crate::graph::{Graph, Node, NodeKind};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which projection to export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    #[default]
    Rich,
    Simple,
}

impl Shape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Rich => "rich",
            Shape::Simple => "simple",
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Shape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rich" => Ok(Shape::Rich),
            "simple" => Ok(Shape::Simple),
            other => Err(format!(
                "invalid shape '{}', expected one of: rich, simple",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub interface: String,
    pub peer_interface: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub links: BTreeMap<String, LinkEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub total_routers: usize,
    pub total_switches: usize,
    pub exported_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichTopology {
    pub routers: BTreeMap<String, NodeEntry>,
    pub switches: BTreeMap<String, NodeEntry>,
    pub metadata: Metadata,
}

pub type SimpleTopology = BTreeMap<String, Vec<String>>;

/// An exported topology in either shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CanonicalTopology {
    Rich(RichTopology),
    Simple(SimpleTopology),
}

impl CanonicalTopology {
    pub fn shape(&self) -> Shape {
        match self {
            CanonicalTopology::Rich(_) => Shape::Rich,
            CanonicalTopology::Simple(_) => Shape::Simple,
        }
    }

    /// Pretty JSON followed by a newline
    pub fn to_json(&self) -> Result<String> {
        let mut text =
            serde_json::to_string_pretty(self).context("Failed to serialize topology to JSON")?;
        text.push('\n');
        Ok(text)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize topology to YAML")
    }
}

/// Project `graph` into `shape`; `source_id` ends up in the rich metadata
pub fn normalize(graph: &Graph, shape: Shape, source_id: &str) -> CanonicalTopology {
    match shape {
        Shape::Rich => CanonicalTopology::Rich(rich(graph, source_id)),
        Shape::Simple => CanonicalTopology::Simple(simple(graph)),
    }
}

pub fn rich(graph: &Graph, source_id: &str) -> RichTopology {
    let routers: BTreeMap<_, _> = graph
        .routers()
        .map(|n| (n.name.clone(), node_entry(n)))
        .collect();
    let switches: BTreeMap<_, _> = graph
        .switches()
        .map(|n| (n.name.clone(), node_entry(n)))
        .collect();

    RichTopology {
        metadata: Metadata {
            total_routers: routers.len(),
            total_switches: switches.len(),
            exported_from: source_id.to_string(),
        },
        routers,
        switches,
    }
}

// Several links to one peer collapse onto the smallest local interface.
fn node_entry(node: &Node) -> NodeEntry {
    let mut links = BTreeMap::new();
    for (local, peer) in node.interfaces() {
        links.entry(peer.node.clone()).or_insert_with(|| LinkEntry {
            interface: local.clone(),
            peer_interface: peer.interface.clone(),
        });
    }
    NodeEntry {
        kind: node.kind,
        links,
    }
}

/// Router to directly adjacent switches. Router/router and switch/switch
/// adjacency is not represented.
pub fn simple(graph: &Graph) -> SimpleTopology {
    graph
        .routers()
        .map(|router| {
            let switches: BTreeSet<&str> = router
                .interfaces()
                .values()
                .filter(|peer| {
                    graph
                        .node(&peer.node)
                        .map(|n| n.is_switch())
                        .unwrap_or(false)
                })
                .map(|peer| peer.node.as_str())
                .collect();
            (
                router.name.clone(),
                switches.into_iter().map(str::to_string).collect(),
            )
        })
        .collect()
}

/// Source identifier recorded as `exported_from`: the file stem
pub fn source_identifier(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Endpoint;

    fn star() -> Graph {
        let mut graph = Graph::new();
        for r in ["r1", "r2", "r3"] {
            graph.add_node(r, NodeKind::Router).unwrap();
        }
        graph.add_node("s1", NodeKind::Switch).unwrap();
        for r in ["r1", "r2", "r3"] {
            graph.connect("s1", r).unwrap();
        }
        graph
    }

    #[test]
    fn test_simple_shape_star() {
        let json = serde_json::to_value(simple(&star())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"r1": ["s1"], "r2": ["s1"], "r3": ["s1"]})
        );
    }

    #[test]
    fn test_simple_shape_collapses_duplicate_links() {
        let mut graph = Graph::new();
        graph.add_node("r1", NodeKind::Router).unwrap();
        graph.add_node("s1", NodeKind::Switch).unwrap();
        graph.connect("s1", "r1").unwrap();
        graph.connect("s1", "r1").unwrap();

        assert_eq!(simple(&graph)["r1"], vec!["s1".to_string()]);
    }

    #[test]
    fn test_simple_shape_drops_router_to_router() {
        let mut graph = Graph::new();
        graph.add_node("r1", NodeKind::Router).unwrap();
        graph.add_node("r2", NodeKind::Router).unwrap();
        graph.connect("r1", "r2").unwrap();

        let topo = simple(&graph);
        assert!(topo["r1"].is_empty());
        assert!(topo["r2"].is_empty());
    }

    #[test]
    fn test_rich_shape_layout() {
        let topo = rich(&star(), "test_star");
        let json = serde_json::to_value(&topo).unwrap();

        assert_eq!(json["routers"]["r1"]["type"], "router");
        assert_eq!(json["switches"]["s1"]["type"], "switch");
        assert_eq!(
            json["switches"]["s1"]["links"]["r2"],
            serde_json::json!({"interface": "s1-eth1", "peer_interface": "r2-eth0"})
        );
        assert_eq!(json["metadata"]["total_routers"], 3);
        assert_eq!(json["metadata"]["total_switches"], 1);
        assert_eq!(json["metadata"]["exported_from"], "test_star");
    }

    #[test]
    fn test_rich_shape_keeps_router_to_router() {
        let mut graph = Graph::new();
        graph.add_node("r1", NodeKind::Router).unwrap();
        graph.add_node("r2", NodeKind::Router).unwrap();
        graph.connect("r1", "r2").unwrap();

        let topo = rich(&graph, "x");
        assert_eq!(topo.routers["r1"].links["r2"].interface, "r1-eth0");
        assert_eq!(topo.routers["r2"].links["r1"].peer_interface, "r1-eth0");
    }

    #[test]
    fn test_output_independent_of_insertion_order() {
        let mut forward = Graph::new();
        forward.add_node("r1", NodeKind::Router).unwrap();
        forward.add_node("r2", NodeKind::Router).unwrap();
        forward.add_node("s1", NodeKind::Switch).unwrap();
        forward
            .add_link(Endpoint::new("s1", "s1-eth0"), Endpoint::new("r1", "r1-eth0"))
            .unwrap();
        forward
            .add_link(Endpoint::new("s1", "s1-eth1"), Endpoint::new("r2", "r2-eth0"))
            .unwrap();

        let mut backward = Graph::new();
        backward.add_node("s1", NodeKind::Switch).unwrap();
        backward.add_node("r2", NodeKind::Router).unwrap();
        backward.add_node("r1", NodeKind::Router).unwrap();
        backward
            .add_link(Endpoint::new("r2", "r2-eth0"), Endpoint::new("s1", "s1-eth1"))
            .unwrap();
        backward
            .add_link(Endpoint::new("r1", "r1-eth0"), Endpoint::new("s1", "s1-eth0"))
            .unwrap();

        for shape in [Shape::Rich, Shape::Simple] {
            let a = normalize(&forward, shape, "t").to_json().unwrap();
            let b = normalize(&backward, shape, "t").to_json().unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_parallel_links_keep_smallest_interface() {
        let mut graph = Graph::new();
        graph.add_node("r1", NodeKind::Router).unwrap();
        graph.add_node("s1", NodeKind::Switch).unwrap();
        graph
            .add_link(Endpoint::new("r1", "r1-eth5"), Endpoint::new("s1", "s1-eth0"))
            .unwrap();
        graph
            .add_link(Endpoint::new("r1", "r1-eth2"), Endpoint::new("s1", "s1-eth1"))
            .unwrap();

        let topo = rich(&graph, "x");
        assert_eq!(topo.routers["r1"].links["s1"].interface, "r1-eth2");
        assert_eq!(topo.switches["s1"].links["r1"].interface, "s1-eth0");
    }

    #[test]
    fn test_json_ends_with_newline_and_is_stable() {
        let topo = normalize(&star(), Shape::Rich, "test_star");
        let first = topo.to_json().unwrap();
        assert!(first.ends_with("}\n"));
        assert_eq!(first, topo.to_json().unwrap());
    }

    #[test]
    fn test_yaml_rendering() {
        let yaml = normalize(&star(), Shape::Simple, "t").to_yaml().unwrap();
        assert!(yaml.contains("r1:"));
        assert!(yaml.contains("- s1"));
    }

    #[test]
    fn test_shape_parse() {
        assert_eq!("Simple".parse::<Shape>().unwrap(), Shape::Simple);
        assert!("tree".parse::<Shape>().is_err());
    }

    #[test]
    fn test_source_identifier_is_stem() {
        assert_eq!(
            source_identifier(Path::new("/a/bgp_x/test_bgp_x.py")),
            "test_bgp_x"
        );
    }
}
