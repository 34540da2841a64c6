//! In-memory topology graph
//!
//! A [`Graph`] holds routers and switches keyed by name plus the links
//! between their interfaces. Every link is stored once in the link list and
//! is visible from both endpoints through the per-node interface maps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{0}' already exists")]
    DuplicateNode(String),

    #[error("node '{name}' is a {existing}, cannot redeclare it as a {requested}")]
    KindConflict {
        name: String,
        existing: NodeKind,
        requested: NodeKind,
    },

    #[error("interface '{interface}' already in use on node '{node}'")]
    DuplicateInterface { node: String, interface: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Router,
    Switch,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Router => write!(f, "router"),
            NodeKind::Switch => write!(f, "switch"),
        }
    }
}

/// One side of a link: a node and its local interface name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub node: String,
    pub interface: String,
}

impl Endpoint {
    pub fn new(node: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            interface: interface.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub a: Endpoint,
    pub b: Endpoint,
}

impl Link {
    /// The endpoint opposite to `node`, if `node` takes part in the link
    pub fn peer_of(&self, node: &str) -> Option<&Endpoint> {
        if self.a.node == node {
            Some(&self.b)
        } else if self.b.node == node {
            Some(&self.a)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    interfaces: BTreeMap<String, Endpoint>,
    next_interface: usize,
}

impl Node {
    fn new(name: String, kind: NodeKind) -> Self {
        Self {
            name,
            kind,
            interfaces: BTreeMap::new(),
            next_interface: 0,
        }
    }

    /// Local interface name mapped to the peer endpoint it is wired to
    pub fn interfaces(&self) -> &BTreeMap<String, Endpoint> {
        &self.interfaces
    }

    pub fn is_router(&self) -> bool {
        self.kind == NodeKind::Router
    }

    pub fn is_switch(&self) -> bool {
        self.kind == NodeKind::Switch
    }

    fn allocate_interface(&mut self) -> String {
        loop {
            let candidate = format!("{}-eth{}", self.name, self.next_interface);
            self.next_interface += 1;
            if !self.interfaces.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    nodes: BTreeMap<String, Node>,
    links: Vec<Link>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, failing if the name is taken
    pub fn add_node(&mut self, name: &str, kind: NodeKind) -> Result<(), GraphError> {
        if self.nodes.contains_key(name) {
            return Err(GraphError::DuplicateNode(name.to_string()));
        }
        self.nodes
            .insert(name.to_string(), Node::new(name.to_string(), kind));
        Ok(())
    }

    /// Add a node unless one of the same kind already exists
    pub fn ensure_node(&mut self, name: &str, kind: NodeKind) -> Result<(), GraphError> {
        match self.nodes.get(name) {
            Some(existing) if existing.kind == kind => Ok(()),
            Some(existing) => Err(GraphError::KindConflict {
                name: name.to_string(),
                existing: existing.kind,
                requested: kind,
            }),
            None => self.add_node(name, kind),
        }
    }

    /// Record a link between two explicit endpoints
    pub fn add_link(&mut self, a: Endpoint, b: Endpoint) -> Result<(), GraphError> {
        for endpoint in [&a, &b] {
            let node = self
                .nodes
                .get(&endpoint.node)
                .ok_or_else(|| GraphError::UnknownNode(endpoint.node.clone()))?;
            if node.interfaces.contains_key(&endpoint.interface) {
                return Err(GraphError::DuplicateInterface {
                    node: endpoint.node.clone(),
                    interface: endpoint.interface.clone(),
                });
            }
        }
        if a == b {
            return Err(GraphError::DuplicateInterface {
                node: a.node,
                interface: a.interface,
            });
        }

        if let Some(node) = self.nodes.get_mut(&a.node) {
            node.interfaces.insert(a.interface.clone(), b.clone());
        }
        if let Some(node) = self.nodes.get_mut(&b.node) {
            node.interfaces.insert(b.interface.clone(), a.clone());
        }
        self.links.push(Link { a, b });
        Ok(())
    }

    /// Link two nodes, allocating `<node>-eth<N>` names on both sides
    pub fn connect(&mut self, a: &str, b: &str) -> Result<Link, GraphError> {
        let a_if = self.allocate_interface(a)?;
        let b_if = self.allocate_interface(b)?;
        let link = Link {
            a: Endpoint::new(a, a_if),
            b: Endpoint::new(b, b_if),
        };
        self.add_link(link.a.clone(), link.b.clone())?;
        Ok(link)
    }

    fn allocate_interface(&mut self, node: &str) -> Result<String, GraphError> {
        self.nodes
            .get_mut(node)
            .map(Node::allocate_interface)
            .ok_or_else(|| GraphError::UnknownNode(node.to_string()))
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Nodes in name order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn routers(&self) -> impl Iterator<Item = &Node> {
        self.nodes().filter(|n| n.is_router())
    }

    pub fn switches(&self) -> impl Iterator<Item = &Node> {
        self.nodes().filter(|n| n.is_switch())
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn router_count(&self) -> usize {
        self.routers().count()
    }

    pub fn switch_count(&self) -> usize {
        self.switches().count()
    }
}
