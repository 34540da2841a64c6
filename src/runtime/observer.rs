//! Construction callbacks from the simulated builder framework

use crate::graph::{Graph, Link, NodeKind};

/// Answer of an observer: keep running the host routine or stop it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Notified synchronously while a builder routine constructs its topology
pub trait ConstructionObserver {
    fn node_added(&mut self, _name: &str, _kind: NodeKind) -> Flow {
        Flow::Continue
    }

    fn link_added(&mut self, _link: &Link) -> Flow {
        Flow::Continue
    }

    /// The framework finished building a topology object
    fn topology_built(&mut self, graph: &Graph) -> Flow;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePolicy {
    /// Record every finished topology and let the routine continue
    Observe,
    /// Record the first finished topology and stop the routine
    StopAfterFirst,
}

/// Observer that keeps the most recently finished topology
#[derive(Debug)]
pub struct CaptureObserver {
    policy: CapturePolicy,
    captured: Option<Graph>,
    nodes_seen: usize,
    links_seen: usize,
}

impl CaptureObserver {
    pub fn new(policy: CapturePolicy) -> Self {
        Self {
            policy,
            captured: None,
            nodes_seen: 0,
            links_seen: 0,
        }
    }

    pub fn set_policy(&mut self, policy: CapturePolicy) {
        self.policy = policy;
    }

    pub fn captured(&self) -> Option<&Graph> {
        self.captured.as_ref()
    }

    pub fn take(&mut self) -> Option<Graph> {
        self.captured.take()
    }

    pub fn nodes_seen(&self) -> usize {
        self.nodes_seen
    }

    pub fn links_seen(&self) -> usize {
        self.links_seen
    }
}

impl ConstructionObserver for CaptureObserver {
    fn node_added(&mut self, _name: &str, _kind: NodeKind) -> Flow {
        self.nodes_seen += 1;
        Flow::Continue
    }

    fn link_added(&mut self, _link: &Link) -> Flow {
        self.links_seen += 1;
        Flow::Continue
    }

    fn topology_built(&mut self, graph: &Graph) -> Flow {
        self.captured = Some(graph.clone());
        match self.policy {
            CapturePolicy::Observe => Flow::Continue,
            CapturePolicy::StopAfterFirst => Flow::Stop,
        }
    }
}
