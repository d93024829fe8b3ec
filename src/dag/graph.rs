// src/dag/graph.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::dag::job::JobId;
use crate::errors::Result;
use crate::graph::BuildNode;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct JobNode {
    deps: Vec<JobId>,
    dependents: Vec<JobId>,
}

/// Adjacency over the jobs of one build, keyed by uid.
///
/// Only edges between build-order nodes are kept: a dependency that is not
/// in the build order already has its output and never blocks anything.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    nodes: HashMap<JobId, JobNode>,
    order: Vec<JobId>,
}

impl JobGraph {
    /// Build from a build order (dependencies first).
    pub fn from_build_order(order: &[Arc<BuildNode>]) -> Result<Self> {
        let mut uids = Vec::with_capacity(order.len());
        for node in order {
            uids.push(node.uid()?.to_string());
        }
        let members: HashSet<&str> = uids.iter().map(String::as_str).collect();

        let mut nodes: HashMap<JobId, JobNode> = HashMap::new();
        for (node, uid) in order.iter().zip(&uids) {
            let mut deps = Vec::new();
            for dep in node.dependencies() {
                let dep_uid = dep.node.uid()?;
                if members.contains(dep_uid) && !deps.iter().any(|d| d == dep_uid) {
                    deps.push(dep_uid.to_string());
                }
            }
            nodes.entry(uid.clone()).or_default().deps = deps;
        }

        for uid in &uids {
            let deps = nodes.get(uid).map(|n| n.deps.clone()).unwrap_or_default();
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(uid.clone());
                }
            }
        }

        Ok(Self { nodes, order: uids })
    }

    /// Job uids in build order.
    pub fn jobs(&self) -> &[JobId] {
        &self.order
    }

    pub fn dependencies_of(&self, uid: &str) -> &[JobId] {
        self.nodes
            .get(uid)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, uid: &str) -> &[JobId] {
        self.nodes
            .get(uid)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}
