// src/graph/build_graph.rs

//! Deduplicated build DAG and the dealiaser that produces it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tracing::{debug, trace};

use crate::errors::{ReprodError, Result};
use crate::graph::canonical::canonical_id;
use crate::graph::node::{Cacheable, Node, NodeId, Pipeline, Target};
use crate::graph::order;
use crate::storage::Storage;
use crate::types::HashAlgorithm;

/// A named edge from a [`BuildNode`] to one of its dealiased inputs.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    pub node: Arc<BuildNode>,
}

/// Node of the deduplicated DAG.
///
/// Immutable after construction apart from the two memo cells, which are
/// filled on first access and never change afterwards.
pub struct BuildNode {
    data: Arc<Node>,
    label: String,
    deps: Vec<Dependency>,
    algorithm: HashAlgorithm,
    uid: OnceLock<String>,
    output_ready: OnceLock<bool>,
}

impl fmt::Debug for BuildNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildNode")
            .field("label", &self.label)
            .field("kind", &self.data.kind())
            .field("uid", &self.uid.get())
            .field("deps", &self.deps.iter().map(|d| &d.name).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl BuildNode {
    pub fn new(data: Arc<Node>, label: impl Into<String>, deps: Vec<Dependency>, algorithm: HashAlgorithm) -> Self {
        Self {
            data,
            label: label.into(),
            deps,
            algorithm,
            uid: OnceLock::new(),
            output_ready: OnceLock::new(),
        }
    }

    pub fn data(&self) -> &Node {
        &self.data
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.deps
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn is_target(&self) -> bool {
        self.data.is_target()
    }

    pub fn canonical(&self) -> Result<Value> {
        self.data.canonical(&self.deps)
    }

    pub fn manifest(&self) -> Result<Value> {
        self.data.manifest(self.uid()?, &self.deps)
    }

    /// Content address of this node. Errors are not cached.
    pub fn uid(&self) -> Result<&str> {
        if let Some(uid) = self.uid.get() {
            return Ok(uid);
        }
        let computed = canonical_id(&self.canonical()?, self.algorithm)?;
        Ok(self.uid.get_or_init(|| computed))
    }

    /// Whether this node's output already exists in `storage`.
    ///
    /// The first successful answer is cached for the lifetime of the node.
    pub fn output_ready(&self, storage: &dyn Storage) -> Result<bool> {
        if let Some(ready) = self.output_ready.get() {
            return Ok(*ready);
        }
        let uid = self.uid()?;
        let ready = self.data.exists(uid, &self.deps, storage)?;
        trace!(uid, label = %self.label, ready, "checked output");
        Ok(*self.output_ready.get_or_init(|| ready))
    }
}

enum Frame {
    Enter { id: NodeId, as_input: bool },
    Exit { id: NodeId, deps: Vec<(String, NodeId)> },
}

/// Container for one build run: the uid-keyed registry of deduplicated
/// nodes and the requested targets.
pub struct BuildGraph {
    storage: Arc<dyn Storage>,
    nodes: HashMap<String, Arc<BuildNode>>,
    targets: Vec<Arc<BuildNode>>,
    hooks: Vec<String>,
}

impl fmt::Debug for BuildGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildGraph")
            .field("nodes", &self.nodes.len())
            .field("targets", &self.targets)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl BuildGraph {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            nodes: HashMap::new(),
            targets: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Dealias `targets` out of `pipeline` into a fresh graph.
    pub fn from_pipeline(pipeline: &Pipeline, targets: &[NodeId], storage: Arc<dyn Storage>) -> Result<Self> {
        let mut graph = Self::new(storage);
        graph.hooks = pipeline.hooks().to_vec();
        for id in targets {
            graph.add_target(pipeline, *id)?;
        }
        Ok(graph)
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn hooks(&self) -> &[String] {
        &self.hooks
    }

    pub fn targets(&self) -> &[Arc<BuildNode>] {
        &self.targets
    }

    pub fn get(&self, uid: &str) -> Option<&Arc<BuildNode>> {
        self.nodes.get(uid)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register `id` as a build root.
    ///
    /// Target nodes are dealiased as they are; any other node is wrapped in
    /// a fresh target first. Requesting the same target twice is a no-op.
    pub fn add_target(&mut self, pipeline: &Pipeline, id: NodeId) -> Result<Arc<BuildNode>> {
        let root = pipeline
            .get(id)
            .ok_or_else(|| ReprodError::NotCacheable(format!("unknown node {id}")))?;

        let target = if root.is_target() {
            self.dealias(pipeline, id)?
        } else {
            let wrapped = self.dealias(pipeline, id)?;
            let label = format!("target:{}", wrapped.label());
            let candidate = BuildNode::new(
                Arc::new(Node::Target(Target { node: id })),
                label,
                vec![Dependency {
                    name: "node".to_string(),
                    node: wrapped,
                }],
                pipeline.algorithm(),
            );
            let uid = candidate.uid()?.to_string();
            Arc::clone(
                self.nodes
                    .entry(uid)
                    .or_insert_with(|| Arc::new(candidate)),
            )
        };

        if !self.targets.iter().any(|t| Arc::ptr_eq(t, &target)) {
            debug!(target = %target.label(), "registered build target");
            self.targets.push(Arc::clone(&target));
        }
        Ok(target)
    }

    /// Convert the raw subgraph under `root` into deduplicated build nodes.
    ///
    /// Nothing is registered unless the whole subgraph dealiases cleanly.
    pub fn dealias(&mut self, pipeline: &Pipeline, root: NodeId) -> Result<Arc<BuildNode>> {
        let mut staged: HashMap<String, Arc<BuildNode>> = HashMap::new();
        let mut memo: HashMap<NodeId, Arc<BuildNode>> = HashMap::new();
        let mut on_path: HashSet<NodeId> = HashSet::new();
        let mut path: Vec<NodeId> = Vec::new();
        let mut stack = vec![Frame::Enter {
            id: root,
            as_input: false,
        }];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter { id, as_input } => {
                    if memo.contains_key(&id) {
                        continue;
                    }

                    if on_path.contains(&id) {
                        let start = path.iter().position(|p| *p == id).unwrap_or(0);
                        let mut cycle: Vec<String> = path[start..]
                            .iter()
                            .map(|p| pipeline.label(*p).to_string())
                            .collect();
                        cycle.push(pipeline.label(id).to_string());
                        return Err(ReprodError::CycleDetected(cycle));
                    }

                    let node = pipeline
                        .get(id)
                        .ok_or_else(|| ReprodError::NotCacheable(format!("unknown node {id}")))?;

                    if as_input && node.is_target() {
                        return Err(ReprodError::NotCacheable(format!(
                            "target '{}' cannot be used as an input",
                            pipeline.label(id)
                        )));
                    }

                    let deps = node.dependencies()?;

                    on_path.insert(id);
                    path.push(id);

                    let children: Vec<NodeId> = deps.iter().map(|(_, dep)| *dep).collect();
                    stack.push(Frame::Exit { id, deps });
                    for dep in children.into_iter().rev() {
                        stack.push(Frame::Enter {
                            id: dep,
                            as_input: true,
                        });
                    }
                }
                Frame::Exit { id, deps } => {
                    on_path.remove(&id);
                    path.pop();

                    let mut resolved = Vec::with_capacity(deps.len());
                    for (name, dep) in deps {
                        let node = memo.get(&dep).cloned().ok_or_else(|| {
                            ReprodError::NotCacheable(format!("unresolved input '{name}'"))
                        })?;
                        resolved.push(Dependency { name, node });
                    }

                    let data = pipeline
                        .get(id)
                        .cloned()
                        .ok_or_else(|| ReprodError::NotCacheable(format!("unknown node {id}")))?;
                    let candidate = BuildNode::new(data, pipeline.label(id), resolved, pipeline.algorithm());
                    let uid = candidate.uid()?.to_string();

                    let chosen = match self.nodes.get(&uid).or_else(|| staged.get(&uid)) {
                        Some(existing) => {
                            trace!(uid = %uid, label = %pipeline.label(id), "dealiased onto existing node");
                            Arc::clone(existing)
                        }
                        None => {
                            let node = Arc::new(candidate);
                            staged.insert(uid, Arc::clone(&node));
                            node
                        }
                    };
                    memo.insert(id, chosen);
                }
            }
        }

        let result = memo
            .remove(&root)
            .ok_or_else(|| ReprodError::NotCacheable(format!("unknown node {root}")))?;

        debug!(added = staged.len(), total = self.nodes.len() + staged.len(), "dealiased subgraph");
        self.nodes.extend(staged);
        Ok(result)
    }

    /// All nodes reachable from the targets, dependencies first.
    pub fn dependency_order(&self) -> Result<Vec<Arc<BuildNode>>> {
        order::postorder(&self.targets, |_| Ok(false))
    }

    /// Like [`dependency_order`](Self::dependency_order), but skips every
    /// node whose output already exists, together with everything below it.
    pub fn build_order(&self) -> Result<Vec<Arc<BuildNode>>> {
        let storage = self.storage.as_ref();
        order::postorder(&self.targets, |node| node.output_ready(storage))
    }
}
