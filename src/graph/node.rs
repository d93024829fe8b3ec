// src/graph/node.rs

//! Raw graph nodes as authored, before dealiasing.
//!
//! Nodes live in a [`Pipeline`] arena and refer to each other by [`NodeId`].
//! Nothing prevents an author from wiring a cycle here; the dealiaser is
//! where that is caught.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::digest::verify::{verify, VerifyRequest};
use crate::digest::{digests_from_metadata, first_mismatch, DigestMap};
use crate::errors::{ReprodError, Result};
use crate::graph::build_graph::Dependency;
use crate::jobspec::{output_prefix, result_location};
use crate::storage::Storage;
use crate::types::HashAlgorithm;

/// Index of a node in its [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Leaf data reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalFile {
    pub location: String,
    pub digests: DigestMap,
}

/// One named input of a transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Node(NodeId),
    /// An inline value. Only nodes can take part in the graph, so literal
    /// inputs make the transform non-cacheable.
    Literal(Value),
}

/// Internal computation step.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub op: String,
    pub version: String,
    pub params: Value,
    pub inputs: BTreeMap<String, Input>,
}

/// Build-root wrapper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    External(ExternalFile),
    Transform(Transform),
    Target(Target),
}

impl Node {
    pub fn kind(&self) -> &'static str {
        match self {
            Node::External(_) => "external",
            Node::Transform(_) => "transform",
            Node::Target(_) => "target",
        }
    }

    pub fn as_transform(&self) -> Option<&Transform> {
        match self {
            Node::Transform(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_target(&self) -> bool {
        matches!(self, Node::Target(_))
    }
}

/// Capabilities every graph node provides.
///
/// `inputs` are the node's dealiased dependencies, in the same order as
/// [`Cacheable::dependencies`] returned them.
pub trait Cacheable {
    /// Named raw dependencies, sorted by name.
    fn dependencies(&self) -> Result<Vec<(String, NodeId)>>;

    fn canonical(&self, inputs: &[Dependency]) -> Result<Value>;

    fn manifest(&self, uid: &str, inputs: &[Dependency]) -> Result<Value>;

    /// Whether this node's output is already durably available.
    fn exists(&self, uid: &str, inputs: &[Dependency], storage: &dyn Storage) -> Result<bool>;
}

impl Cacheable for ExternalFile {
    fn dependencies(&self) -> Result<Vec<(String, NodeId)>> {
        Ok(Vec::new())
    }

    fn canonical(&self, _inputs: &[Dependency]) -> Result<Value> {
        Ok(json!({
            "type": "external",
            "location": self.location,
            "digests": digest_object(&self.digests),
        }))
    }

    fn manifest(&self, uid: &str, _inputs: &[Dependency]) -> Result<Value> {
        Ok(json!({
            "type": "external",
            "uid": uid,
            "location": self.location,
            "digests": digest_object(&self.digests),
        }))
    }

    fn exists(&self, _uid: &str, _inputs: &[Dependency], storage: &dyn Storage) -> Result<bool> {
        let Some(meta) = storage.head(&self.location)? else {
            return Ok(false);
        };

        if self.digests.is_empty() {
            return Ok(true);
        }

        let recorded = digests_from_metadata(&meta.metadata);
        if let Some((algorithm, expected, actual)) = first_mismatch(&self.digests, &recorded) {
            return Err(ReprodError::DigestMismatch {
                location: self.location.clone(),
                algorithm,
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }

        // Declared digests that were never recorded are computed from the
        // content and written back before the file is trusted.
        if self.digests.keys().any(|algo| !recorded.contains_key(algo)) {
            let mut request = VerifyRequest::new(self.location.clone());
            request.expected = self
                .digests
                .iter()
                .map(|(algo, hex)| (*algo, Some(hex.clone())))
                .collect();
            verify(storage, &request)?;
        }

        Ok(true)
    }
}

impl Cacheable for Transform {
    fn dependencies(&self) -> Result<Vec<(String, NodeId)>> {
        self.inputs
            .iter()
            .map(|(name, input)| match input {
                Input::Node(id) => Ok((name.clone(), *id)),
                Input::Literal(value) => Err(ReprodError::NotCacheable(format!(
                    "input '{name}' of op '{}' is a literal value ({value}), not a graph node",
                    self.op
                ))),
            })
            .collect()
    }

    fn canonical(&self, inputs: &[Dependency]) -> Result<Value> {
        let mut input_ids = Map::new();
        for dep in inputs {
            input_ids.insert(dep.name.clone(), Value::String(dep.node.uid()?.to_string()));
        }

        Ok(json!({
            "type": "transform",
            "op": self.op,
            "version": self.version,
            "params": self.params,
            "inputs": input_ids,
        }))
    }

    fn manifest(&self, uid: &str, inputs: &[Dependency]) -> Result<Value> {
        let mut described = Map::new();
        for dep in inputs {
            let dep_uid = dep.node.uid()?;
            let location = match dep.node.data() {
                Node::External(file) => file.location.clone(),
                _ => output_prefix(dep_uid),
            };
            described.insert(
                dep.name.clone(),
                json!({
                    "uid": dep_uid,
                    "kind": dep.node.data().kind(),
                    "location": location,
                }),
            );
        }

        Ok(json!({
            "type": "transform",
            "uid": uid,
            "op": self.op,
            "version": self.version,
            "params": self.params,
            "inputs": described,
        }))
    }

    fn exists(&self, uid: &str, _inputs: &[Dependency], storage: &dyn Storage) -> Result<bool> {
        storage.exists(&result_location(uid))
    }
}

impl Cacheable for Target {
    fn dependencies(&self) -> Result<Vec<(String, NodeId)>> {
        Ok(vec![("node".to_string(), self.node)])
    }

    fn canonical(&self, inputs: &[Dependency]) -> Result<Value> {
        let wrapped = single_input(inputs)?;
        Ok(json!({
            "type": "target",
            "node": wrapped.node.uid()?,
        }))
    }

    fn manifest(&self, uid: &str, inputs: &[Dependency]) -> Result<Value> {
        let wrapped = single_input(inputs)?;
        Ok(json!({
            "type": "target",
            "uid": uid,
            "node": wrapped.node.uid()?,
        }))
    }

    fn exists(&self, _uid: &str, inputs: &[Dependency], storage: &dyn Storage) -> Result<bool> {
        single_input(inputs)?.node.output_ready(storage)
    }
}

impl Cacheable for Node {
    fn dependencies(&self) -> Result<Vec<(String, NodeId)>> {
        match self {
            Node::External(n) => n.dependencies(),
            Node::Transform(n) => n.dependencies(),
            Node::Target(n) => n.dependencies(),
        }
    }

    fn canonical(&self, inputs: &[Dependency]) -> Result<Value> {
        match self {
            Node::External(n) => n.canonical(inputs),
            Node::Transform(n) => n.canonical(inputs),
            Node::Target(n) => n.canonical(inputs),
        }
    }

    fn manifest(&self, uid: &str, inputs: &[Dependency]) -> Result<Value> {
        match self {
            Node::External(n) => n.manifest(uid, inputs),
            Node::Transform(n) => n.manifest(uid, inputs),
            Node::Target(n) => n.manifest(uid, inputs),
        }
    }

    fn exists(&self, uid: &str, inputs: &[Dependency], storage: &dyn Storage) -> Result<bool> {
        match self {
            Node::External(n) => n.exists(uid, inputs, storage),
            Node::Transform(n) => n.exists(uid, inputs, storage),
            Node::Target(n) => n.exists(uid, inputs, storage),
        }
    }
}

fn single_input(inputs: &[Dependency]) -> Result<&Dependency> {
    match inputs {
        [only] => Ok(only),
        _ => Err(ReprodError::NotCacheable(format!(
            "target must wrap exactly one node, got {}",
            inputs.len()
        ))),
    }
}

fn digest_object(digests: &DigestMap) -> Value {
    Value::Object(
        digests
            .iter()
            .map(|(algo, hex)| (algo.to_string(), Value::String(hex.clone())))
            .collect(),
    )
}

/// Pipeline-construction context: the raw node arena plus the ordered
/// initialization hooks shipped with every job.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    nodes: Vec<Arc<Node>>,
    labels: Vec<String>,
    hooks: Vec<String>,
    algorithm: HashAlgorithm,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Id the next inserted node will receive.
    pub fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len())
    }

    pub fn insert(&mut self, label: impl Into<String>, node: Node) -> NodeId {
        let id = self.next_id();
        self.nodes.push(Arc::new(node));
        self.labels.push(label.into());
        id
    }

    pub fn add_file(&mut self, label: impl Into<String>, location: impl Into<String>, digests: DigestMap) -> NodeId {
        self.insert(
            label,
            Node::External(ExternalFile {
                location: location.into(),
                digests,
            }),
        )
    }

    pub fn add_transform(
        &mut self,
        label: impl Into<String>,
        op: impl Into<String>,
        version: impl Into<String>,
        params: Value,
        inputs: impl IntoIterator<Item = (String, Input)>,
    ) -> NodeId {
        self.insert(
            label,
            Node::Transform(Transform {
                op: op.into(),
                version: version.into(),
                params,
                inputs: inputs.into_iter().collect(),
            }),
        )
    }

    /// Wrap `node` as a build root. The label is derived from the wrapped node.
    pub fn add_target(&mut self, node: NodeId) -> NodeId {
        let label = format!("target:{}", self.label(node));
        self.insert(label, Node::Target(Target { node }))
    }

    pub fn add_hook(&mut self, hook: impl Into<String>) {
        self.hooks.push(hook.into());
    }

    pub fn hooks(&self) -> &[String] {
        &self.hooks
    }

    pub fn get(&self, id: NodeId) -> Option<&Arc<Node>> {
        self.nodes.get(id.0)
    }

    pub fn label(&self, id: NodeId) -> &str {
        self.labels.get(id.0).map(String::as_str).unwrap_or("<unknown>")
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
