#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use reprod::config::{ConfigFile, ConfigSection, FileConfig, RawConfigFile, TransformConfig};
use reprod::digest::DigestMap;
use reprod::graph::{BuildGraph, BuildNode, Input, NodeId, Pipeline};
use serde_json::{json, Value};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                targets: Vec::new(),
                config: ConfigSection::default(),
                file: BTreeMap::new(),
                transform: BTreeMap::new(),
            },
        }
    }

    pub fn target(mut self, name: &str) -> Self {
        self.config.targets.push(name.to_string());
        self
    }

    pub fn file(mut self, name: &str, location: &str, digests: &[&str]) -> Self {
        self.config.file.insert(
            name.to_string(),
            FileConfig {
                location: location.to_string(),
                digests: digests.iter().map(|d| d.to_string()).collect(),
            },
        );
        self
    }

    pub fn transform(mut self, name: &str, transform: TransformConfig) -> Self {
        self.config.transform.insert(name.to_string(), transform);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.config.max_attempts = n;
        self
    }

    pub fn hook(mut self, hook: &str) -> Self {
        self.config.config.hooks.push(hook.to_string());
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TransformConfig`.
pub struct TransformConfigBuilder {
    transform: TransformConfig,
}

impl TransformConfigBuilder {
    pub fn new(op: &str) -> Self {
        Self {
            transform: TransformConfig {
                op: op.to_string(),
                version: "1".to_string(),
                params: toml::Table::new(),
                inputs: BTreeMap::new(),
            },
        }
    }

    /// A `shell` transform running `cmd`.
    pub fn shell(cmd: &str) -> Self {
        Self::new("shell").param("cmd", cmd)
    }

    pub fn version(mut self, version: &str) -> Self {
        self.transform.version = version.to_string();
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.transform.params.insert(key.to_string(), value.into());
        self
    }

    pub fn input(mut self, name: &str, node: &str) -> Self {
        self.transform
            .inputs
            .insert(name.to_string(), node.to_string());
        self
    }

    pub fn build(self) -> TransformConfig {
        self.transform
    }
}

/// Add a `shell` transform running `cmd` over the given named inputs.
pub fn add_shell(pipeline: &mut Pipeline, label: &str, cmd: &str, inputs: &[(&str, NodeId)]) -> NodeId {
    pipeline.add_transform(
        label,
        "shell",
        "1",
        json!({ "cmd": cmd }),
        inputs
            .iter()
            .map(|(name, id)| (name.to_string(), Input::Node(*id))),
    )
}

/// Add a transform with arbitrary op and params.
pub fn add_op(
    pipeline: &mut Pipeline,
    label: &str,
    op: &str,
    params: Value,
    inputs: &[(&str, NodeId)],
) -> NodeId {
    pipeline.add_transform(
        label,
        op,
        "1",
        params,
        inputs
            .iter()
            .map(|(name, id)| (name.to_string(), Input::Node(*id))),
    )
}

/// Add an external file without expected digests.
pub fn add_file(pipeline: &mut Pipeline, label: &str, location: &str) -> NodeId {
    pipeline.add_file(label, location, DigestMap::new())
}

/// Find the build node carrying `label` anywhere below the graph's targets.
pub fn node_by_label(graph: &BuildGraph, label: &str) -> Arc<BuildNode> {
    graph
        .dependency_order()
        .expect("dependency order")
        .into_iter()
        .find(|n| n.label() == label)
        .unwrap_or_else(|| panic!("no node labelled '{label}' in graph"))
}

/// Uid of the build node carrying `label`.
pub fn uid_of(graph: &BuildGraph, label: &str) -> String {
    node_by_label(graph, label)
        .uid()
        .expect("uid")
        .to_string()
}

/// Labels of a node list, in order.
pub fn labels(nodes: &[Arc<BuildNode>]) -> Vec<String> {
    nodes.iter().map(|n| n.label().to_string()).collect()
}
