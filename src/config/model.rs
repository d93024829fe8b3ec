// src/config/model.rs

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::digest::DigestMap;
use crate::errors::{ReprodError, Result};
use crate::exec::ExecTimeouts;
use crate::graph::canonical::from_toml;
use crate::graph::{Input, NodeId, Pipeline};
use crate::types::HashAlgorithm;

/// Pipeline file exactly as deserialized, before validation.
///
/// ```toml
/// targets = ["align"]
///
/// [config]
/// max_attempts = 2
///
/// [file.reads_r1]
/// location = "data/r1.fastq.gz"
/// digests = ["md5:cfdbedf549fd23685321d7b27fccfb10"]
///
/// [transform.align]
/// op = "shell"
/// params = { cmd = "cat $REPROD_INPUT_R1 > $REPROD_OUTPUT/out" }
/// inputs = { r1 = "reads_r1" }
/// ```
///
/// Everything except `targets` is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    /// Names of the nodes to build.
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default)]
    pub config: ConfigSection,

    /// `[file.<name>]` sections.
    #[serde(default)]
    pub file: BTreeMap<String, FileConfig>,

    /// `[transform.<name>]` sections.
    #[serde(default)]
    pub transform: BTreeMap<String, TransformConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Tags provisioned resources; defaults to the pipeline file's stem.
    #[serde(default)]
    pub run_name: Option<String>,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_storage_root")]
    pub storage_root: String,

    #[serde(default)]
    pub canonical_algorithm: HashAlgorithm,

    #[serde(default = "default_submit_timeout")]
    pub submit_timeout: String,

    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_provision_timeout")]
    pub provision_timeout: String,

    /// Shell snippets run, in order, before every job.
    #[serde(default)]
    pub hooks: Vec<String>,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_storage_root() -> String {
    ".reprod".to_string()
}

fn default_submit_timeout() -> String {
    "30s".to_string()
}

fn default_poll_timeout() -> String {
    "30s".to_string()
}

fn default_poll_interval() -> String {
    "500ms".to_string()
}

fn default_provision_timeout() -> String {
    "5m".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            run_name: None,
            max_attempts: default_max_attempts(),
            storage_root: default_storage_root(),
            canonical_algorithm: HashAlgorithm::default(),
            submit_timeout: default_submit_timeout(),
            poll_timeout: default_poll_timeout(),
            poll_interval: default_poll_interval(),
            provision_timeout: default_provision_timeout(),
            hooks: Vec::new(),
        }
    }
}

/// `[file.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub location: String,

    /// Expected digests (`hex`, `algo:hex`, `algo_hex` or `hash://algo/hex`).
    #[serde(default)]
    pub digests: Vec<String>,
}

/// `[transform.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    pub op: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub params: toml::Table,

    /// Input name → name of a file or transform.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

fn default_version() -> String {
    "1".to_string()
}

/// Validated pipeline file. Construct with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub targets: Vec<String>,
    pub config: ConfigSection,
    pub file: BTreeMap<String, FileConfig>,
    pub transform: BTreeMap<String, TransformConfig>,
    /// Parsed `[file.<name>].digests`.
    pub file_digests: BTreeMap<String, DigestMap>,
    pub timeouts: ExecTimeouts,
    /// Directory relative storage roots resolve against.
    pub base_dir: Option<PathBuf>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        raw: RawConfigFile,
        file_digests: BTreeMap<String, DigestMap>,
        timeouts: ExecTimeouts,
    ) -> Self {
        Self {
            targets: raw.targets,
            config: raw.config,
            file: raw.file,
            transform: raw.transform,
            file_digests,
            timeouts,
            base_dir: None,
        }
    }

    pub fn run_name(&self) -> &str {
        self.config.run_name.as_deref().unwrap_or("default")
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Storage root, resolved against `base_dir` when relative.
    pub fn storage_root(&self) -> PathBuf {
        let root = PathBuf::from(&self.config.storage_root);
        match &self.base_dir {
            Some(base) if root.is_relative() => base.join(root),
            _ => root,
        }
    }

    /// Build the raw node arena and return it with the target node ids.
    ///
    /// Files get the first ids (in name order), transforms the next ones, and
    /// target wrappers are appended last. Inputs may refer to any node,
    /// including ones declared later, so cycles are possible here and are
    /// reported when the pipeline is dealiased.
    pub fn to_pipeline(&self) -> Result<(Pipeline, Vec<NodeId>)> {
        let mut ids: HashMap<&str, NodeId> = HashMap::new();
        for (idx, name) in self.file.keys().chain(self.transform.keys()).enumerate() {
            ids.insert(name.as_str(), NodeId(idx));
        }
        let lookup = |owner: &str, name: &str| {
            ids.get(name).copied().ok_or_else(|| {
                ReprodError::ConfigError(format!("'{owner}' refers to unknown node '{name}'"))
            })
        };

        let mut pipeline = Pipeline::with_algorithm(self.config.canonical_algorithm);
        for hook in &self.config.hooks {
            pipeline.add_hook(hook.clone());
        }

        for (name, file) in &self.file {
            let digests = self.file_digests.get(name).cloned().unwrap_or_default();
            pipeline.add_file(name.clone(), file.location.clone(), digests);
        }

        for (name, transform) in &self.transform {
            let params = from_toml(&toml::Value::Table(transform.params.clone()))?;
            let mut inputs = Vec::with_capacity(transform.inputs.len());
            for (input, node) in &transform.inputs {
                inputs.push((input.clone(), Input::Node(lookup(name, node)?)));
            }
            pipeline.add_transform(
                name.clone(),
                transform.op.clone(),
                transform.version.clone(),
                params,
                inputs,
            );
        }

        let mut targets = Vec::with_capacity(self.targets.len());
        for name in &self.targets {
            let node = lookup("targets", name)?;
            targets.push(pipeline.add_target(node));
        }

        Ok((pipeline, targets))
    }
}

/// Parse a duration like `500ms`, `30s`, `5m` or `1h`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
