// src/jobspec.rs

//! Job serialization and the result-reporting contract.
//!
//! A [`JobDescriptor`] carries everything a remote executor needs to run one
//! build node: its uid, manifest, canonical description and the ordered
//! initialization hooks. After a successful run the executor writes a
//! [`ResultRecord`] to `"<uid>/result.json"`; the existence of that record is
//! what makes a transform's output count as available.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::{ReprodError, Result};
use crate::exec::BoxFuture;
use crate::graph::BuildNode;
use crate::storage::{Metadata, ObjectMeta, Storage};

pub const RESULT_FILE: &str = "result.json";

/// Location prefix under which a node's outputs are stored.
pub fn output_prefix(uid: &str) -> String {
    uid.to_string()
}

/// Location of the result record for `uid`.
pub fn result_location(uid: &str) -> String {
    format!("{uid}/{RESULT_FILE}")
}

/// Self-contained description of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub uid: String,
    pub manifest: Value,
    pub canonical: Value,
    #[serde(default)]
    pub hooks: Vec<String>,
}

impl JobDescriptor {
    pub fn from_node(node: &BuildNode, hooks: &[String]) -> Result<Self> {
        Ok(Self {
            uid: node.uid()?.to_string(),
            manifest: node.manifest()?,
            canonical: node.canonical()?,
            hooks: hooks.to_vec(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Operation name, for transform descriptors.
    pub fn op(&self) -> Option<&str> {
        self.canonical.get("op").and_then(Value::as_str)
    }

    /// Transform parameters (`Null` for other node kinds).
    pub fn params(&self) -> &Value {
        self.canonical.get("params").unwrap_or(&Value::Null)
    }

    /// `(name, location)` of every input listed in the manifest.
    pub fn input_locations(&self) -> Vec<(String, String)> {
        let Some(inputs) = self.manifest.get("inputs").and_then(Value::as_object) else {
            return Vec::new();
        };
        inputs
            .iter()
            .filter_map(|(name, described)| {
                let location = described.get("location")?.as_str()?;
                Some((name.clone(), location.to_string()))
            })
            .collect()
    }
}

/// What an executor reports after a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub uid: String,
    pub output: String,
    pub manifest: Value,
    pub canonical: Value,
}

pub fn write_result(storage: &dyn Storage, record: &ResultRecord) -> Result<ObjectMeta> {
    let body = serde_json::to_vec_pretty(record)?;
    let location = result_location(&record.uid);
    debug!(uid = %record.uid, location = %location, "writing result record");
    storage.put(&location, &body, Metadata::new())
}

/// Read the result record for `uid`, if one has been written.
pub fn read_result(storage: &dyn Storage, uid: &str) -> Result<Option<ResultRecord>> {
    let location = result_location(uid);
    if !storage.exists(&location)? {
        return Ok(None);
    }
    let (body, _meta) = storage.get(&location)?;
    let record: ResultRecord = serde_json::from_slice(&body)?;
    if record.uid != uid {
        return Err(ReprodError::storage(
            &location,
            format!("result record is keyed by {}, expected {uid}", record.uid),
        ));
    }
    Ok(Some(record))
}

/// Executes the transform business logic for one descriptor.
pub trait TransformRunner: Send + Sync {
    /// Run `hooks` in order, then the transform itself, placing outputs
    /// under `output`.
    fn run<'a>(
        &'a self,
        hooks: &'a [String],
        descriptor: &'a JobDescriptor,
        output: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Executor side of the contract: run the job and report its result.
pub async fn execute(
    descriptor: &JobDescriptor,
    runner: &dyn TransformRunner,
    storage: &dyn Storage,
) -> Result<ResultRecord> {
    let output = output_prefix(&descriptor.uid);
    info!(
        uid = %descriptor.uid,
        op = descriptor.op().unwrap_or("-"),
        hooks = descriptor.hooks.len(),
        "executing job"
    );

    runner.run(&descriptor.hooks, descriptor, &output).await?;

    let record = ResultRecord {
        uid: descriptor.uid.clone(),
        output,
        manifest: descriptor.manifest.clone(),
        canonical: descriptor.canonical.clone(),
    };
    write_result(storage, &record)?;
    Ok(record)
}
