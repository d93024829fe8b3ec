// src/storage/mod.rs

//! Artifact storage abstraction.
//!
//! The graph layer asks storage whether an object exists and which digests
//! it carries, recording declared digests that are still missing. Result
//! records, digest verification and the local compute environment also read
//! and write objects through this trait.
//!
//! - [`FsStorage`] keeps objects in a local directory tree.
//! - [`MemoryStorage`] is an in-memory implementation for tests.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub mod fs;
pub mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

/// User metadata attached to a stored object.
pub type Metadata = BTreeMap<String, String>;

/// What storage knows about one object without reading its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub location: String,
    pub size: u64,
    /// Last modification, seconds since the Unix epoch.
    pub timestamp: u64,
    pub etag: String,
    pub metadata: Metadata,
}

/// Object storage collaborator.
pub trait Storage: Send + Sync + Debug {
    fn exists(&self, location: &str) -> Result<bool>;

    /// Metadata for `location`, or `None` if there is no such object.
    fn head(&self, location: &str) -> Result<Option<ObjectMeta>>;

    fn open_read(&self, location: &str) -> Result<Box<dyn Read + Send>>;

    fn put(&self, location: &str, bytes: &[u8], metadata: Metadata) -> Result<ObjectMeta>;

    /// Copy `source` to `destination` (possibly the same location),
    /// replacing the destination's metadata with `metadata`.
    fn copy(&self, source: &str, destination: &str, metadata: Metadata) -> Result<ObjectMeta>;

    fn delete(&self, location: &str) -> Result<()>;

    fn get(&self, location: &str) -> Result<(Vec<u8>, ObjectMeta)> {
        let meta = self
            .head(location)?
            .ok_or_else(|| crate::errors::ReprodError::NoSuchObject(location.to_string()))?;
        let mut body = Vec::with_capacity(meta.size as usize);
        self.open_read(location)?
            .read_to_end(&mut body)
            .map_err(|e| crate::errors::ReprodError::storage(location, e))?;
        Ok((body, meta))
    }
}
