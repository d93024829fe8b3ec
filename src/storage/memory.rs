// src/storage/memory.rs

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Metadata, ObjectMeta, Storage};
use crate::errors::{ReprodError, Result};

#[derive(Debug, Clone)]
struct MemoryObject {
    body: Vec<u8>,
    metadata: Metadata,
    timestamp: u64,
}

/// In-memory storage. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<Mutex<HashMap<String, MemoryObject>>>,
    clock: Arc<AtomicU64>,
    lookups: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object with empty metadata.
    pub fn add_object(&self, location: &str, body: impl Into<Vec<u8>>) {
        self.insert(location, body.into(), Metadata::new());
    }

    /// Insert an object with the given metadata.
    pub fn add_object_with_metadata(&self, location: &str, body: impl Into<Vec<u8>>, metadata: Metadata) {
        self.insert(location, body.into(), metadata);
    }

    /// Number of `exists`/`head` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn locations(&self) -> Vec<String> {
        let objects = self.objects();
        let mut locations: Vec<String> = objects.keys().cloned().collect();
        locations.sort();
        locations
    }

    fn insert(&self, location: &str, body: Vec<u8>, metadata: Metadata) -> ObjectMeta {
        let timestamp = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let object = MemoryObject {
            body,
            metadata,
            timestamp,
        };
        let meta = Self::meta_of(location, &object);
        self.objects().insert(location.to_string(), object);
        meta
    }

    // Every critical section leaves the map consistent, so a poisoned lock
    // still holds usable data.
    fn objects(&self) -> MutexGuard<'_, HashMap<String, MemoryObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn meta_of(location: &str, object: &MemoryObject) -> ObjectMeta {
        ObjectMeta {
            location: location.to_string(),
            size: object.body.len() as u64,
            timestamp: object.timestamp,
            etag: blake3::hash(&object.body).to_hex().to_string(),
            metadata: object.metadata.clone(),
        }
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, location: &str) -> Result<bool> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects().contains_key(location))
    }

    fn head(&self, location: &str) -> Result<Option<ObjectMeta>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects();
        Ok(objects.get(location).map(|o| Self::meta_of(location, o)))
    }

    fn open_read(&self, location: &str) -> Result<Box<dyn Read + Send>> {
        let objects = self.objects();
        match objects.get(location) {
            Some(object) => Ok(Box::new(Cursor::new(object.body.clone()))),
            None => Err(ReprodError::NoSuchObject(location.to_string())),
        }
    }

    fn put(&self, location: &str, bytes: &[u8], metadata: Metadata) -> Result<ObjectMeta> {
        Ok(self.insert(location, bytes.to_vec(), metadata))
    }

    fn copy(&self, source: &str, destination: &str, metadata: Metadata) -> Result<ObjectMeta> {
        let body = {
            let objects = self.objects();
            objects
                .get(source)
                .map(|o| o.body.clone())
                .ok_or_else(|| ReprodError::NoSuchObject(source.to_string()))?
        };
        Ok(self.insert(destination, body, metadata))
    }

    fn delete(&self, location: &str) -> Result<()> {
        self.objects().remove(location);
        Ok(())
    }
}
