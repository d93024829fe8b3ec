// src/storage/fs.rs

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Metadata, ObjectMeta, Storage};
use crate::errors::{ReprodError, Result};

/// Sidecar written next to every object stored through [`FsStorage`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    etag: String,
    #[serde(default)]
    metadata: Metadata,
}

/// Storage backed by a local directory.
///
/// Relative locations resolve under `root`; absolute paths are used as-is.
/// Metadata lives in a hidden `.<name>.meta.json` sidecar beside the object.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for a location.
    pub fn resolve(&self, location: &str) -> PathBuf {
        let location = location.strip_prefix("file://").unwrap_or(location);
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        path.with_file_name(format!(".{name}.meta.json"))
    }

    fn read_sidecar(path: &Path) -> Result<Option<Sidecar>> {
        match fs::read_to_string(Self::sidecar_path(path)) {
            Ok(s) => Ok(Some(serde_json::from_str(&s)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_sidecar(path: &Path, sidecar: &Sidecar) -> Result<()> {
        fs::write(Self::sidecar_path(path), serde_json::to_vec_pretty(sidecar)?)?;
        Ok(())
    }

    fn etag_of_file(path: &Path) -> Result<String> {
        let mut hasher = blake3::Hasher::new();
        let mut file = fs::File::open(path)?;
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }

    fn meta_for(&self, location: &str, path: &Path) -> Result<Option<ObjectMeta>> {
        let stat = match fs::metadata(path) {
            Ok(stat) if stat.is_file() => stat,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ReprodError::storage(location, e)),
        };

        let timestamp = stat
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        // Objects placed by hand have no sidecar; fall back to a stat-based etag.
        let sidecar = Self::read_sidecar(path)?.unwrap_or_else(|| Sidecar {
            etag: format!("{}-{}", stat.len(), timestamp),
            metadata: Metadata::new(),
        });

        Ok(Some(ObjectMeta {
            location: location.to_string(),
            size: stat.len(),
            timestamp,
            etag: sidecar.etag,
            metadata: sidecar.metadata,
        }))
    }
}

impl Storage for FsStorage {
    fn exists(&self, location: &str) -> Result<bool> {
        Ok(self.resolve(location).is_file())
    }

    fn head(&self, location: &str) -> Result<Option<ObjectMeta>> {
        let path = self.resolve(location);
        self.meta_for(location, &path)
    }

    fn open_read(&self, location: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.resolve(location);
        match fs::File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ReprodError::NoSuchObject(location.to_string()))
            }
            Err(e) => Err(ReprodError::storage(location, e)),
        }
    }

    fn put(&self, location: &str, bytes: &[u8], metadata: Metadata) -> Result<ObjectMeta> {
        let path = self.resolve(location);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ReprodError::storage(location, e))?;
        }
        fs::write(&path, bytes).map_err(|e| ReprodError::storage(location, e))?;

        let etag = blake3::hash(bytes).to_hex().to_string();
        Self::write_sidecar(&path, &Sidecar { etag, metadata })?;
        debug!(location, size = bytes.len(), "stored object");

        self.meta_for(location, &path)?
            .ok_or_else(|| ReprodError::storage(location, "object vanished after write"))
    }

    fn copy(&self, source: &str, destination: &str, metadata: Metadata) -> Result<ObjectMeta> {
        let src = self.resolve(source);
        let dst = self.resolve(destination);

        if !src.is_file() {
            return Err(ReprodError::NoSuchObject(source.to_string()));
        }

        if src != dst {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(|e| ReprodError::storage(destination, e))?;
            }
            fs::copy(&src, &dst).map_err(|e| ReprodError::storage(destination, e))?;
        }

        let etag = Self::etag_of_file(&dst)?;
        Self::write_sidecar(&dst, &Sidecar { etag, metadata })?;

        self.meta_for(destination, &dst)?
            .ok_or_else(|| ReprodError::storage(destination, "object vanished after copy"))
    }

    fn delete(&self, location: &str) -> Result<()> {
        let path = self.resolve(location);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ReprodError::storage(location, e)),
        }
        match fs::remove_file(Self::sidecar_path(&path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ReprodError::storage(location, e)),
        }
    }
}
