// src/digest/verify.rs

//! Artifact verification ("rehash").
//!
//! Digests already recorded in an object's metadata are trusted. Only the
//! missing ones are computed, by streaming the object in fixed-size chunks
//! through one hasher per algorithm. Verified digests are written back as
//! `digest-<algo>` metadata while copying the object to its destination
//! (in place when source and destination are the same).

use std::collections::BTreeMap;
use std::io::Read;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{digests_from_metadata, first_mismatch, metadata_key, DigestMap, Digester};
use crate::errors::{ReprodError, Result};
use crate::storage::{Metadata, Storage};
use crate::types::HashAlgorithm;

const MB: usize = 1024 * 1024;

/// Default read chunk size: 16 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * MB;

/// One verification request.
///
/// `expected` maps each algorithm to verify onto its expected hex digest,
/// or `None` to just compute and record it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub source: String,
    /// Defaults to `source` (update in place).
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub expected: BTreeMap<HashAlgorithm, Option<String>>,
    /// Read chunk size in bytes; `0` or absent means [`DEFAULT_CHUNK_SIZE`].
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

impl VerifyRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: None,
            expected: BTreeMap::new(),
            chunk_size: None,
        }
    }

    pub fn destination(&self) -> &str {
        self.destination.as_deref().unwrap_or(&self.source)
    }

    fn effective_chunk_size(&self) -> usize {
        match self.chunk_size {
            Some(n) if n > 0 => n,
            _ => DEFAULT_CHUNK_SIZE,
        }
    }

    fn expected_values(&self) -> DigestMap {
        self.expected
            .iter()
            .filter_map(|(algo, hex)| Some((*algo, hex.as_ref()?.to_lowercase())))
            .collect()
    }
}

/// Successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub location: String,
    pub size: u64,
    pub timestamp: u64,
    pub etag: String,
    pub metadata: Metadata,
    pub digests: DigestMap,
}

/// Wire form of a verification result: a response or `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerifyOutcome {
    Verified(VerifyResponse),
    Error { error: String },
}

impl VerifyOutcome {
    pub fn from_result(result: Result<VerifyResponse>) -> Self {
        match result {
            Ok(response) => VerifyOutcome::Verified(response),
            Err(err) => VerifyOutcome::Error {
                error: err.to_string(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, VerifyOutcome::Error { .. })
    }
}

fn check_expected(location: &str, expected: &DigestMap, actual: &DigestMap) -> Result<()> {
    match first_mismatch(expected, actual) {
        Some((algorithm, want, got)) => Err(ReprodError::DigestMismatch {
            location: location.to_string(),
            algorithm,
            expected: want.clone(),
            actual: got.clone(),
        }),
        None => Ok(()),
    }
}

/// Verify one object and record its digests.
///
/// Fails with [`ReprodError::DigestMismatch`] if an expected digest
/// disagrees with the recorded or computed one, in which case nothing is
/// written.
pub fn verify(storage: &dyn Storage, request: &VerifyRequest) -> Result<VerifyResponse> {
    let source = request.source.as_str();
    let destination = request.destination();

    let head = storage
        .head(source)?
        .ok_or_else(|| ReprodError::NoSuchObject(source.to_string()))?;

    let expected = request.expected_values();
    let mut completed = digests_from_metadata(&head.metadata);
    check_expected(source, &expected, &completed)?;

    let pending: Vec<HashAlgorithm> = request
        .expected
        .keys()
        .copied()
        .filter(|algo| !completed.contains_key(algo))
        .collect();

    if pending.is_empty() && destination == source {
        info!(location = source, "digests already recorded and match; nothing to do");
        return Ok(VerifyResponse {
            location: head.location,
            size: head.size,
            timestamp: head.timestamp,
            etag: head.etag,
            metadata: head.metadata.clone(),
            digests: digests_from_metadata(&head.metadata),
        });
    }

    if !pending.is_empty() {
        let chunk_size = request.effective_chunk_size();
        let started = Instant::now();
        info!(
            location = source,
            size_mb = head.size / MB as u64,
            chunk_mb = chunk_size / MB,
            algorithms = ?pending,
            "hashing object"
        );

        let computed = hash_stream(storage.open_read(source)?, &pending, chunk_size, head.size)
            .map_err(|e| ReprodError::storage(source, e))?;
        completed.extend(computed);

        info!(
            location = source,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "computed digests"
        );
        check_expected(source, &expected, &completed)?;

        // The object must not have changed while we were reading it.
        let after = storage
            .head(source)?
            .ok_or_else(|| ReprodError::NoSuchObject(source.to_string()))?;
        if after.etag != head.etag {
            return Err(ReprodError::TransientIo(format!(
                "{source} changed while it was being hashed"
            )));
        }
    }

    let mut metadata = head.metadata.clone();
    for (algo, hex) in &completed {
        metadata.insert(metadata_key(*algo), hex.clone());
    }

    if destination == source {
        info!(location = destination, "updating object metadata in place");
    } else {
        info!(source, destination, "saving verified copy");
    }
    let written = storage.copy(source, destination, metadata)?;
    debug!(location = destination, etag = %written.etag, "copy complete");

    Ok(VerifyResponse {
        location: written.location,
        size: written.size,
        timestamp: written.timestamp,
        etag: written.etag,
        digests: digests_from_metadata(&written.metadata),
        metadata: written.metadata,
    })
}

/// Stream `reader` through one hasher per algorithm.
///
/// Each chunk is fed to all hashers in parallel before the next chunk is
/// read.
pub fn hash_stream(
    mut reader: impl Read,
    algorithms: &[HashAlgorithm],
    chunk_size: usize,
    size_hint: u64,
) -> std::io::Result<DigestMap> {
    let mut digesters: Vec<Digester> = algorithms.iter().map(|a| Digester::new(*a)).collect();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut pos: u64 = 0;
    let mut last_percent = 0u64;

    loop {
        let n = fill_chunk(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        digesters.par_iter_mut().for_each(|d| d.update(chunk));

        pos += n as u64;
        if size_hint > 0 {
            let percent = pos * 100 / size_hint;
            if percent >= last_percent + 10 {
                last_percent = percent;
                debug!(bytes = pos, total = size_hint, percent, "hashing progress");
            }
        }

        if n < buf.len() {
            break;
        }
    }

    Ok(digesters
        .into_iter()
        .map(|d| (d.algorithm(), d.finalize_hex()))
        .collect())
}

/// Read until `buf` is full or the reader is exhausted.
fn fill_chunk(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
