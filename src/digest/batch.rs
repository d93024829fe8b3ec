// src/digest/batch.rs

//! Batch verification driver.
//!
//! Requests are line-oriented:
//!
//! ```text
//! # comment
//! data/r1.fastq.gz md5:cfdbedf549fd23685321d7b27fccfb10
//! data/r2.fastq.gz sha1:... output:verified/r2.fastq.gz
//! data/r3.fastq.gz
//! ```
//!
//! A line without digests asks for md5. Results come back as one list
//! ordered by line number.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{error, info};

use super::verify::{verify, VerifyOutcome, VerifyRequest};
use crate::errors::{ReprodError, Result};
use crate::storage::Storage;
use crate::types::HashAlgorithm;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum number of requests verified at once.
    pub threads: usize,
    /// Delete source objects whose digests do not match.
    pub delete_mismatch: bool,
    /// Digests to compute for every request in addition to the listed ones.
    pub extra_digests: Vec<HashAlgorithm>,
    pub chunk_size: Option<usize>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            delete_mismatch: false,
            extra_digests: Vec::new(),
            chunk_size: None,
        }
    }
}

/// A parsed request and the (1-based) line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub line: usize,
    pub request: VerifyRequest,
}

/// One entry of the batch output.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub line: usize,
    pub source: String,
    pub destination: String,
    #[serde(flatten)]
    pub outcome: VerifyOutcome,
}

/// Parse one non-empty, non-comment request line.
pub fn parse_line(line: &str, options: &BatchOptions) -> Result<VerifyRequest> {
    let mut tokens = line.split_whitespace();
    let source = tokens
        .next()
        .ok_or_else(|| ReprodError::ConfigError("not enough parameters".to_string()))?;

    let mut request = VerifyRequest::new(source);
    request.chunk_size = options.chunk_size;

    for token in tokens {
        let (kind, value) = token.split_once(':').ok_or_else(|| {
            ReprodError::ConfigError(format!("expected ALGO:VALUE or output:LOCATION, got '{token}'"))
        })?;

        if kind == "output" {
            request.destination = Some(value.to_string());
            continue;
        }

        let algo: HashAlgorithm = kind.parse().map_err(ReprodError::ConfigError)?;
        let (_, hex) = super::parse_digest(&format!("{algo}:{value}"))?;
        request.expected.insert(algo, Some(hex));
    }

    if request.expected.is_empty() {
        request.expected.insert(HashAlgorithm::Md5, None);
    }
    for extra in &options.extra_digests {
        request.expected.entry(*extra).or_insert(None);
    }

    Ok(request)
}

/// Parse a whole request file. Fails on the first malformed line.
pub fn parse_requests(input: &str, options: &BatchOptions) -> Result<Vec<BatchRequest>> {
    let mut requests = Vec::new();
    for (idx, raw) in input.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let request = parse_line(line, options).map_err(|e| {
            ReprodError::ConfigError(format!("problem on line {}: {e}", idx + 1))
        })?;
        requests.push(BatchRequest {
            line: idx + 1,
            request,
        });
    }
    Ok(requests)
}

/// Run every request with at most `options.threads` in flight.
pub async fn run_batch(
    storage: Arc<dyn Storage>,
    requests: Vec<BatchRequest>,
    options: &BatchOptions,
) -> Vec<BatchEntry> {
    let total = requests.len();
    let threads = options.threads.max(1);
    info!(requests = total, threads, "submitting verification requests");

    let permits = Arc::new(Semaphore::new(threads));
    let mut set = JoinSet::new();
    // Which request each worker serves, so a worker that dies still gets an entry.
    let mut pending: HashMap<Id, (usize, String, String)> = HashMap::with_capacity(total);

    for BatchRequest { line, request } in requests {
        let source = request.source.clone();
        let destination = request.destination().to_string();
        let handle = set.spawn(verify_one(
            Arc::clone(&storage),
            Arc::clone(&permits),
            line,
            request,
            options.delete_mismatch,
        ));
        pending.insert(handle.id(), (line, source, destination));
    }

    let mut entries = Vec::with_capacity(total);
    let mut errors = 0usize;
    while let Some(joined) = set.join_next_with_id().await {
        let entry = match joined {
            Ok((id, entry)) => {
                pending.remove(&id);
                entry
            }
            Err(e) => {
                let Some((line, source, destination)) = pending.remove(&e.id()) else {
                    error!(error = %e, "unknown verification worker failed");
                    continue;
                };
                BatchEntry {
                    line,
                    source,
                    destination,
                    outcome: VerifyOutcome::Error {
                        error: format!("verification worker failed: {e}"),
                    },
                }
            }
        };

        if let VerifyOutcome::Error { error: message } = &entry.outcome {
            errors += 1;
            error!(line = entry.line, error = %message, "request failed");
        } else {
            info!(line = entry.line, "request completed");
        }
        entries.push(entry);
        info!(
            done = entries.len(),
            total,
            errors,
            "progress {:.1}%",
            entries.len() as f64 * 100.0 / total.max(1) as f64
        );
    }

    entries.sort_by_key(|e| e.line);
    entries
}

async fn verify_one(
    storage: Arc<dyn Storage>,
    permits: Arc<Semaphore>,
    line: usize,
    request: VerifyRequest,
    delete_mismatch: bool,
) -> BatchEntry {
    let _permit = permits.acquire_owned().await;
    let source = request.source.clone();
    let destination = request.destination().to_string();

    let worker_storage = Arc::clone(&storage);
    let result = tokio::task::spawn_blocking(move || verify(worker_storage.as_ref(), &request))
        .await
        .unwrap_or_else(|e| Err(ReprodError::Other(anyhow::anyhow!("verification task failed: {e}"))));

    if delete_mismatch && matches!(result, Err(ReprodError::DigestMismatch { .. })) {
        info!(line, location = %source, "deleting mismatched object");
        if let Err(e) = storage.delete(&source) {
            error!(line, location = %source, error = %e, "delete failed");
        }
    }

    BatchEntry {
        line,
        source,
        destination,
        outcome: VerifyOutcome::from_result(result),
    }
}
