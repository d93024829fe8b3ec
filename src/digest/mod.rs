// src/digest/mod.rs

//! Multi-algorithm digests.
//!
//! - [`Digester`] wraps one streaming hasher per [`HashAlgorithm`].
//! - [`parse_digest`] / [`parse_digests`] accept the loose digest spellings
//!   found in pipeline configs and request files.
//! - [`verify`] is the artifact verification collaborator ("rehash").
//! - [`batch`] drives many verification requests with bounded concurrency.

pub mod batch;
pub mod verify;

use std::collections::BTreeMap;

use sha2::Digest;

use crate::errors::{ReprodError, Result};
use crate::storage::Metadata;
use crate::types::HashAlgorithm;

/// Metadata key prefix under which verified digests are recorded.
pub const DIGEST_META_PREFIX: &str = "digest-";

/// Verified or expected digests, keyed by algorithm, lowercase hex values.
pub type DigestMap = BTreeMap<HashAlgorithm, String>;

/// A streaming hasher for one algorithm.
pub enum Digester {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl Digester {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Digester::Md5(md5::Md5::new()),
            HashAlgorithm::Sha1 => Digester::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Sha256 => Digester::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Sha512 => Digester::Sha512(sha2::Sha512::new()),
            HashAlgorithm::Blake3 => Digester::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Digester::Md5(_) => HashAlgorithm::Md5,
            Digester::Sha1(_) => HashAlgorithm::Sha1,
            Digester::Sha256(_) => HashAlgorithm::Sha256,
            Digester::Sha512(_) => HashAlgorithm::Sha512,
            Digester::Blake3(_) => HashAlgorithm::Blake3,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Digester::Md5(h) => h.update(data),
            Digester::Sha1(h) => h.update(data),
            Digester::Sha256(h) => h.update(data),
            Digester::Sha512(h) => h.update(data),
            Digester::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            Digester::Md5(h) => format!("{:x}", h.finalize()),
            Digester::Sha1(h) => format!("{:x}", h.finalize()),
            Digester::Sha256(h) => format!("{:x}", h.finalize()),
            Digester::Sha512(h) => format!("{:x}", h.finalize()),
            Digester::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Hash a byte slice in one go.
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut digester = Digester::new(algorithm);
    digester.update(data);
    digester.finalize_hex()
}

/// Parse one digest string.
///
/// Accepted forms:
/// - `d41d8cd98f00b204e9800998ecf8427e`
/// - `md5:d41d8cd98f00b204e9800998ecf8427e`
/// - `md5_d41d8cd98f00b204e9800998ecf8427e`
/// - `hash://md5/d41d8cd98f00b204e9800998ecf8427e`
///
/// A known algorithm prefix is honoured; otherwise the algorithm is deduced
/// from the hex length.
pub fn parse_digest(raw: &str) -> Result<(HashAlgorithm, String)> {
    let invalid = |why: &str| ReprodError::ConfigError(format!("invalid digest string '{raw}': {why}"));

    let mut s = raw.trim();
    let mut prefix: Option<&str> = None;

    if let Some(rest) = s.strip_prefix("hash://") {
        match rest.split_once('/') {
            Some((algo, hex)) => {
                prefix = Some(algo);
                s = hex;
            }
            None => return Err(invalid("expected hash://<algo>/<hex>")),
        }
    } else if let Some((algo, hex)) = s.rsplit_once(':') {
        prefix = Some(algo);
        s = hex;
    } else if let Some((algo, hex)) = s.rsplit_once('_') {
        prefix = Some(algo);
        s = hex;
    }

    let hex = s.to_lowercase();
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("not a hexadecimal digest"));
    }

    let algorithm = match prefix.and_then(|p| p.parse::<HashAlgorithm>().ok()) {
        Some(algo) => algo,
        None => HashAlgorithm::from_hex_len(hex.len())
            .ok_or_else(|| invalid("cannot deduce algorithm from digest length"))?,
    };

    if hex.len() != algorithm.hex_len() {
        return Err(invalid(&format!(
            "{algorithm} digests are {} hex characters, got {}",
            algorithm.hex_len(),
            hex.len()
        )));
    }

    Ok((algorithm, hex))
}

/// Parse a list of digest strings into a map. Later entries win.
pub fn parse_digests<I, S>(raw: I) -> Result<DigestMap>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut map = DigestMap::new();
    for item in raw {
        let (algo, hex) = parse_digest(item.as_ref())?;
        map.insert(algo, hex);
    }
    Ok(map)
}

pub fn metadata_key(algorithm: HashAlgorithm) -> String {
    format!("{DIGEST_META_PREFIX}{algorithm}")
}

/// Extract `digest-<algo>` entries from object metadata.
///
/// Keys naming unknown algorithms are ignored.
pub fn digests_from_metadata(metadata: &Metadata) -> DigestMap {
    metadata
        .iter()
        .filter_map(|(key, value)| {
            let algo = key.strip_prefix(DIGEST_META_PREFIX)?.parse().ok()?;
            Some((algo, value.to_lowercase()))
        })
        .collect()
}

/// Find the first algorithm whose expected and recorded digests disagree.
pub fn first_mismatch<'a>(
    expected: impl IntoIterator<Item = (&'a HashAlgorithm, &'a String)>,
    actual: &'a DigestMap,
) -> Option<(HashAlgorithm, &'a String, &'a String)> {
    expected.into_iter().find_map(|(algo, want)| {
        let got = actual.get(algo)?;
        (!got.eq_ignore_ascii_case(want)).then_some((*algo, want, got))
    })
}
