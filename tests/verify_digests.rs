// tests/verify_digests.rs

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use reprod::digest::batch::{parse_line, parse_requests, run_batch, BatchOptions};
use reprod::digest::verify::{hash_stream, verify, VerifyOutcome, VerifyRequest};
use reprod::digest::{hash_bytes, metadata_key};
use reprod::errors::ReprodError;
use reprod::storage::{Metadata, MemoryStorage, Storage};
use reprod::types::HashAlgorithm;
use reprod_test_utils::init_tracing;

const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";
const HELLO_SHA1: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";
const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

fn request(source: &str, expected: &[(HashAlgorithm, Option<&str>)]) -> VerifyRequest {
    let mut req = VerifyRequest::new(source);
    req.expected = expected
        .iter()
        .map(|(a, h)| (*a, h.map(str::to_string)))
        .collect::<BTreeMap<_, _>>();
    req
}

#[test]
fn computes_and_records_missing_digests_in_place() {
    init_tracing();
    let storage = MemoryStorage::new();
    storage.add_object("reads.txt", "hello world");

    let response = verify(
        &storage,
        &request(
            "reads.txt",
            &[(HashAlgorithm::Md5, Some(HELLO_MD5)), (HashAlgorithm::Sha1, None)],
        ),
    )
    .unwrap();

    assert_eq!(response.location, "reads.txt");
    assert_eq!(response.size, 11);
    assert_eq!(response.digests[&HashAlgorithm::Md5], HELLO_MD5);
    assert_eq!(response.digests[&HashAlgorithm::Sha1], HELLO_SHA1);

    let head = storage.head("reads.txt").unwrap().unwrap();
    assert_eq!(head.metadata[&metadata_key(HashAlgorithm::Md5)], HELLO_MD5);
    assert_eq!(head.metadata[&metadata_key(HashAlgorithm::Sha1)], HELLO_SHA1);
}

#[test]
fn mismatch_fails_and_leaves_the_object_untouched() {
    let storage = MemoryStorage::new();
    storage.add_object("reads.txt", "hello world");
    let before = storage.head("reads.txt").unwrap().unwrap();

    let err = verify(
        &storage,
        &request("reads.txt", &[(HashAlgorithm::Md5, Some("00000000000000000000000000000000"))]),
    )
    .unwrap_err();

    match err {
        ReprodError::DigestMismatch { location, algorithm, actual, .. } => {
            assert_eq!(location, "reads.txt");
            assert_eq!(algorithm, HashAlgorithm::Md5);
            assert_eq!(actual, HELLO_MD5);
        }
        other => panic!("expected DigestMismatch, got {other:?}"),
    }

    let after = storage.head("reads.txt").unwrap().unwrap();
    assert_eq!(before, after);
}

#[test]
fn recorded_digests_are_trusted_and_not_recomputed() {
    let storage = MemoryStorage::new();
    let fake = "11111111111111111111111111111111";
    let mut meta = Metadata::new();
    meta.insert(metadata_key(HashAlgorithm::Md5), fake.to_string());
    storage.add_object_with_metadata("reads.txt", "hello world", meta);
    let before = storage.head("reads.txt").unwrap().unwrap();

    let response = verify(&storage, &request("reads.txt", &[(HashAlgorithm::Md5, None)])).unwrap();
    assert_eq!(response.digests[&HashAlgorithm::Md5], fake);
    // Nothing pending and nothing to copy: the object was not rewritten.
    assert_eq!(response.timestamp, before.timestamp);

    // An expected value that contradicts the record fails without hashing.
    let err = verify(&storage, &request("reads.txt", &[(HashAlgorithm::Md5, Some(HELLO_MD5))]))
        .unwrap_err();
    assert!(matches!(err, ReprodError::DigestMismatch { .. }));
}

#[test]
fn destination_gets_a_verified_copy() {
    let storage = MemoryStorage::new();
    storage.add_object("incoming/reads.txt", "hello world");

    let mut req = request("incoming/reads.txt", &[(HashAlgorithm::Sha256, Some(HELLO_SHA256))]);
    req.destination = Some("verified/reads.txt".to_string());
    let response = verify(&storage, &req).unwrap();

    assert_eq!(response.location, "verified/reads.txt");
    let (body, meta) = storage.get("verified/reads.txt").unwrap();
    assert_eq!(body, b"hello world");
    assert_eq!(meta.metadata[&metadata_key(HashAlgorithm::Sha256)], HELLO_SHA256);

    // The source keeps its original metadata.
    let source = storage.head("incoming/reads.txt").unwrap().unwrap();
    assert!(source.metadata.is_empty());
}

#[test]
fn missing_source_is_reported() {
    let storage = MemoryStorage::new();
    let err = verify(&storage, &request("nope.txt", &[(HashAlgorithm::Md5, None)])).unwrap_err();
    assert!(matches!(err, ReprodError::NoSuchObject(ref l) if l == "nope.txt"));
}

#[test]
fn chunk_size_does_not_change_digests() {
    let data: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
    let algos = [HashAlgorithm::Md5, HashAlgorithm::Sha1, HashAlgorithm::Blake3];

    let whole = hash_stream(Cursor::new(&data), &algos, 1 << 20, data.len() as u64).unwrap();
    let tiny = hash_stream(Cursor::new(&data), &algos, 7, data.len() as u64).unwrap();
    let one = hash_stream(Cursor::new(&data), &algos, 1, 0).unwrap();

    assert_eq!(whole, tiny);
    assert_eq!(whole, one);
    for algo in algos {
        assert_eq!(whole[&algo], hash_bytes(algo, &data));
    }
}

#[test]
fn request_lines_parse_digests_outputs_and_defaults() {
    let opts = BatchOptions::default();

    let req = parse_line(&format!("data/r1.txt md5:{HELLO_MD5} output:out/r1.txt"), &opts).unwrap();
    assert_eq!(req.source, "data/r1.txt");
    assert_eq!(req.destination(), "out/r1.txt");
    assert_eq!(req.expected[&HashAlgorithm::Md5].as_deref(), Some(HELLO_MD5));

    // No digests at all: md5 is computed.
    let req = parse_line("data/r2.txt", &opts).unwrap();
    assert_eq!(req.destination(), "data/r2.txt");
    assert_eq!(req.expected.get(&HashAlgorithm::Md5), Some(&None));

    let opts = BatchOptions {
        extra_digests: vec![HashAlgorithm::Sha256],
        ..BatchOptions::default()
    };
    let req = parse_line(&format!("data/r3.txt sha1:{HELLO_SHA1}"), &opts).unwrap();
    assert_eq!(req.expected.len(), 2);
    assert_eq!(req.expected.get(&HashAlgorithm::Sha256), Some(&None));

    assert!(parse_line("data/r4.txt crc32:abcd", &opts).is_err());
    assert!(parse_line("data/r4.txt md5:xyz", &opts).is_err());
    assert!(parse_line("data/r4.txt justaword", &opts).is_err());
}

#[test]
fn request_files_skip_comments_and_report_bad_lines() {
    let opts = BatchOptions::default();
    let input = format!("# header\n\ndata/a.txt md5:{HELLO_MD5}\n  \ndata/b.txt\n");
    let requests = parse_requests(&input, &opts).unwrap();
    assert_eq!(requests.iter().map(|r| r.line).collect::<Vec<_>>(), vec![3, 5]);

    let err = parse_requests("data/a.txt\ndata/b.txt bogus\n", &opts).unwrap_err();
    assert!(err.to_string().contains("problem on line 2"), "{err}");
}

#[tokio::test]
async fn batch_runs_every_request_and_keeps_line_order() {
    init_tracing();
    let storage = MemoryStorage::new();
    storage.add_object("a.txt", "hello world");
    storage.add_object("b.txt", "hello world");
    storage.add_object("c.txt", "something else");

    let opts = BatchOptions {
        threads: 3,
        delete_mismatch: true,
        ..BatchOptions::default()
    };
    let input = format!(
        "a.txt md5:{HELLO_MD5}\nb.txt sha1:{HELLO_SHA1} output:copies/b.txt\nc.txt md5:{HELLO_MD5}\nmissing.txt\n"
    );
    let requests = parse_requests(&input, &opts).unwrap();

    let shared: Arc<dyn Storage> = Arc::new(storage.clone());
    let entries = run_batch(shared, requests, &opts).await;

    assert_eq!(entries.iter().map(|e| e.line).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    assert!(!entries[0].outcome.is_error());
    assert!(!entries[1].outcome.is_error());
    assert_eq!(entries[1].destination, "copies/b.txt");
    assert!(entries[2].outcome.is_error());
    assert!(entries[3].outcome.is_error());

    // The mismatched source was deleted; the verified copy exists.
    assert!(!storage.exists("c.txt").unwrap());
    assert!(storage.exists("copies/b.txt").unwrap());

    let json = serde_json::to_value(&entries[2]).unwrap();
    assert_eq!(json["line"], 3);
    assert!(json["error"].as_str().unwrap().contains("mismatch"));
    let json = serde_json::to_value(&entries[0]).unwrap();
    assert_eq!(json["digests"]["md5"], HELLO_MD5);

    match &entries[0].outcome {
        VerifyOutcome::Verified(r) => assert_eq!(r.location, "a.txt"),
        other => panic!("expected a verified entry, got {other:?}"),
    }
}

/// Storage whose `delete` panics, standing in for a worker that dies.
#[derive(Debug)]
struct PanickyDelete(MemoryStorage);

impl Storage for PanickyDelete {
    fn exists(&self, location: &str) -> reprod::errors::Result<bool> {
        self.0.exists(location)
    }

    fn head(&self, location: &str) -> reprod::errors::Result<Option<reprod::storage::ObjectMeta>> {
        self.0.head(location)
    }

    fn open_read(&self, location: &str) -> reprod::errors::Result<Box<dyn std::io::Read + Send>> {
        self.0.open_read(location)
    }

    fn put(
        &self,
        location: &str,
        bytes: &[u8],
        metadata: Metadata,
    ) -> reprod::errors::Result<reprod::storage::ObjectMeta> {
        self.0.put(location, bytes, metadata)
    }

    fn copy(
        &self,
        source: &str,
        destination: &str,
        metadata: Metadata,
    ) -> reprod::errors::Result<reprod::storage::ObjectMeta> {
        self.0.copy(source, destination, metadata)
    }

    fn delete(&self, location: &str) -> reprod::errors::Result<()> {
        panic!("delete of {location} blew up");
    }
}

#[tokio::test]
async fn batch_keeps_an_entry_for_a_worker_that_dies() {
    init_tracing();
    let storage = MemoryStorage::new();
    storage.add_object("a.txt", "hello world");
    storage.add_object("c.txt", "something else");

    let opts = BatchOptions {
        threads: 2,
        delete_mismatch: true,
        ..BatchOptions::default()
    };
    let input = format!("a.txt md5:{HELLO_MD5}\n# skipped\nc.txt md5:{HELLO_MD5}\n");
    let requests = parse_requests(&input, &opts).unwrap();

    let shared: Arc<dyn Storage> = Arc::new(PanickyDelete(storage.clone()));
    let entries = run_batch(shared, requests, &opts).await;

    assert_eq!(entries.iter().map(|e| e.line).collect::<Vec<_>>(), vec![1, 3]);
    assert!(!entries[0].outcome.is_error());

    let lost = &entries[1];
    assert_eq!(lost.source, "c.txt");
    assert_eq!(lost.destination, "c.txt");
    match &lost.outcome {
        VerifyOutcome::Error { error } => assert!(error.contains("worker failed"), "{error}"),
        other => panic!("expected an error entry, got {other:?}"),
    }
    assert!(storage.exists("c.txt").unwrap());
}
