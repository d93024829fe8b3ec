// tests/build_order.rs

use std::sync::Arc;

use reprod::digest::{metadata_key, parse_digests};
use reprod::errors::ReprodError;
use reprod::graph::{BuildGraph, NodeId, Pipeline};
use reprod::jobspec::result_location;
use reprod::storage::{Metadata, MemoryStorage, Storage};
use reprod::types::HashAlgorithm;
use reprod_test_utils::builders::{add_file, add_shell, labels, uid_of};

/// reads -> sorted -> counted, with `counted` as the only target.
fn chain() -> (Pipeline, NodeId) {
    let mut p = Pipeline::new();
    let f = add_file(&mut p, "reads", "data/reads.txt");
    let sorted = add_shell(&mut p, "sorted", "sort", &[("in", f)]);
    let counted = add_shell(&mut p, "counted", "wc -l", &[("in", sorted)]);
    (p, counted)
}

fn graph_over(p: &Pipeline, targets: &[NodeId], storage: &MemoryStorage) -> BuildGraph {
    BuildGraph::from_pipeline(p, targets, Arc::new(storage.clone())).unwrap()
}

#[test]
fn dependency_order_lists_everything_dependencies_first() {
    let (p, counted) = chain();
    let storage = MemoryStorage::new();
    let graph = graph_over(&p, &[counted], &storage);

    let order = graph.dependency_order().unwrap();
    assert_eq!(labels(&order), vec!["reads", "sorted", "counted", "target:counted"]);
    // No storage access is needed for the dependency order.
    assert_eq!(storage.lookups(), 0);
}

#[test]
fn missing_external_file_stays_in_build_order() {
    let (p, counted) = chain();
    let graph = graph_over(&p, &[counted], &MemoryStorage::new());

    let order = graph.build_order().unwrap();
    assert_eq!(labels(&order), vec!["reads", "sorted", "counted", "target:counted"]);
}

#[test]
fn existing_inputs_and_outputs_are_pruned() {
    let (p, counted) = chain();
    let storage = MemoryStorage::new();
    storage.add_object("data/reads.txt", "b\na\n");

    let graph = graph_over(&p, &[counted], &storage);
    assert_eq!(
        labels(&graph.build_order().unwrap()),
        vec!["sorted", "counted", "target:counted"]
    );

    // Once `sorted` has a result record, only the tail is left.
    let sorted_uid = uid_of(&graph, "sorted");
    storage.add_object(&result_location(&sorted_uid), "{}");
    let graph = graph_over(&p, &[counted], &storage);
    assert_eq!(labels(&graph.build_order().unwrap()), vec!["counted", "target:counted"]);

    // A built target makes the whole build a no-op.
    let counted_uid = uid_of(&graph, "counted");
    storage.add_object(&result_location(&counted_uid), "{}");
    let graph = graph_over(&p, &[counted], &storage);
    assert!(graph.build_order().unwrap().is_empty());
}

#[test]
fn shared_dependency_is_checked_and_listed_once() {
    let mut p = Pipeline::new();
    let f = add_file(&mut p, "reads", "data/reads.txt");
    let sorted = add_shell(&mut p, "sorted", "sort", &[("in", f)]);
    let head = add_shell(&mut p, "head", "head", &[("in", sorted)]);
    let tail = add_shell(&mut p, "tail", "tail", &[("in", sorted)]);

    let storage = MemoryStorage::new();
    storage.add_object("data/reads.txt", "x");
    let graph = graph_over(&p, &[head, tail], &storage);

    let order = graph.build_order().unwrap();
    assert_eq!(
        labels(&order),
        vec!["sorted", "head", "target:head", "tail", "target:tail"]
    );

    // Existence answers are memoized per node.
    let lookups = storage.lookups();
    assert!(lookups <= graph.len(), "{lookups} lookups for {} nodes", graph.len());
    graph.build_order().unwrap();
    assert_eq!(storage.lookups(), lookups);
}

#[test]
fn recorded_digest_mismatch_aborts_the_build_order() {
    let mut p = Pipeline::new();
    let f = p.add_file(
        "reads",
        "data/reads.txt",
        parse_digests(["md5:5eb63bbbe01eeed093cb22bb8f5acdc3"]).unwrap(),
    );
    let t = add_shell(&mut p, "sorted", "sort", &[("in", f)]);

    let storage = MemoryStorage::new();
    let mut meta = Metadata::new();
    meta.insert(
        metadata_key(HashAlgorithm::Md5),
        "00000000000000000000000000000000".to_string(),
    );
    storage.add_object_with_metadata("data/reads.txt", "hello world", meta);

    let graph = graph_over(&p, &[t], &storage);
    match graph.build_order().unwrap_err() {
        ReprodError::DigestMismatch { location, algorithm, .. } => {
            assert_eq!(location, "data/reads.txt");
            assert_eq!(algorithm, HashAlgorithm::Md5);
        }
        other => panic!("expected DigestMismatch, got {other:?}"),
    }
}

#[test]
fn matching_digests_count_as_present_and_get_recorded() {
    let mut p = Pipeline::new();
    let f = p.add_file(
        "reads",
        "data/reads.txt",
        parse_digests(["md5:5eb63bbbe01eeed093cb22bb8f5acdc3"]).unwrap(),
    );
    let t = add_shell(&mut p, "sorted", "sort", &[("in", f)]);

    // Nothing recorded yet: the content is hashed and the digest written back.
    let storage = MemoryStorage::new();
    storage.add_object("data/reads.txt", "hello world");
    let graph = graph_over(&p, &[t], &storage);
    assert_eq!(labels(&graph.build_order().unwrap()), vec!["sorted", "target:sorted"]);
    let meta = storage.head("data/reads.txt").unwrap().unwrap();
    assert_eq!(
        meta.metadata.get(&metadata_key(HashAlgorithm::Md5)).map(String::as_str),
        Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
    );

    // Recorded digests compare case-insensitively.
    let mut meta = Metadata::new();
    meta.insert(
        metadata_key(HashAlgorithm::Md5),
        "5EB63BBBE01EEED093CB22BB8F5ACDC3".to_string(),
    );
    storage.add_object_with_metadata("data/reads.txt", "hello world", meta);
    let graph = graph_over(&p, &[t], &storage);
    assert_eq!(labels(&graph.build_order().unwrap()), vec!["sorted", "target:sorted"]);
}

#[test]
fn unrecorded_digest_is_checked_against_the_content() {
    let mut p = Pipeline::new();
    let f = p.add_file(
        "reads",
        "data/reads.txt",
        parse_digests(["md5:5eb63bbbe01eeed093cb22bb8f5acdc3"]).unwrap(),
    );
    let t = add_shell(&mut p, "sorted", "sort", &[("in", f)]);

    let storage = MemoryStorage::new();
    storage.add_object("data/reads.txt", "hello");
    let graph = graph_over(&p, &[t], &storage);
    match graph.build_order().unwrap_err() {
        ReprodError::DigestMismatch {
            location,
            algorithm,
            actual,
            ..
        } => {
            assert_eq!(location, "data/reads.txt");
            assert_eq!(algorithm, HashAlgorithm::Md5);
            assert_eq!(actual, "5d41402abc4b2a76b9719d911017c592");
        }
        other => panic!("expected DigestMismatch, got {other:?}"),
    }

    // A rejected file gets no digest recorded.
    let meta = storage.head("data/reads.txt").unwrap().unwrap();
    assert!(meta.metadata.is_empty());
}
