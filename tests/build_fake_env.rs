// tests/build_fake_env.rs

use std::sync::Arc;
use std::time::Duration;

use reprod::build::{run_build, validate_build_order, BuildOptions};
use reprod::errors::ReprodError;
use reprod::exec::ExecTimeouts;
use reprod::graph::{BuildGraph, NodeId, Pipeline};
use reprod::jobspec::read_result;
use reprod::storage::MemoryStorage;
use reprod::types::JobStatus;
use reprod_test_utils::builders::{add_file, add_op, add_shell, uid_of};
use reprod_test_utils::fake_env::{FakeComputeEnv, FakeFailure};
use reprod_test_utils::{init_tracing, with_timeout};
use serde_json::json;

fn options(max_attempts: u32) -> BuildOptions {
    BuildOptions {
        run_name: "test-run".to_string(),
        max_attempts,
        timeouts: ExecTimeouts {
            poll_interval: Duration::from_millis(10),
            ..ExecTimeouts::default()
        },
    }
}

/// reads -> sorted -> counted
fn chain(p: &mut Pipeline) -> NodeId {
    let f = add_file(p, "reads", "data/reads.txt");
    let sorted = add_shell(p, "sorted", "sort", &[("in", f)]);
    add_shell(p, "counted", "wc -l", &[("in", sorted)])
}

fn seeded_storage() -> MemoryStorage {
    let storage = MemoryStorage::new();
    storage.add_object("data/reads.txt", "b\na\n");
    storage
}

fn graph(p: &Pipeline, targets: &[NodeId], storage: &MemoryStorage) -> BuildGraph {
    BuildGraph::from_pipeline(p, targets, Arc::new(storage.clone())).unwrap()
}

#[tokio::test]
async fn builds_missing_outputs_then_becomes_a_no_op() {
    init_tracing();
    let mut p = Pipeline::new();
    p.add_hook("set -e");
    let counted = chain(&mut p);
    let storage = seeded_storage();

    let g = graph(&p, &[counted], &storage);
    let env = Arc::new(FakeComputeEnv::new(storage.clone()));
    let report = with_timeout(run_build(&g, Arc::clone(&env), &options(2)))
        .await
        .unwrap();

    assert!(report.is_success());
    report.ensure_success().unwrap();
    assert_eq!(env.submitted(), vec![uid_of(&g, "sorted"), uid_of(&g, "counted")]);
    assert_eq!(env.created_runs(), vec!["test-run"]);
    assert!(env.descriptors().iter().all(|d| d.hooks == ["set -e"]));

    let target = &report.targets[0];
    assert_eq!(target.label, "target:counted");
    assert!(!target.up_to_date);
    assert_eq!(target.total, 3);
    assert_eq!(target.succeeded, 3);
    assert!(read_result(&storage, &uid_of(&g, "counted")).unwrap().is_some());

    // Second run over the same storage: nothing to do, nothing provisioned.
    let g = graph(&p, &[counted], &storage);
    let env = Arc::new(FakeComputeEnv::new(storage.clone()));
    let report = with_timeout(run_build(&g, Arc::clone(&env), &options(2)))
        .await
        .unwrap();

    assert!(report.is_success());
    assert!(report.targets[0].up_to_date);
    assert!(report.jobs.is_empty());
    assert!(env.submitted().is_empty());
    assert!(env.created_runs().is_empty());
}

#[tokio::test]
async fn changed_params_rebuild_only_the_affected_suffix() {
    init_tracing();
    let storage = seeded_storage();

    let mut p = Pipeline::new();
    let counted = chain(&mut p);
    let g = graph(&p, &[counted], &storage);
    let env = Arc::new(FakeComputeEnv::new(storage.clone()));
    with_timeout(run_build(&g, env, &options(2))).await.unwrap();

    // Same upstream, different final command.
    let mut p = Pipeline::new();
    let f = add_file(&mut p, "reads", "data/reads.txt");
    let sorted = add_shell(&mut p, "sorted", "sort", &[("in", f)]);
    let counted = add_shell(&mut p, "counted", "wc -c", &[("in", sorted)]);
    let g = graph(&p, &[counted], &storage);
    let env = Arc::new(FakeComputeEnv::new(storage.clone()));
    let report = with_timeout(run_build(&g, Arc::clone(&env), &options(2)))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(env.submitted(), vec![uid_of(&g, "counted")]);
}

#[tokio::test]
async fn transient_failure_is_retried() {
    init_tracing();
    let mut p = Pipeline::new();
    let counted = chain(&mut p);
    let storage = seeded_storage();
    let g = graph(&p, &[counted], &storage);
    let sorted = uid_of(&g, "sorted");

    let env = Arc::new(
        FakeComputeEnv::new(storage.clone())
            .fail(&sorted, [FakeFailure::Transient("connection reset".to_string())]),
    );
    let report = with_timeout(run_build(&g, Arc::clone(&env), &options(2)))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(env.submissions_of(&sorted), 2);
    let job = report.job(&sorted).unwrap();
    assert_eq!(job.attempts, 2);
    assert_eq!(job.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn exhausted_job_fails_the_build_and_cancels_dependents() {
    init_tracing();
    let mut p = Pipeline::new();
    let counted = chain(&mut p);
    let storage = seeded_storage();
    let g = graph(&p, &[counted], &storage);
    let sorted = uid_of(&g, "sorted");
    let counted_uid = uid_of(&g, "counted");

    let env = Arc::new(FakeComputeEnv::new(storage.clone()).fail(
        &sorted,
        [
            FakeFailure::Execution("exit 1".to_string()),
            FakeFailure::Execution("exit 1".to_string()),
        ],
    ));
    let report = with_timeout(run_build(&g, Arc::clone(&env), &options(2)))
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(env.submitted(), vec![sorted.clone(), sorted.clone()]);
    assert_eq!(report.job(&sorted).unwrap().status, JobStatus::Exhausted);
    assert_eq!(report.job(&counted_uid).unwrap().status, JobStatus::Cancelled);
    assert_eq!(
        report.job(&counted_uid).unwrap().cancelled_by.as_deref(),
        Some(sorted.as_str())
    );

    let target = &report.targets[0];
    assert_eq!((target.exhausted, target.cancelled), (1, 2));

    match report.ensure_success().unwrap_err() {
        ReprodError::Exhausted { uid, attempts, last_error } => {
            assert_eq!(uid, sorted);
            assert_eq!(attempts, 2);
            assert!(last_error.contains("exit 1"), "{last_error}");
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    assert!(read_result(&storage, &sorted).unwrap().is_none());
}

#[tokio::test]
async fn independent_jobs_run_concurrently() {
    init_tracing();
    let mut p = Pipeline::new();
    let f = add_file(&mut p, "reads", "data/reads.txt");
    let left = add_shell(&mut p, "left", "head", &[("in", f)]);
    let right = add_shell(&mut p, "right", "tail", &[("in", f)]);
    let storage = seeded_storage();
    let g = graph(&p, &[left, right], &storage);

    let env = Arc::new(FakeComputeEnv::new(storage.clone()));
    let report = with_timeout(run_build(&g, Arc::clone(&env), &options(1)))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.targets.len(), 2);
    assert_eq!(env.max_concurrency(), 2);
}

#[tokio::test]
async fn identical_transforms_shared_by_two_targets_run_once() {
    init_tracing();
    let mut p = Pipeline::new();
    let f = add_file(&mut p, "reads", "data/reads.txt");
    // Built independently, but the same computation.
    let sorted_a = add_shell(&mut p, "sorted_a", "sort", &[("in", f)]);
    let sorted_b = add_shell(&mut p, "sorted_b", "sort", &[("in", f)]);
    let head = add_shell(&mut p, "head", "head -1", &[("in", sorted_a)]);
    let tail = add_shell(&mut p, "tail", "tail -1", &[("in", sorted_b)]);
    let storage = seeded_storage();
    let g = graph(&p, &[head, tail], &storage);

    let order = g.dependency_order().unwrap();
    let sorted: Vec<_> = order
        .iter()
        .filter(|n| n.label().starts_with("sorted"))
        .collect();
    assert_eq!(sorted.len(), 1);
    let shared = sorted[0].uid().unwrap().to_string();

    let env = Arc::new(FakeComputeEnv::new(storage.clone()));
    let report = with_timeout(run_build(&g, Arc::clone(&env), &options(1)))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.targets.len(), 2);
    for target in &report.targets {
        assert_eq!(target.total, 3, "{}", target.label);
        assert_eq!(target.succeeded, target.total, "{}", target.label);
    }
    assert_eq!(env.submissions_of(&shared), 1);
    assert_eq!(env.submitted().len(), 3);
    assert!(read_result(&storage, &uid_of(&g, "head")).unwrap().is_some());
    assert!(read_result(&storage, &uid_of(&g, "tail")).unwrap().is_some());
}

#[tokio::test]
async fn incompatible_task_is_rejected_before_provisioning() {
    init_tracing();
    let mut p = Pipeline::new();
    let f = add_file(&mut p, "reads", "data/reads.txt");
    let gpu = add_op(&mut p, "train", "gpu-train", json!({ "epochs": 3 }), &[("in", f)]);
    let storage = seeded_storage();
    let g = graph(&p, &[gpu], &storage);

    let env = Arc::new(FakeComputeEnv::new(storage.clone()).reject_op("gpu-train"));
    let err = run_build(&g, Arc::clone(&env), &options(2)).await.unwrap_err();

    match err {
        ReprodError::IncompatibleTask { uid, env: name, reason } => {
            assert_eq!(uid, uid_of(&g, "train"));
            assert_eq!(name, "fake");
            assert!(reason.contains("gpu-train"));
        }
        other => panic!("expected IncompatibleTask, got {other:?}"),
    }
    assert!(env.created_runs().is_empty());
    assert!(env.submitted().is_empty());
}

#[tokio::test]
async fn missing_external_input_is_reported() {
    init_tracing();
    let mut p = Pipeline::new();
    let counted = chain(&mut p);
    let storage = MemoryStorage::new();
    let g = graph(&p, &[counted], &storage);

    let env = Arc::new(FakeComputeEnv::new(storage.clone()));
    let order = g.build_order().unwrap();
    let err = validate_build_order(&order, env.as_ref()).unwrap_err();
    assert!(matches!(err, ReprodError::MissingInput(ref l) if l == "data/reads.txt"), "{err:?}");

    let err = run_build(&g, Arc::clone(&env), &options(2)).await.unwrap_err();
    assert!(matches!(err, ReprodError::MissingInput(_)));
    assert!(env.submitted().is_empty());
}

#[tokio::test]
async fn descriptors_describe_inputs_by_location() {
    init_tracing();
    let mut p = Pipeline::new();
    let counted = chain(&mut p);
    let storage = seeded_storage();
    let g = graph(&p, &[counted], &storage);

    let env = Arc::new(FakeComputeEnv::new(storage.clone()));
    with_timeout(run_build(&g, Arc::clone(&env), &options(2)))
        .await
        .unwrap();

    let descriptors = env.descriptors();
    let sorted_uid = uid_of(&g, "sorted");
    assert_eq!(
        descriptors[0].input_locations(),
        vec![("in".to_string(), "data/reads.txt".to_string())]
    );
    assert_eq!(
        descriptors[1].input_locations(),
        vec![("in".to_string(), sorted_uid)]
    );
    assert_eq!(descriptors[1].op(), Some("shell"));
    assert_eq!(descriptors[1].params(), &json!({ "cmd": "wc -l" }));
}
