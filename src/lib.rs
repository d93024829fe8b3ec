// src/lib.rs

pub mod build;
pub mod cli;
pub mod config;
pub mod dag;
pub mod digest;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod jobspec;
pub mod logging;
pub mod storage;
pub mod types;

use std::io::Read;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::build::{run_build, BuildOptions, BuildReport};
use crate::cli::{BuildArgs, CliArgs, Command, VerifyArgs};
use crate::config::load_and_validate_with;
use crate::digest::batch::{parse_requests, run_batch, BatchOptions};
use crate::errors::ReprodError;
use crate::exec::LocalComputeEnv;
use crate::graph::BuildGraph;
use crate::storage::{FsStorage, Storage};

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Build(build) => run_build_command(build).await,
        Command::Verify(verify) => run_verify_command(verify).await,
    }
}

/// Load the pipeline, dealias it and build what is missing on the local
/// compute environment.
async fn run_build_command(args: BuildArgs) -> Result<()> {
    let cfg = load_and_validate_with(&args.config, |raw| {
        if let Some(run_name) = args.run_name.clone() {
            raw.config.run_name = Some(run_name);
        }
        if let Some(max_attempts) = args.max_attempts {
            raw.config.max_attempts = max_attempts;
        }
    })?;

    let storage = FsStorage::new(cfg.storage_root());
    let (pipeline, targets) = cfg.to_pipeline()?;
    let shared: Arc<dyn Storage> = Arc::new(storage.clone());
    let graph = BuildGraph::from_pipeline(&pipeline, &targets, shared)?;
    info!(nodes = graph.len(), targets = graph.targets().len(), "pipeline dealiased");

    if args.dry_run {
        print_dry_run(&graph)?;
        return Ok(());
    }

    let env = Arc::new(LocalComputeEnv::new(&storage)?);
    let options = BuildOptions {
        run_name: cfg.run_name().to_string(),
        max_attempts: cfg.max_attempts(),
        timeouts: cfg.timeouts,
    };

    let report = run_build(&graph, env, &options).await?;
    print_report(&report);
    report.ensure_success()?;
    Ok(())
}

/// Read verification requests from stdin, run them and print the results.
async fn run_verify_command(args: VerifyArgs) -> Result<()> {
    let options = BatchOptions {
        threads: args.threads,
        delete_mismatch: args.delete_mismatch,
        extra_digests: args.extra_digests,
        chunk_size: args.chunk_size,
    };

    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let requests = parse_requests(&input, &options)?;

    let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(&args.storage_root));
    let entries = run_batch(storage, requests, &options).await;

    println!("{}", serde_json::to_string_pretty(&entries)?);

    let failed = entries.iter().filter(|e| e.outcome.is_error()).count();
    if failed > 0 {
        return Err(ReprodError::VerificationFailed {
            failed,
            total: entries.len(),
        }
        .into());
    }
    info!(requests = entries.len(), "all verification requests completed");
    Ok(())
}

fn print_dry_run(graph: &BuildGraph) -> Result<()> {
    println!("reprod dry-run");
    println!();

    let dependency_order = graph.dependency_order()?;
    println!("dependency order ({}):", dependency_order.len());
    for node in &dependency_order {
        println!("  - {} [{}] {}", node.label(), node.data().kind(), node.uid()?);
    }
    println!();

    let build_order = graph.build_order()?;
    println!("build order ({}):", build_order.len());
    for node in &build_order {
        println!("  - {} [{}] {}", node.label(), node.data().kind(), node.uid()?);
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_report(report: &BuildReport) {
    println!("run {}", report.run_name);
    for target in &report.targets {
        let state = if target.up_to_date {
            "up to date"
        } else if target.is_success() {
            "built"
        } else {
            "FAILED"
        };
        println!(
            "  {}: {} (succeeded {}, exhausted {}, cancelled {}, incomplete {})",
            target.label, state, target.succeeded, target.exhausted, target.cancelled, target.incomplete
        );
    }
}
