// tests/cli_args.rs

use clap::Parser;
use tracing::Level;

use reprod::cli::{CliArgs, Command, LogLevel};
use reprod::logging::resolve_level;
use reprod::types::HashAlgorithm;

#[test]
fn build_defaults_to_pipeline_toml() {
    let args = CliArgs::try_parse_from(["reprod", "build"]).unwrap();
    match args.command {
        Command::Build(build) => {
            assert_eq!(build.config, "Pipeline.toml");
            assert!(build.run_name.is_none());
            assert!(build.max_attempts.is_none());
            assert!(!build.dry_run);
        }
        other => panic!("expected build, got {other:?}"),
    }
}

#[test]
fn build_overrides_are_parsed_and_bounded() {
    let args = CliArgs::try_parse_from([
        "reprod",
        "build",
        "--config",
        "ci/Pipeline.toml",
        "--run-name",
        "nightly",
        "--max-attempts",
        "4",
        "--dry-run",
        "--log-level",
        "debug",
    ])
    .unwrap();
    assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    let Command::Build(build) = args.command else {
        panic!("expected build");
    };
    assert_eq!(build.config, "ci/Pipeline.toml");
    assert_eq!(build.run_name.as_deref(), Some("nightly"));
    assert_eq!(build.max_attempts, Some(4));
    assert!(build.dry_run);

    assert!(CliArgs::try_parse_from(["reprod", "build", "--max-attempts", "0"]).is_err());
}

#[test]
fn verify_collects_repeated_extra_digests() {
    let args = CliArgs::try_parse_from([
        "reprod",
        "--log-level",
        "warn",
        "verify",
        "--threads",
        "8",
        "--extra-digest",
        "sha256",
        "--extra-digest",
        "SHA1",
        "--delete-mismatch",
    ])
    .unwrap();
    let Command::Verify(verify) = args.command else {
        panic!("expected verify");
    };
    assert_eq!(verify.threads, 8);
    assert!(verify.delete_mismatch);
    assert_eq!(verify.extra_digests, vec![HashAlgorithm::Sha256, HashAlgorithm::Sha1]);
    assert_eq!(verify.storage_root, ".");
    assert!(verify.chunk_size.is_none());

    assert!(CliArgs::try_parse_from(["reprod", "verify", "--extra-digest", "crc32"]).is_err());
    assert!(CliArgs::try_parse_from(["reprod"]).is_err());
}

#[test]
fn log_level_prefers_flag_then_environment() {
    assert_eq!(resolve_level(Some(LogLevel::Trace), Some("error")), Level::TRACE);
    assert_eq!(resolve_level(None, Some(" Debug ")), Level::DEBUG);
    assert_eq!(resolve_level(None, Some("warning")), Level::WARN);
    assert_eq!(resolve_level(None, Some("chatty")), Level::INFO);
    assert_eq!(resolve_level(None, None), Level::INFO);
}
