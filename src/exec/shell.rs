// src/exec/shell.rs

//! Shell transform runner.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::{ReprodError, Result};
use crate::exec::BoxFuture;
use crate::jobspec::{JobDescriptor, TransformRunner};
use crate::storage::FsStorage;

/// Operation name handled by [`ShellRunner`].
pub const SHELL_OP: &str = "shell";

/// Runs `op = "shell"` transforms as `sh -c` processes.
///
/// The command comes from `params.cmd`. Hooks are chained in front of it
/// with `&&` so they share the command's shell. The process sees:
/// - `REPROD_UID`: the job uid
/// - `REPROD_OUTPUT`: an existing directory for the job's outputs
/// - `REPROD_INPUT_<NAME>`: filesystem path of each named input
#[derive(Debug, Clone)]
pub struct ShellRunner {
    storage: FsStorage,
    workdir: Option<PathBuf>,
}

impl ShellRunner {
    pub fn new(storage: FsStorage) -> Self {
        Self {
            storage,
            workdir: None,
        }
    }

    /// Run commands from `dir` instead of the current directory.
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// The full shell script for a descriptor.
    pub fn script(hooks: &[String], descriptor: &JobDescriptor) -> Result<String> {
        let cmd = descriptor
            .params()
            .get("cmd")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ReprodError::JobExecutionFailed {
                uid: descriptor.uid.clone(),
                message: "shell transform has no string `cmd` parameter".to_string(),
            })?;

        let mut parts: Vec<&str> = hooks.iter().map(String::as_str).collect();
        parts.push(cmd);
        Ok(parts.join(" && "))
    }

    async fn run_inner(&self, hooks: &[String], descriptor: &JobDescriptor, output: &str) -> Result<()> {
        let uid = descriptor.uid.as_str();
        let script = Self::script(hooks, descriptor)?;

        let output_dir = self.storage.resolve(output);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("creating output directory {}", output_dir.display()))?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&script)
            .env("REPROD_UID", uid)
            .env("REPROD_OUTPUT", &output_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (name, location) in descriptor.input_locations() {
            let var = format!("REPROD_INPUT_{}", env_suffix(&name));
            cmd.env(var, self.storage.resolve(&location));
        }
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        info!(uid, script = %script, "starting shell transform");

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning shell transform for {uid}"))?;

        if let Some(stdout) = child.stdout.take() {
            forward_lines(uid.to_string(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(uid.to_string(), "stderr", stderr);
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for shell transform of {uid}"))?;

        let code = status.code().unwrap_or(-1);
        info!(uid, exit_code = code, success = status.success(), "shell transform exited");

        if status.success() {
            Ok(())
        } else {
            Err(ReprodError::JobExecutionFailed {
                uid: uid.to_string(),
                message: format!("command exited with status {code}"),
            })
        }
    }
}

impl TransformRunner for ShellRunner {
    fn run<'a>(
        &'a self,
        hooks: &'a [String],
        descriptor: &'a JobDescriptor,
        output: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.run_inner(hooks, descriptor, output))
    }
}

/// `reads-r1` → `READS_R1`.
fn env_suffix(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn forward_lines<R>(uid: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(uid = %uid, stream, "{}", line);
        }
    });
}
