//! Sandboxed execution of candidate programs.
//!
//! Each run materializes the candidate in a fresh temporary directory, builds
//! it when the track needs a build step, and runs it once with the test input
//! on stdin. The directory is removed when the run returns, on every path.

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;
use tracing::{debug, instrument, warn};

use crate::core::normalize::normalize_output;
use crate::core::types::{ExecutionResult, Track};
use crate::io::config::HarnessConfig;
use crate::io::process::{CommandOutput, run_with_timeout};

/// Runs one candidate against one input.
///
/// Implementations never fail: toolchain and I/O problems come back as an
/// [`ExecutionResult`] whose `stderr` carries the diagnostic.
pub trait Sandbox: Send + Sync {
    fn run(
        &self,
        code: &str,
        track: Track,
        input: &str,
    ) -> impl Future<Output = ExecutionResult> + Send;
}

/// Sandbox backed by local toolchains invoked as subprocesses.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    config: HarnessConfig,
    scratch_root: Option<PathBuf>,
}

impl ProcessSandbox {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            scratch_root: None,
        }
    }

    /// Create run directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Blocking body of [`Sandbox::run`].
    #[instrument(skip_all, fields(track = %track, input_bytes = input.len()))]
    pub fn run_blocking(&self, code: &str, track: Track, input: &str) -> ExecutionResult {
        match self.try_run(code, track, input) {
            Ok(result) => result,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "sandbox run failed");
                ExecutionResult::diagnostic(format!("Sandbox Error: {err:#}"))
            }
        }
    }

    fn try_run(&self, code: &str, track: Track, input: &str) -> Result<ExecutionResult> {
        let workdir = self.scratch_dir()?;
        let source = workdir.path().join(format!("solution.{}", track.extension()));
        fs::write(&source, code).with_context(|| format!("write {}", source.display()))?;

        let command = match track {
            Track::Cpp => {
                let binary = workdir.path().join("solution.bin");
                if let Some(diagnostic) = self.compile(&source, &binary, workdir.path())? {
                    return Ok(ExecutionResult::diagnostic(diagnostic));
                }
                let mut cmd = Command::new(&binary);
                cmd.current_dir(workdir.path());
                cmd
            }
            Track::Python => {
                let mut cmd = argv_command(&self.config.interpreter)?;
                cmd.arg(&source).current_dir(workdir.path());
                cmd
            }
        };

        let output = run_with_timeout(
            command,
            Some(input.as_bytes()),
            self.config.run_timeout(),
            self.config.output_limit_bytes,
        )
        .context("run candidate")?;
        Ok(execution_result(&output))
    }

    /// Build `source` into `binary`. Returns the compile diagnostic when the
    /// build fails.
    fn compile(&self, source: &Path, binary: &Path, workdir: &Path) -> Result<Option<String>> {
        let mut cmd = argv_command(&self.config.compiler)?;
        cmd.arg(source).arg("-o").arg(binary).current_dir(workdir);
        let output = run_with_timeout(
            cmd,
            None,
            self.config.compile_timeout(),
            self.config.output_limit_bytes,
        )
        .context("run compiler")?;

        if output.timed_out {
            return Ok(Some(format!(
                "Compile Error: build exceeded {}s",
                self.config.compile_timeout_secs
            )));
        }
        if !output.status.success() {
            debug!(exit_code = ?output.status.code(), "compile failed");
            return Ok(Some(format!("Compile Error: {}", output.stderr_lossy())));
        }
        Ok(None)
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("forge-run-");
        match &self.scratch_root {
            Some(root) => builder
                .tempdir_in(root)
                .with_context(|| format!("create run dir in {}", root.display())),
            None => builder.tempdir().context("create run dir"),
        }
    }
}

impl Sandbox for ProcessSandbox {
    fn run(
        &self,
        code: &str,
        track: Track,
        input: &str,
    ) -> impl Future<Output = ExecutionResult> + Send {
        let sandbox = self.clone();
        let code = code.to_string();
        let input = input.to_string();
        async move {
            let handle =
                tokio::task::spawn_blocking(move || sandbox.run_blocking(&code, track, &input));
            match handle.await {
                Ok(result) => result,
                Err(err) => ExecutionResult::diagnostic(format!("Sandbox Error: {err}")),
            }
        }
    }
}

fn argv_command(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty toolchain argv"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

fn execution_result(output: &CommandOutput) -> ExecutionResult {
    if output.timed_out {
        return ExecutionResult::timeout();
    }
    let mut stderr = normalize_output(&output.stderr_lossy());
    if stderr.is_empty() && !output.status.success() {
        stderr = format!("Runtime Error: {}", output.status);
    }
    ExecutionResult {
        stdout: normalize_output(&output.stdout_lossy()),
        stderr,
        timed_out: false,
    }
}
