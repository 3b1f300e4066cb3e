//! Isolated execution of generated code.
//!
//! The [`CodeRunner`] trait decouples the retry loop from actual process
//! spawning. [`IsolatedExecutor`] writes the source to a unique temporary file,
//! runs the configured interpreter on it under a wall-clock timeout and
//! classifies the outcome. It never returns an error: every failure becomes an
//! [`ExecutionResult`] with an [`ErrorKind`].

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempPath;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{CodeArtifact, ErrorKind, ExecutionResult};
use crate::io::config::ExecutionConfig;
use crate::io::process::{ProcessOutput, run_with_timeout};

/// Anything that can execute a code artifact and classify the result.
pub trait CodeRunner {
    fn run(&self, artifact: &CodeArtifact) -> ExecutionResult;
}

/// Runs source files in a fresh interpreter process.
#[derive(Debug, Clone)]
pub struct IsolatedExecutor {
    interpreter: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    workdir: Option<PathBuf>,
    temp_dir: PathBuf,
}

impl IsolatedExecutor {
    pub fn new(interpreter: Vec<String>, timeout: Duration) -> Self {
        let defaults = ExecutionConfig::default();
        Self {
            interpreter,
            timeout,
            output_limit_bytes: defaults.output_limit_bytes,
            workdir: None,
            temp_dir: std::env::temp_dir(),
        }
    }

    pub fn from_config(cfg: &ExecutionConfig) -> Self {
        Self {
            interpreter: cfg.interpreter.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
            workdir: cfg.workdir.clone(),
            temp_dir: cfg.temp_dir.clone().unwrap_or_else(std::env::temp_dir),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Execute `source` in a new process.
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs(), source_len = source.len()))]
    pub fn run_source(&self, source: &str) -> ExecutionResult {
        if source.trim().is_empty() {
            debug!("rejecting blank source");
            return ExecutionResult::rejected(
                ErrorKind::InputValidation,
                "Invalid or empty code provided",
            );
        }

        let script = match self.materialize(source) {
            Ok(path) => path,
            Err(err) => {
                warn!(err = %err, "could not write temporary source file");
                return ExecutionResult::rejected(
                    ErrorKind::System,
                    format!("System error: {err:#}"),
                );
            }
        };

        let mut result = self.spawn(&script);

        let script_display = script.display().to_string();
        if let Err(err) = script.close() {
            warn!(path = %script_display, err = %err, "failed to delete temporary source file");
            let note = format!("[Cleanup warning: Could not delete temp file: {err}]");
            if !result.error_message.is_empty() {
                result.error_message.push('\n');
            }
            result.error_message.push_str(&note);
        }

        info!(
            success = result.success,
            error_kind = %result.error_kind,
            exit_code = result.exit_code,
            elapsed_seconds = result.elapsed_seconds,
            "execution finished"
        );
        result
    }

    /// Execute the contents of an existing source file.
    pub fn run_file(&self, path: &Path) -> ExecutionResult {
        match fs::read_to_string(path) {
            Ok(source) => self.run_source(&source),
            Err(err) => {
                warn!(path = %path.display(), err = %err, "could not read source file");
                ExecutionResult::rejected(
                    ErrorKind::FileRead,
                    format!("Could not read file {}: {err}", path.display()),
                )
            }
        }
    }

    /// Write `source` to a uniquely named file that is deleted when closed.
    fn materialize(&self, source: &str) -> Result<TempPath> {
        fs::create_dir_all(&self.temp_dir)
            .with_context(|| format!("create temp dir {}", self.temp_dir.display()))?;
        let mut file = tempfile::Builder::new()
            .prefix("solver-")
            .suffix(".py")
            .tempfile_in(&self.temp_dir)
            .with_context(|| format!("create temp file in {}", self.temp_dir.display()))?;
        file.write_all(source.as_bytes())
            .context("write temp source")?;
        file.flush().context("flush temp source")?;
        // Close our handle before the interpreter opens the path.
        Ok(file.into_temp_path())
    }

    fn spawn(&self, script: &Path) -> ExecutionResult {
        let (program, args) = match self.interpreter.split_first() {
            Some(split) => split,
            None => {
                return ExecutionResult::rejected(
                    ErrorKind::System,
                    "System error: no interpreter configured",
                );
            }
        };
        let mut cmd = Command::new(program);
        cmd.args(args).arg(script);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        match run_with_timeout(cmd, None, self.timeout, self.output_limit_bytes) {
            Ok(output) => classify(&output, self.timeout),
            Err(err) => system_failure(&err),
        }
    }
}

impl CodeRunner for IsolatedExecutor {
    fn run(&self, artifact: &CodeArtifact) -> ExecutionResult {
        self.run_source(artifact.source())
    }
}

/// Map a finished process onto the execution taxonomy.
fn classify(output: &ProcessOutput, timeout: Duration) -> ExecutionResult {
    let elapsed_seconds = round_millis(output.elapsed);
    let stdout = output.stdout_text();

    if output.timed_out {
        return ExecutionResult {
            success: false,
            stdout,
            error_kind: ErrorKind::Timeout,
            error_message: format!(
                "Code execution timed out after {} seconds",
                timeout.as_secs_f64()
            ),
            exit_code: -1,
            elapsed_seconds,
        };
    }

    let stderr = output.stderr_text();
    let exit_code = output.status.code().unwrap_or(-1);
    if output.status.success() {
        let warnings = stderr.trim();
        let stdout = match (stdout.is_empty(), warnings.is_empty()) {
            (_, true) => stdout,
            (true, false) => format!("[WARNINGS]\n{warnings}"),
            (false, false) => format!("{stdout}\n[WARNINGS]\n{warnings}"),
        };
        return ExecutionResult {
            success: true,
            stdout,
            error_kind: ErrorKind::None,
            error_message: String::new(),
            exit_code,
            elapsed_seconds,
        };
    }

    let diagnostic = if stderr.trim().is_empty() {
        "Unknown execution error"
    } else {
        stderr.trim()
    };
    ExecutionResult {
        success: false,
        stdout,
        error_kind: ErrorKind::Execution,
        error_message: format!("Execution failed (return code: {exit_code})\n{diagnostic}"),
        exit_code,
        elapsed_seconds,
    }
}

fn system_failure(err: &anyhow::Error) -> ExecutionResult {
    let permission = err
        .downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::PermissionDenied);
    let message = if permission {
        format!("Permission error: {err:#}")
    } else {
        format!("System error: {err:#}")
    };
    ExecutionResult::rejected(ErrorKind::System, message)
}

fn round_millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}
