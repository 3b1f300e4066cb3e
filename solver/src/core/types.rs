//! Shared deterministic types for the solver pipeline.
//!
//! These types define stable contracts between the parser, the dependency
//! reconciler, the executor and the retry loop. They carry no I/O and are
//! never mutated once handed to the next stage.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A generated program plus the third-party packages it declared.
///
/// Fields are private: an artifact is built once from a parsed response and
/// only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeArtifact {
    source: String,
    dependencies: Vec<String>,
}

impl CodeArtifact {
    pub fn new(source: impl Into<String>, dependencies: Vec<String>) -> Self {
        Self {
            source: source.into(),
            dependencies,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Classified failure kind of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    None,
    /// Blank source; no process was spawned.
    InputValidation,
    /// The program exited non-zero.
    Execution,
    /// The wall-clock budget elapsed and the process was killed.
    Timeout,
    /// Spawn, permission or environment fault.
    System,
    /// The source file could not be read.
    FileRead,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::None => "none",
            ErrorKind::InputValidation => "input_validation",
            ErrorKind::Execution => "execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::System => "system",
            ErrorKind::FileRead => "file_read",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of executing one code artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub error_kind: ErrorKind,
    pub error_message: String,
    pub exit_code: i32,
    /// Wall-clock seconds from spawn to exit, rounded to milliseconds.
    pub elapsed_seconds: f64,
}

impl ExecutionResult {
    /// A failure that happened before any process was spawned.
    pub fn rejected(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            error_kind: kind,
            error_message: message.into(),
            exit_code: -1,
            elapsed_seconds: 0.0,
        }
    }

    /// Error kind and message joined for retry prompts and user-facing text.
    pub fn failure_context(&self) -> String {
        format!("{}: {}", self.error_kind, self.error_message)
    }
}

/// One failed trial kept for history accumulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub trial: u32,
    pub code: String,
    pub error: String,
}

/// Bookkeeping for one orchestrated request.
///
/// Only the latest artifact and error are kept; `attempts` stays empty unless
/// history accumulation is enabled.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub trial: u32,
    pub max_trials: u32,
    pub last_code: CodeArtifact,
    pub last_error: String,
    pub attempts: Vec<FailedAttempt>,
}

impl RetryState {
    pub fn new(max_trials: u32, first: CodeArtifact) -> Self {
        Self {
            trial: 1,
            max_trials,
            last_code: first,
            last_error: String::new(),
            attempts: Vec::new(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.trial >= self.max_trials
    }
}

/// Terminal value of the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    /// An execution succeeded on `trial`.
    Accepted { trial: u32, output: String },
    /// `trials` executions ran and all failed.
    Exhausted { trials: u32, last_error: String },
    /// The generator produced nothing usable on `trial`.
    GenerationFailed { trial: u32, error: String },
}

impl SolveOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SolveOutcome::Accepted { .. })
    }

    /// User-visible answer text.
    pub fn answer(&self) -> String {
        match self {
            SolveOutcome::Accepted { output, .. } => output.clone(),
            SolveOutcome::Exhausted { last_error, .. } => {
                format!("Max retries reached. Last error: {last_error}")
            }
            SolveOutcome::GenerationFailed { error, .. } => {
                format!("Error generating code: {error}")
            }
        }
    }
}

/// Closed set of task categories produced by the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    CodeExecution,
    ApiCreation,
    SimpleLlm,
    StaticAnswer,
    QueryOnly,
    Unsupported(String),
}

impl Category {
    /// Map a raw classifier label onto a category. Unknown labels are kept verbatim.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "code_execution" => Category::CodeExecution,
            "api_creation" => Category::ApiCreation,
            "simple_llm" => Category::SimpleLlm,
            "static_answer" => Category::StaticAnswer,
            "query_only" => Category::QueryOnly,
            other => Category::Unsupported(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Category::CodeExecution => "code_execution",
            Category::ApiCreation => "api_creation",
            Category::SimpleLlm => "simple_llm",
            Category::StaticAnswer => "static_answer",
            Category::QueryOnly => "query_only",
            Category::Unsupported(label) => label,
        }
    }
}
