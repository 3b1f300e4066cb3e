//! Scripted collaborators for orchestration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::process::{Command, Stdio};

use anyhow::{Result, anyhow};

use crate::core::types::{CodeArtifact, ErrorKind, ExecutionResult};
use crate::io::executor::CodeRunner;
use crate::io::generator::Generator;
use crate::io::installer::{InstallStatus, Installer};

/// Format a generator reply carrying `source` and optional dependencies.
pub fn code_reply(source: &str, dependencies: &[&str]) -> String {
    let mut reply = format!("```code\n{source}\n```\n");
    if !dependencies.is_empty() {
        reply.push_str(&format!("```dependencies\n{}\n```\n", dependencies.join("\n")));
    }
    reply
}

/// Generator returning queued replies in order and recording every prompt.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: RefCell<VecDeque<Result<String, String>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Queue a generator fault.
    pub fn then_fail(self, message: &str) -> Self {
        self.replies.borrow_mut().push_back(Err(message.to_string()));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        match self.replies.borrow_mut().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted generator has no replies left")),
        }
    }
}

/// Runner returning queued results and recording every artifact it was given.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    results: RefCell<VecDeque<ExecutionResult>>,
    seen: RefCell<Vec<CodeArtifact>>,
}

impl ScriptedRunner {
    pub fn new(results: impl IntoIterator<Item = ExecutionResult>) -> Self {
        Self {
            results: RefCell::new(results.into_iter().collect()),
            seen: RefCell::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<CodeArtifact> {
        self.seen.borrow().clone()
    }
}

impl CodeRunner for ScriptedRunner {
    fn run(&self, artifact: &CodeArtifact) -> ExecutionResult {
        self.seen.borrow_mut().push(artifact.clone());
        self.results.borrow_mut().pop_front().unwrap_or_else(|| {
            ExecutionResult::rejected(ErrorKind::System, "scripted runner has no results left")
        })
    }
}

/// Successful execution printing `stdout`.
pub fn succeeded(stdout: &str) -> ExecutionResult {
    ExecutionResult {
        success: true,
        stdout: stdout.to_string(),
        error_kind: ErrorKind::None,
        error_message: String::new(),
        exit_code: 0,
        elapsed_seconds: 0.01,
    }
}

/// Failed execution with exit code 1.
pub fn failed(kind: ErrorKind, message: &str) -> ExecutionResult {
    ExecutionResult {
        success: false,
        stdout: String::new(),
        error_kind: kind,
        error_message: message.to_string(),
        exit_code: 1,
        elapsed_seconds: 0.01,
    }
}

/// Installer that records each call instead of running a package manager.
#[derive(Debug, Default)]
pub struct RecordingInstaller {
    calls: RefCell<Vec<Vec<String>>>,
    fail: bool,
}

impl RecordingInstaller {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }
}

impl Installer for RecordingInstaller {
    fn install(&self, packages: &[String]) -> InstallStatus {
        if packages.is_empty() {
            return InstallStatus::NotNeeded;
        }
        self.calls.borrow_mut().push(packages.to_vec());
        if self.fail {
            InstallStatus::Failed {
                message: "scripted install failure".to_string(),
            }
        } else {
            InstallStatus::Installed
        }
    }
}

/// Whether a `python3` interpreter can be spawned on this host.
pub fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
