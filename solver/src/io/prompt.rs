//! Prompt rendering for the generator and classifier.
//!
//! Templates are minijinja sources embedded at build time. A prompts
//! directory may override any of them with a `<name>.md` file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::FailedAttempt;

const CODE_TEMPLATE: &str = include_str!("prompts/code.md");
const RETRY_TEMPLATE: &str = include_str!("prompts/retry.md");
const CLASSIFY_TEMPLATE: &str = include_str!("prompts/classify.md");
const SIMPLE_TEMPLATE: &str = include_str!("prompts/simple.md");
const SIMULATE_TEMPLATE: &str = include_str!("prompts/simulate.md");
const QUERY_TEMPLATE: &str = include_str!("prompts/query.md");

/// Which prompt to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PromptKind {
    Code,
    Retry,
    Classify,
    Simple,
    Simulate,
    Query,
}

impl PromptKind {
    pub const ALL: [PromptKind; 6] = [
        PromptKind::Code,
        PromptKind::Retry,
        PromptKind::Classify,
        PromptKind::Simple,
        PromptKind::Simulate,
        PromptKind::Query,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PromptKind::Code => "code",
            PromptKind::Retry => "retry",
            PromptKind::Classify => "classify",
            PromptKind::Simple => "simple",
            PromptKind::Simulate => "simulate",
            PromptKind::Query => "query",
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            PromptKind::Code => CODE_TEMPLATE,
            PromptKind::Retry => RETRY_TEMPLATE,
            PromptKind::Classify => CLASSIFY_TEMPLATE,
            PromptKind::Simple => SIMPLE_TEMPLATE,
            PromptKind::Simulate => SIMULATE_TEMPLATE,
            PromptKind::Query => QUERY_TEMPLATE,
        }
    }
}

/// Earlier failure as exposed to the retry template.
#[derive(Debug, Clone, Serialize)]
struct AttemptContext<'a> {
    trial: u32,
    code: &'a str,
    error: &'a str,
}

/// Renders every prompt the pipeline sends.
#[derive(Debug)]
pub struct PromptBuilder {
    env: Environment<'static>,
    templates: BTreeMap<PromptKind, String>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    /// Builder using only the embedded templates.
    pub fn new() -> Self {
        let templates = PromptKind::ALL
            .into_iter()
            .map(|kind| (kind, kind.builtin().to_string()))
            .collect();
        Self {
            env: Environment::new(),
            templates,
        }
    }

    /// Builder whose templates may be overridden by `<dir>/<name>.md`.
    pub fn with_overrides(dir: Option<&Path>) -> Result<Self> {
        let mut builder = Self::new();
        let Some(dir) = dir else {
            return Ok(builder);
        };
        for kind in PromptKind::ALL {
            let path = dir.join(format!("{}.md", kind.name()));
            if !path.exists() {
                continue;
            }
            let source = fs::read_to_string(&path)
                .with_context(|| format!("read prompt template {}", path.display()))?;
            debug!(template = kind.name(), path = %path.display(), "using prompt override");
            builder.templates.insert(kind, source);
        }
        Ok(builder)
    }

    fn template(&self, kind: PromptKind) -> &str {
        self.templates
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.builtin())
    }

    /// Render a single-question prompt (`code`, `classify`, `simple`, `simulate`, `query`).
    pub fn render(&self, kind: PromptKind, question: &str) -> Result<String> {
        let question = require("question", question)?;
        self.env
            .render_str(self.template(kind), context! { question => question })
            .with_context(|| format!("render {} prompt", kind.name()))
    }

    pub fn code(&self, question: &str) -> Result<String> {
        self.render(PromptKind::Code, question)
    }

    pub fn classify(&self, question: &str) -> Result<String> {
        self.render(PromptKind::Classify, question)
    }

    /// Render a retry prompt from the failing code and its error.
    ///
    /// `history` holds earlier failures and is empty unless history
    /// accumulation is enabled.
    pub fn retry(
        &self,
        question: &str,
        code: &str,
        error: &str,
        history: &[FailedAttempt],
    ) -> Result<String> {
        let question = require("question", question)?;
        let code = require("code", code)?;
        let error = require("error", error)?;
        let history: Vec<AttemptContext<'_>> = history
            .iter()
            .map(|attempt| AttemptContext {
                trial: attempt.trial,
                code: attempt.code.trim(),
                error: attempt.error.trim(),
            })
            .collect();
        self.env
            .render_str(
                self.template(PromptKind::Retry),
                context! {
                    question => question,
                    code => code,
                    error => error,
                    history => history,
                },
            )
            .context("render retry prompt")
    }
}

fn require<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(trimmed)
}
