//! Task classification and per-category handling.

use anyhow::{Context, Result, bail};
use tracing::{info, instrument};

use crate::core::types::{Category, SolveOutcome};
use crate::io::executor::CodeRunner;
use crate::io::generator::Generator;
use crate::io::installer::Installer;
use crate::io::prompt::{PromptBuilder, PromptKind};
use crate::retry::{Orchestrator, TrialReport};

const NO_RESPONSE: &str = "No response from LLM";

/// Ask the classifier which category `task` belongs to.
#[instrument(skip_all)]
pub fn classify<C: Generator + ?Sized>(
    classifier: &C,
    prompts: &PromptBuilder,
    task: &str,
) -> Result<Category> {
    let prompt = prompts.classify(task)?;
    let label = classifier.generate(&prompt).context("classifier call failed")?;
    let label = label.trim();
    if label.is_empty() {
        bail!("classifier returned no label");
    }
    let category = Category::from_label(label);
    info!(category = category.label(), "task classified");
    Ok(category)
}

/// Produce the answer text for `task` under `category`.
///
/// `on_trial` observes executed trials of `code_execution` tasks.
#[instrument(skip_all, fields(category = category.label()))]
pub fn dispatch<G, R, I, F>(
    orchestrator: &Orchestrator<'_, G, R, I>,
    category: &Category,
    task: &str,
    on_trial: F,
) -> Result<String>
where
    G: Generator + ?Sized,
    R: CodeRunner + ?Sized,
    I: Installer,
    F: FnMut(&TrialReport<'_>),
{
    let prompt_kind = match category {
        Category::CodeExecution => {
            return orchestrator
                .solve(task, on_trial)
                .map(|outcome| outcome.answer());
        }
        Category::ApiCreation => return generate_code_only(orchestrator, task),
        Category::SimpleLlm => PromptKind::Simple,
        Category::StaticAnswer => PromptKind::Simulate,
        Category::QueryOnly => PromptKind::Query,
        Category::Unsupported(label) => return Ok(format!("Unsupported category: {label}")),
    };

    let prompt = orchestrator.prompts().render(prompt_kind, task)?;
    let reply = orchestrator
        .generator()
        .generate(&prompt)
        .context("generator call failed")?;
    let reply = reply.trim();
    Ok(if reply.is_empty() {
        NO_RESPONSE.to_string()
    } else {
        reply.to_string()
    })
}

/// Generate code for `task` and return its source without running it.
fn generate_code_only<G, R, I>(orchestrator: &Orchestrator<'_, G, R, I>, task: &str) -> Result<String>
where
    G: Generator + ?Sized,
    R: CodeRunner + ?Sized,
    I: Installer,
{
    let prompt = orchestrator.prompts().code(task)?;
    Ok(match orchestrator.generate_artifact(&prompt)? {
        Ok(artifact) => artifact.source().to_string(),
        Err(error) => SolveOutcome::GenerationFailed { trial: 1, error }.answer(),
    })
}
