//! Bounded generate → reconcile → execute → regenerate loop.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::parser::parse_response;
use crate::core::types::{
    CodeArtifact, ExecutionResult, FailedAttempt, RetryState, SolveOutcome,
};
use crate::io::config::SolverConfig;
use crate::io::executor::CodeRunner;
use crate::io::generator::Generator;
use crate::io::installer::Installer;
use crate::io::prompt::PromptBuilder;
use crate::io::reconcile::{ReconcileReport, Reconciler};

/// Trial limits for one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total executions allowed, initial attempt included.
    pub max_trials: u32,
    /// Include every earlier failure in retry prompts.
    pub accumulate_history: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_trials: 5,
            accumulate_history: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &SolverConfig) -> Self {
        Self {
            max_trials: cfg.max_trials,
            accumulate_history: cfg.accumulate_history,
        }
    }
}

/// One executed trial, as seen by the `on_trial` observer.
#[derive(Debug)]
pub struct TrialReport<'a> {
    pub trial: u32,
    pub max_trials: u32,
    pub artifact: &'a CodeArtifact,
    pub dependencies: &'a ReconcileReport,
    pub result: &'a ExecutionResult,
}

/// Collaborators for the retry loop, borrowed for the duration of a request.
pub struct Orchestrator<'a, G: ?Sized, R: ?Sized, I> {
    generator: &'a G,
    runner: &'a R,
    reconciler: &'a Reconciler<I>,
    prompts: &'a PromptBuilder,
    policy: RetryPolicy,
}

impl<'a, G, R, I> Orchestrator<'a, G, R, I>
where
    G: Generator + ?Sized,
    R: CodeRunner + ?Sized,
    I: Installer,
{
    pub fn new(
        generator: &'a G,
        runner: &'a R,
        reconciler: &'a Reconciler<I>,
        prompts: &'a PromptBuilder,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            generator,
            runner,
            reconciler,
            prompts,
            policy,
        }
    }

    pub fn generator(&self) -> &'a G {
        self.generator
    }

    pub fn prompts(&self) -> &'a PromptBuilder {
        self.prompts
    }

    /// Generate the first artifact for `task`, then run the trial loop.
    ///
    /// Returns `Err` only when the generator or prompt rendering faults.
    #[instrument(skip_all, fields(max_trials = self.policy.max_trials))]
    pub fn solve<F: FnMut(&TrialReport<'_>)>(
        &self,
        task: &str,
        on_trial: F,
    ) -> Result<SolveOutcome> {
        let prompt = self.prompts.code(task)?;
        let first = match self.generate_artifact(&prompt)? {
            Ok(artifact) => artifact,
            Err(error) => {
                warn!(error = %error, "initial generation produced no code");
                return Ok(SolveOutcome::GenerationFailed { trial: 1, error });
            }
        };
        self.run_trials(task, first, on_trial)
    }

    /// Run the loop starting from an already generated artifact.
    ///
    /// Trial 1 executes `first`. Each failure regenerates from the latest
    /// failing code and its error until an execution succeeds or `max_trials`
    /// executions have run.
    pub fn run_trials<F: FnMut(&TrialReport<'_>)>(
        &self,
        task: &str,
        first: CodeArtifact,
        mut on_trial: F,
    ) -> Result<SolveOutcome> {
        let mut state = RetryState::new(self.policy.max_trials.max(1), first);
        loop {
            let dependencies = self.reconciler.reconcile(state.last_code.dependencies());
            let result = self.runner.run(&state.last_code);
            on_trial(&TrialReport {
                trial: state.trial,
                max_trials: state.max_trials,
                artifact: &state.last_code,
                dependencies: &dependencies,
                result: &result,
            });

            if result.success {
                info!(trial = state.trial, elapsed = result.elapsed_seconds, "trial accepted");
                return Ok(SolveOutcome::Accepted {
                    trial: state.trial,
                    output: result.stdout,
                });
            }

            state.last_error = result.failure_context();
            info!(trial = state.trial, kind = %result.error_kind, "trial failed");
            if state.is_exhausted() {
                warn!(trials = state.trial, "retry budget exhausted");
                return Ok(SolveOutcome::Exhausted {
                    trials: state.trial,
                    last_error: state.last_error,
                });
            }

            let prompt = self
                .prompts
                .retry(
                    task,
                    state.last_code.source(),
                    &state.last_error,
                    &state.attempts,
                )
                .with_context(|| format!("build retry prompt for trial {}", state.trial + 1))?;
            if self.policy.accumulate_history {
                state.attempts.push(FailedAttempt {
                    trial: state.trial,
                    code: state.last_code.source().to_string(),
                    error: state.last_error.clone(),
                });
            }

            state.trial += 1;
            debug!(trial = state.trial, "regenerating");
            state.last_code = match self.generate_artifact(&prompt)? {
                Ok(artifact) => artifact,
                Err(error) => {
                    warn!(trial = state.trial, error = %error, "regeneration produced no code");
                    return Ok(SolveOutcome::GenerationFailed {
                        trial: state.trial,
                        error,
                    });
                }
            };
        }
    }

    /// Call the generator and parse its reply.
    ///
    /// The outer `Result` carries generator faults; the inner one carries
    /// unusable replies, which end the loop without raising.
    pub fn generate_artifact(&self, prompt: &str) -> Result<std::result::Result<CodeArtifact, String>> {
        let text = self.generator.generate(prompt).context("generator call failed")?;
        Ok(artifact_from_reply(&text))
    }
}

/// Parse a generator reply into a runnable artifact.
pub fn artifact_from_reply(text: &str) -> std::result::Result<CodeArtifact, String> {
    if text.trim().is_empty() {
        return Err("Generator returned an empty response".to_string());
    }
    let parsed = parse_response(text);
    if !parsed.success {
        return Err(parsed.error);
    }
    if parsed.code.is_empty() {
        return Err("Code block is empty".to_string());
    }
    parsed
        .into_artifact()
        .ok_or_else(|| "Code block not found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reply_is_a_generation_failure() {
        assert_eq!(
            artifact_from_reply("  \n"),
            Err("Generator returned an empty response".to_string())
        );
    }

    #[test]
    fn reply_without_code_block_reports_parser_error() {
        assert_eq!(
            artifact_from_reply("just prose"),
            Err("Code block not found".to_string())
        );
    }

    #[test]
    fn blank_code_block_is_rejected() {
        assert_eq!(
            artifact_from_reply("```code\n\n```"),
            Err("Code block is empty".to_string())
        );
    }

    #[test]
    fn reply_with_code_and_dependencies_becomes_artifact() {
        let artifact =
            artifact_from_reply("```code\nimport numpy\n```\n```dependencies\nnumpy\n```")
                .expect("artifact");
        assert_eq!(artifact.source(), "import numpy");
        assert_eq!(artifact.dependencies(), ["numpy".to_string()]);
    }

    #[test]
    fn default_policy_allows_five_trials() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_trials, 5);
        assert!(!policy.accumulate_history);
        assert_eq!(RetryPolicy::from_config(&SolverConfig::default()), policy);
    }
}
