//! Verified task solver.
//!
//! Turns a natural-language task into code, installs the packages it asks
//! for, runs it in a separate interpreter process and regenerates on failure.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use solver::core::parser::parse_response;
use solver::core::types::Category;
use solver::dispatch::{classify, dispatch};
use solver::exit_codes;
use solver::io::config::{DEFAULT_CONFIG_FILE, SolverConfig, load_config, write_config};
use solver::io::executor::IsolatedExecutor;
use solver::io::generator::ConfiguredGenerator;
use solver::io::installer::{CommandInstaller, InstallStatus};
use solver::io::manifest::Manifest;
use solver::io::prompt::PromptBuilder;
use solver::io::reconcile::Reconciler;
use solver::logging;
use solver::retry::{Orchestrator, RetryPolicy, TrialReport};

#[derive(Parser)]
#[command(
    name = "solver",
    version,
    about = "Generate, execute and verify code for natural-language tasks"
)]
struct Cli {
    /// Path to the solver config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file if missing.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Classify a task file and answer it.
    Solve {
        /// File holding the task text.
        task: PathBuf,
        /// Skip classification and use this category label.
        #[arg(long)]
        category: Option<String>,
    },
    /// Run a source file once in the isolated executor.
    Exec {
        file: PathBuf,
        /// Override the configured timeout, in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Print the full execution result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Reconcile dependency specifiers against the manifest and install the gap.
    Deps {
        #[arg(required = true)]
        dependencies: Vec<String>,
    },
    /// Parse a saved generator response and print the result as JSON.
    Parse { file: PathBuf },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Solve { task, category } => {
            let cfg = load_config(&cli.config)?;
            cmd_solve(&cfg, &task, category.as_deref())
        }
        Command::Exec {
            file,
            timeout,
            json,
        } => {
            let cfg = load_config(&cli.config)?;
            cmd_exec(&cfg, &file, timeout, json)
        }
        Command::Deps { dependencies } => {
            let cfg = load_config(&cli.config)?;
            cmd_deps(&cfg, &dependencies)
        }
        Command::Parse { file } => cmd_parse(&file),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        println!("{} already exists", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &SolverConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_solve(cfg: &SolverConfig, task_path: &Path, category: Option<&str>) -> Result<i32> {
    let task = fs::read_to_string(task_path)
        .with_context(|| format!("read {}", task_path.display()))?;
    let prompts = PromptBuilder::with_overrides(cfg.prompts_dir.as_deref())?;

    let category = match category {
        Some(label) => Category::from_label(label),
        None => {
            let classifier = ConfiguredGenerator::from_config(cfg.classifier())?;
            classify(&classifier, &prompts, &task).context("classify task")?
        }
    };
    debug!(category = category.label(), "dispatching");

    let generator = ConfiguredGenerator::from_config(&cfg.generator)?;
    let runner = IsolatedExecutor::from_config(&cfg.execution);
    let reconciler = Reconciler::new(
        Manifest::new(&cfg.dependencies.manifest_path),
        CommandInstaller::from_config(&cfg.dependencies),
    );
    let orchestrator = Orchestrator::new(
        &generator,
        &runner,
        &reconciler,
        &prompts,
        RetryPolicy::from_config(cfg),
    );

    if category == Category::CodeExecution {
        let outcome = orchestrator.solve(&task, report_trial)?;
        println!("{}", outcome.answer());
        return Ok(if outcome.is_accepted() {
            exit_codes::OK
        } else {
            exit_codes::FAILED
        });
    }

    let answer = dispatch(&orchestrator, &category, &task, report_trial)
        .with_context(|| format!("handle category '{}'", category.label()))?;
    println!("{answer}");
    Ok(exit_codes::OK)
}

fn report_trial(report: &TrialReport<'_>) {
    let status = if report.result.success {
        "ok".to_string()
    } else {
        format!("failed ({})", report.result.error_kind)
    };
    eprintln!(
        "trial {}/{}: {status} in {:.3}s",
        report.trial, report.max_trials, report.result.elapsed_seconds
    );
    if report.dependencies.install_failed() {
        eprintln!("  dependency installation failed, ran anyway");
    }
}

fn cmd_exec(cfg: &SolverConfig, file: &Path, timeout: Option<u64>, json: bool) -> Result<i32> {
    let mut executor = IsolatedExecutor::from_config(&cfg.execution);
    if let Some(secs) = timeout {
        executor = executor.with_timeout(Duration::from_secs(secs));
    }
    let result = executor.run_file(file);

    if json {
        let payload = serde_json::to_string_pretty(&result).context("serialize result")?;
        println!("{payload}");
    } else {
        print!("{}", result.stdout);
        if !result.success {
            eprintln!("{}", result.failure_context());
        }
    }
    Ok(if result.success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_deps(cfg: &SolverConfig, dependencies: &[String]) -> Result<i32> {
    let reconciler = Reconciler::new(
        Manifest::new(&cfg.dependencies.manifest_path),
        CommandInstaller::from_config(&cfg.dependencies),
    );
    let report = reconciler.reconcile(dependencies);

    if let Some(err) = &report.manifest_error {
        eprintln!("manifest unavailable: {err}");
    }
    if report.missing.is_empty() {
        println!("all dependencies already in {}", reconciler.manifest().path().display());
    } else {
        println!("added {} of {}: {}", report.committed, report.requested, report.missing.join(", "));
    }
    Ok(match report.install {
        InstallStatus::Failed { message } => {
            eprintln!("{message}");
            exit_codes::FAILED
        }
        InstallStatus::NotNeeded | InstallStatus::Installed => exit_codes::OK,
    })
}

fn cmd_parse(file: &Path) -> Result<i32> {
    let text = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let parsed = parse_response(&text);
    let payload = serde_json::to_string_pretty(&parsed).context("serialize parse result")?;
    println!("{payload}");
    Ok(if parsed.success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}
