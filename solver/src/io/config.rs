//! Solver configuration stored in `solver.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "solver.toml";

/// Solver configuration (TOML).
///
/// Every field has a default so a partial file, or no file at all, is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    /// Total executions allowed per request (initial attempt included).
    pub max_trials: u32,

    /// Feed every earlier failure into retry prompts, not only the latest.
    pub accumulate_history: bool,

    /// Directory with `<name>.md` files overriding the built-in prompt templates.
    pub prompts_dir: Option<PathBuf>,

    pub execution: ExecutionConfig,
    pub dependencies: DependencyConfig,
    pub generator: GeneratorConfig,

    /// Separate backend for task classification; falls back to `generator`.
    pub classifier: Option<GeneratorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Interpreter command; the source file path is appended as the last argument.
    pub interpreter: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Working directory for executed code (defaults to the solver's own).
    pub workdir: Option<PathBuf>,
    /// Directory for temporary source files (defaults to the system temp dir).
    pub temp_dir: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: vec!["python3".to_string()],
            timeout_secs: 50,
            output_limit_bytes: 1_000_000,
            workdir: None,
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DependencyConfig {
    /// Line-oriented manifest of every package accepted for installation.
    pub manifest_path: PathBuf,
    /// Package manager command; package specifiers are appended.
    pub install_command: Vec<String>,
    pub install_timeout_secs: u64,
    /// Pass `--upgrade` to the package manager.
    pub upgrade: bool,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            manifest_path: PathBuf::from("requirements.txt"),
            install_command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
            ],
            install_timeout_secs: 600,
            upgrade: false,
        }
    }
}

/// Backend used to produce generator text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorConfig {
    /// Pipe the prompt into a local command (e.g. `ollama run <model>`).
    Command(CommandGeneratorConfig),
    /// OpenAI-compatible chat completions with proxy -> direct fallback.
    Chat(ChatGeneratorConfig),
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig::Command(CommandGeneratorConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandGeneratorConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for CommandGeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "ollama".to_string(),
                "run".to_string(),
                "codellama:latest".to_string(),
            ],
            timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatGeneratorConfig {
    /// Tried first unless the session already prefers `direct`.
    pub proxy: Option<EndpointConfig>,
    pub direct: EndpointConfig,
    pub temperature: Option<f64>,
    pub timeout_secs: u64,
}

impl Default for ChatGeneratorConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            direct: EndpointConfig::default(),
            temperature: Some(0.2),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointConfig {
    /// Full chat-completions URL.
    pub url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Send the key as `Bearer <key>` (some proxies expect the raw token).
    pub bearer: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "deepseek/deepseek-chat-v3-0324:free".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            bearer: true,
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_trials: 5,
            accumulate_history: false,
            prompts_dir: None,
            execution: ExecutionConfig::default(),
            dependencies: DependencyConfig::default(),
            generator: GeneratorConfig::default(),
            classifier: None,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_trials == 0 {
            return Err(anyhow!("max_trials must be > 0"));
        }
        if self.execution.timeout_secs == 0 {
            return Err(anyhow!("execution.timeout_secs must be > 0"));
        }
        if self.execution.output_limit_bytes == 0 {
            return Err(anyhow!("execution.output_limit_bytes must be > 0"));
        }
        if !is_command(&self.execution.interpreter) {
            return Err(anyhow!("execution.interpreter must be a non-empty array"));
        }
        if !is_command(&self.dependencies.install_command) {
            return Err(anyhow!(
                "dependencies.install_command must be a non-empty array"
            ));
        }
        if self.dependencies.install_timeout_secs == 0 {
            return Err(anyhow!("dependencies.install_timeout_secs must be > 0"));
        }
        validate_generator("generator", &self.generator)?;
        if let Some(classifier) = &self.classifier {
            validate_generator("classifier", classifier)?;
        }
        Ok(())
    }

    /// Classifier backend, defaulting to the code generator.
    pub fn classifier(&self) -> &GeneratorConfig {
        self.classifier.as_ref().unwrap_or(&self.generator)
    }
}

fn validate_generator(section: &str, cfg: &GeneratorConfig) -> Result<()> {
    match cfg {
        GeneratorConfig::Command(command) => {
            if !is_command(&command.command) {
                return Err(anyhow!("{section}.command must be a non-empty array"));
            }
            if command.timeout_secs == 0 {
                return Err(anyhow!("{section}.timeout_secs must be > 0"));
            }
        }
        GeneratorConfig::Chat(chat) => {
            if chat.timeout_secs == 0 {
                return Err(anyhow!("{section}.timeout_secs must be > 0"));
            }
            let endpoints = chat.proxy.iter().chain(std::iter::once(&chat.direct));
            for endpoint in endpoints {
                if endpoint.url.trim().is_empty() || endpoint.model.trim().is_empty() {
                    return Err(anyhow!("{section} endpoints need a url and a model"));
                }
            }
        }
    }
    Ok(())
}

fn is_command(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SolverConfig::default()`.
pub fn load_config(path: &Path) -> Result<SolverConfig> {
    if !path.exists() {
        let cfg = SolverConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SolverConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SolverConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SolverConfig::default());
        assert_eq!(cfg.max_trials, 5);
        assert_eq!(cfg.execution.timeout_secs, 50);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("solver.toml");
        let cfg = SolverConfig {
            classifier: Some(GeneratorConfig::Chat(ChatGeneratorConfig {
                proxy: Some(EndpointConfig {
                    url: "https://proxy.example/v1/chat/completions".to_string(),
                    model: "small".to_string(),
                    api_key_env: "PROXY_TOKEN".to_string(),
                    bearer: false,
                }),
                ..ChatGeneratorConfig::default()
            })),
            ..SolverConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("solver.toml");
        fs::write(
            &path,
            "max_trials = 2\n\n[execution]\ntimeout_secs = 5\n\n[generator]\nkind = \"command\"\ncommand = [\"cat\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_trials, 2);
        assert_eq!(cfg.execution.timeout_secs, 5);
        assert_eq!(cfg.execution.interpreter, vec!["python3"]);
        match cfg.classifier() {
            GeneratorConfig::Command(command) => {
                assert_eq!(command.command, vec!["cat"]);
                assert_eq!(command.timeout_secs, 90);
            }
            other => panic!("unexpected classifier {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_trials() {
        let cfg = SolverConfig {
            max_trials: 0,
            ..SolverConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_trials"));
    }

    #[test]
    fn rejects_empty_interpreter() {
        let mut cfg = SolverConfig::default();
        cfg.execution.interpreter = vec![" ".to_string()];
        assert!(cfg.validate().is_err());
    }
}
