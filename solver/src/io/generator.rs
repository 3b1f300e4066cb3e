//! Generator backends: the external text producer behind every prompt.
//!
//! [`Generator`] is the seam the retry loop and the dispatcher depend on.
//! Two backends exist:
//!
//! - [`CommandGenerator`] pipes the prompt into a local command's stdin.
//! - [`ChatSession`] calls an OpenAI-compatible chat-completions API, trying
//!   a proxy endpoint first and falling back to a direct one. Which endpoint is
//!   preferred lives in an explicit [`ClientState`] owned by the session, so
//!   separate requests never share it.

use std::cell::Cell;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::config::{
    ChatGeneratorConfig, CommandGeneratorConfig, EndpointConfig, GeneratorConfig,
};
use crate::io::process::run_with_timeout;

const GENERATOR_OUTPUT_LIMIT_BYTES: usize = 2_000_000;

/// Produces raw text for a prompt. The text may be malformed or empty.
pub trait Generator {
    fn generate(&self, prompt: &str) -> Result<String>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt)
    }
}

/// Runs a command with the prompt on stdin and returns its stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(cfg: &CommandGeneratorConfig) -> Self {
        Self::new(cfg.command.clone(), Duration::from_secs(cfg.timeout_secs))
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs(), prompt_len = prompt.len()))]
    fn generate(&self, prompt: &str) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("generator command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        let output = run_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            GENERATOR_OUTPUT_LIMIT_BYTES,
        )
        .with_context(|| format!("run generator {program}"))?;

        if output.timed_out {
            bail!(
                "generator {program} timed out after {} seconds",
                self.timeout.as_secs()
            );
        }
        if !output.status.success() {
            bail!(
                "generator {program} failed with status {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            );
        }
        Ok(output.stdout_text().trim().to_string())
    }
}

/// Which chat endpoint a session should try first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientState {
    pub prefer_direct: bool,
}

impl ClientState {
    /// State after the proxy failed once: the direct endpoint wins from now on.
    pub fn after_proxy_failure(self) -> ClientState {
        ClientState {
            prefer_direct: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

/// Stateless HTTP client for the configured chat endpoints.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    config: ChatGeneratorConfig,
}

impl ChatClient {
    pub fn new(config: ChatGeneratorConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self { http, config })
    }

    /// One completion call against `endpoint`.
    #[instrument(skip_all, fields(url = %endpoint.url, model = %endpoint.model))]
    fn complete(&self, endpoint: &EndpointConfig, prompt: &str) -> Result<String> {
        let key = std::env::var(&endpoint.api_key_env)
            .with_context(|| format!("missing api key env {}", endpoint.api_key_env))?;
        let authorization = if endpoint.bearer {
            format!("Bearer {key}")
        } else {
            key
        };
        let body = ChatRequest {
            model: &endpoint.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
        };

        debug!("sending chat completion request");
        let response = self
            .http
            .post(&endpoint.url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .json(&body)
            .send()
            .with_context(|| format!("post {}", endpoint.url))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .with_context(|| format!("decode response from {}", endpoint.url))?;
        if !status.is_success() {
            bail!("{} returned {status}: {payload}", endpoint.url);
        }
        extract_content(&payload)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("unexpected response format: {payload}"))
    }

    /// Complete `prompt` given `state`, returning the text and the next state.
    ///
    /// The proxy is skipped when absent or when `state.prefer_direct` is set.
    /// A proxy error or empty reply moves the state to prefer direct before
    /// the direct call is made.
    pub fn call(&self, state: ClientState, prompt: &str) -> (Result<String>, ClientState) {
        let mut state = state;
        if let Some(proxy) = self.config.proxy.as_ref().filter(|_| !state.prefer_direct) {
            match self.complete(proxy, prompt) {
                Ok(text) if !text.trim().is_empty() => return (Ok(text), state),
                Ok(_) => warn!("proxy returned empty content, switching to direct"),
                Err(err) => warn!(err = %format!("{err:#}"), "proxy call failed, switching to direct"),
            }
            state = state.after_proxy_failure();
            info!("session now prefers the direct endpoint");
        }
        (self.complete(&self.config.direct, prompt), state)
    }
}

/// Pull `choices[0].message.content` (chat) or `output[0].content[0].text` (responses API).
fn extract_content(payload: &Value) -> Option<&str> {
    payload
        .pointer("/choices/0/message/content")
        .or_else(|| payload.pointer("/output/0/content/0/text"))
        .and_then(Value::as_str)
}

/// A chat client plus the fallback state for one request.
#[derive(Debug)]
pub struct ChatSession {
    client: ChatClient,
    state: Cell<ClientState>,
}

impl ChatSession {
    pub fn new(client: ChatClient, state: ClientState) -> Self {
        Self {
            client,
            state: Cell::new(state),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state.get()
    }
}

impl Generator for ChatSession {
    fn generate(&self, prompt: &str) -> Result<String> {
        let (result, next) = self.client.call(self.state.get(), prompt);
        self.state.set(next);
        result
    }
}

/// Generator built from a [`GeneratorConfig`].
#[derive(Debug)]
pub enum ConfiguredGenerator {
    Command(CommandGenerator),
    Chat(ChatSession),
}

impl ConfiguredGenerator {
    /// Build a backend with fresh per-request state.
    ///
    /// Chat backends create a blocking HTTP client, so this must not be
    /// called from inside an async runtime worker.
    pub fn from_config(cfg: &GeneratorConfig) -> Result<Self> {
        Ok(match cfg {
            GeneratorConfig::Command(command) => {
                ConfiguredGenerator::Command(CommandGenerator::from_config(command))
            }
            GeneratorConfig::Chat(chat) => ConfiguredGenerator::Chat(ChatSession::new(
                ChatClient::new(chat.clone())?,
                ClientState::default(),
            )),
        })
    }
}

impl Generator for ConfiguredGenerator {
    fn generate(&self, prompt: &str) -> Result<String> {
        match self {
            ConfiguredGenerator::Command(generator) => generator.generate(prompt),
            ConfiguredGenerator::Chat(session) => session.generate(prompt),
        }
    }
}
