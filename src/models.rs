// src/models.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::constants::{APP_DIR, DEFAULT_TEMPLATE_EXTENSION, TEMPLATES_DIRNAME};

// --- COMPLETION MODELS ---

/// Extra keyword options forwarded to the completion service.
///
/// A `BTreeMap` keeps keys sorted, which gives every serialization of the
/// options a canonical form. The response cache fingerprint relies on this.
pub type Options = BTreeMap<String, serde_json::Value>;

/// A single request to the completion service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub options: Options,
}

impl CompletionRequest {
    /// Builds a request with no extra options.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            options: Options::new(),
        }
    }

    /// Attaches the given options to the request.
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
}

/// One increment of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// A piece of response text. An empty delta also ends the stream.
    Text(String),
    /// The transport signalled the end of the response.
    Done,
}

// --- RUN OUTCOME ---

/// How a run ends once the render session has been closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The template rendered; the text goes to stdout.
    Rendered(String),
    /// The run stops with this exit code and prints nothing more.
    Exit(i32),
    /// The process must be replaced by `shell -c command`.
    Execute { shell: String, command: String },
}

// --- CONFIGURATION MODELS ---

/// The contents of `config.toml`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SiestaConfig {
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

/// Settings for the outbound completion transport.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Whole-request timeout enforced by the HTTP client.
    pub timeout_secs: u64,
    /// Maximum number of completions in flight at once.
    pub max_concurrency: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 600,
            max_concurrency: 8,
        }
    }
}

/// Settings for rendering and the filters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Shell used by the `run` filter as `<shell> -c <cmd>`.
    pub shell: String,
    /// Shell that replaces the process when a confirmed command is executed.
    pub interactive_shell: String,
    /// Directories searched for named templates (`~` and env vars are expanded).
    pub template_dirs: Vec<String>,
    /// File extension of listable templates.
    pub template_extension: String,
    /// Enables the `eval` function.
    pub allow_eval: bool,
    /// Overrides the response cache location.
    pub cache_path: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let shell = if cfg!(target_os = "windows") { "cmd" } else { "sh" };
        Self {
            shell: shell.to_string(),
            interactive_shell: "bash".to_string(),
            template_dirs: vec![format!("~/.config/{}/{}", APP_DIR, TEMPLATES_DIRNAME)],
            template_extension: DEFAULT_TEMPLATE_EXTENSION.to_string(),
            allow_eval: false,
            cache_path: None,
        }
    }
}
