//! Configuration for agentcollab.
//!
//! Provides [`ModelConfig`] for the generation backend and [`ChatConfig`] for
//! the group chat loop. Both are plain structs built in code and validated when
//! they are constructed, never at call time. No config-file parsing
//! dependencies are required.
//!
//! # Example
//!
//! ```rust
//! use agentcollab::config::{ChatConfig, ModelConfig};
//! use std::time::Duration;
//!
//! let model = ModelConfig::builder("gpt-4")
//!     .api_key("sk-test")
//!     .timeout(Duration::from_secs(120))
//!     .temperature(0.2)
//!     .build()
//!     .unwrap();
//! assert_eq!(model.model, "gpt-4");
//!
//! let chat = ChatConfig::default().with_max_rounds(30);
//! assert_eq!(chat.max_rounds, 30);
//! ```

use crate::agentcollab::speaker_selection::SpeakerSelection;
use std::env;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Endpoint used when no `base_url` is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Environment variable holding the generation backend credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Optional environment override for the model identifier.
pub const MODEL_ENV: &str = "AGENTCOLLAB_MODEL";
/// Optional environment override for the base endpoint.
pub const BASE_URL_ENV: &str = "AGENTCOLLAB_BASE_URL";

/// Errors raised while validating configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The model identifier was empty.
    EmptyModel,
    /// No credential was supplied for an endpoint that requires one.
    MissingCredential(String),
    /// The base endpoint is not an `http://` or `https://` URL.
    InvalidBaseUrl(String),
    /// A zero timeout was configured.
    InvalidTimeout,
    /// Temperature outside `0.0..=2.0`.
    InvalidTemperature(f32),
    /// The chat configuration is unusable (e.g. no sentinels).
    InvalidChat(String),
    /// A model list had no entries.
    NoModels,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyModel => write!(f, "Model identifier must not be empty"),
            ConfigError::MissingCredential(msg) => write!(f, "Missing credential: {}", msg),
            ConfigError::InvalidBaseUrl(url) => write!(f, "Invalid base URL: {}", url),
            ConfigError::InvalidTimeout => write!(f, "Timeout must be greater than zero"),
            ConfigError::InvalidTemperature(t) => {
                write!(f, "Temperature {} is outside the range 0.0..=2.0", t)
            }
            ConfigError::InvalidChat(msg) => write!(f, "Invalid chat configuration: {}", msg),
            ConfigError::NoModels => write!(f, "At least one model must be configured"),
        }
    }
}

impl Error for ConfigError {}

/// Recognised options for a generation backend.
///
/// Construct it through [`ModelConfig::builder`] or [`ModelConfig::from_env`];
/// both validate the values before handing out a config.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Model identifier sent with every request (e.g. `"gpt-4"`, `"llama2:13b"`).
    pub model: String,
    /// Credential for the endpoint. May be empty for local servers.
    pub api_key: String,
    /// Base endpoint of an OpenAI-compatible API.
    pub base_url: String,
    /// Upper bound on a single generation call.
    pub timeout: Duration,
    /// Sampling temperature, `None` keeps the backend default.
    pub temperature: Option<f32>,
}

impl ModelConfig {
    /// Start building a config for `model`.
    pub fn builder(model: impl Into<String>) -> ModelConfigBuilder {
        ModelConfigBuilder {
            model: model.into(),
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(600),
            temperature: None,
        }
    }

    /// Build a config from the process environment.
    ///
    /// Reads the credential from `OPENAI_API_KEY`. `AGENTCOLLAB_MODEL` and
    /// `AGENTCOLLAB_BASE_URL` override `default_model` and the OpenAI endpoint.
    pub fn from_env(default_model: &str) -> Result<Self, ConfigError> {
        let model = env::var(MODEL_ENV).unwrap_or_else(|_| default_model.to_string());
        let mut builder = ModelConfig::builder(model);
        if let Ok(key) = env::var(API_KEY_ENV) {
            builder = builder.api_key(key);
        }
        if let Ok(url) = env::var(BASE_URL_ENV) {
            builder = builder.base_url(url);
        }
        builder.build()
    }

    /// Build an ordered fallback list from the process environment.
    ///
    /// `AGENTCOLLAB_MODEL` may hold a comma separated list (e.g.
    /// `gpt-4,gpt-3.5-turbo`); otherwise `default_models` is used. Every entry
    /// shares the credential and base endpoint and is validated on its own.
    pub fn list_from_env(default_models: &[&str]) -> Result<Vec<Self>, ConfigError> {
        let names = model_names(env::var(MODEL_ENV).ok(), default_models);
        if names.is_empty() {
            return Err(ConfigError::NoModels);
        }
        let api_key = env::var(API_KEY_ENV).ok();
        let base_url = env::var(BASE_URL_ENV).ok();
        names
            .into_iter()
            .map(|name| {
                let mut builder = ModelConfig::builder(name);
                if let Some(key) = &api_key {
                    builder = builder.api_key(key.clone());
                }
                if let Some(url) = &base_url {
                    builder = builder.base_url(url.clone());
                }
                builder.build()
            })
            .collect()
    }

    /// Whether this config targets the hosted OpenAI endpoint.
    pub fn is_default_endpoint(&self) -> bool {
        self.base_url.trim_end_matches('/') == DEFAULT_BASE_URL
    }
}

/// Model identifiers from a comma separated override, or the defaults.
fn model_names(value: Option<String>, defaults: &[&str]) -> Vec<String> {
    match value {
        Some(list) if !list.trim().is_empty() => list
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect(),
        _ => defaults.iter().map(|m| m.to_string()).collect(),
    }
}

/// Builder for [`ModelConfig`].
#[derive(Debug, Clone)]
pub struct ModelConfigBuilder {
    model: String,
    api_key: String,
    base_url: String,
    timeout: Duration,
    temperature: Option<f32>,
}

impl ModelConfigBuilder {
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Validate and produce the config.
    ///
    /// The hosted OpenAI endpoint needs a credential; other endpoints (e.g. a
    /// local Ollama server) may run without one.
    pub fn build(self) -> Result<ModelConfig, ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel);
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(self.base_url));
        }
        if self.timeout.as_millis() == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::InvalidTemperature(t));
            }
        }

        let config = ModelConfig {
            model: self.model,
            api_key: self.api_key,
            base_url: self.base_url,
            timeout: self.timeout,
            temperature: self.temperature,
        };

        if config.is_default_endpoint() && config.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential(format!(
                "{} requires an API key (set {})",
                DEFAULT_BASE_URL, API_KEY_ENV
            )));
        }

        Ok(config)
    }
}

/// Settings for a [`GroupChat`](crate::group_chat::GroupChat).
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Round budget for a single `run` call.
    pub max_rounds: usize,
    /// Sentinel tokens that end a conversation when a message ends with one.
    pub sentinels: Vec<String>,
    /// Phrases a Critic or Verifier uses to approve a contribution.
    pub approval_phrases: Vec<String>,
    /// How the next speaker is chosen.
    pub speaker_selection: SpeakerSelection,
    /// Directory handed to the execution collaborator.
    pub work_dir: PathBuf,
}

impl Default for ChatConfig {
    /// Fifteen rounds, `TERMINATE`, `Looks good!`, automatic selection, `./coding`.
    fn default() -> Self {
        ChatConfig {
            max_rounds: 15,
            sentinels: vec!["TERMINATE".to_string()],
            approval_phrases: vec!["Looks good!".to_string()],
            speaker_selection: SpeakerSelection::Auto,
            work_dir: PathBuf::from("coding"),
        }
    }
}

impl ChatConfig {
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_sentinels<I, S>(mut self, sentinels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sentinels = sentinels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_approval_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approval_phrases = phrases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_speaker_selection(mut self, selection: SpeakerSelection) -> Self {
        self.speaker_selection = selection;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Check the settings the loop relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sentinels.is_empty() {
            return Err(ConfigError::InvalidChat(
                "at least one termination sentinel is required".to_string(),
            ));
        }
        if self.sentinels.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::InvalidChat(
                "termination sentinels must not be blank".to_string(),
            ));
        }
        if self.approval_phrases.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::InvalidChat(
                "approval phrases must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}
