//! The `OpenAIClient` struct implements `ClientWrapper` for OpenAI's Chat API
//! and any OpenAI-compatible endpoint (e.g. a local Ollama server), capturing
//! both the assistant response and the token usage of the last call.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentcollab::clients::openai::OpenAIClient;
//! use agentcollab::client_wrapper::{ClientWrapper, Message, Role};
//! use agentcollab::config::ModelConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ModelConfig::from_env("gpt-4")?;
//!     let client = OpenAIClient::from_config(&config);
//!
//!     let resp = client
//!         .send_message(&[
//!             Message::new(Role::System, "You are an assistant."),
//!             Message::new(Role::User, "Hello!"),
//!         ])
//!         .await?;
//!     println!("Assistant: {}", resp.content);
//!
//!     if let Some(usage) = client.get_last_usage().await {
//!         println!(
//!             "Tokens: input {}, output {}, total {}",
//!             usage.input_tokens, usage.output_tokens, usage.total_tokens
//!         );
//!     }
//!     Ok(())
//! }
//! ```
use std::error::Error;

use async_trait::async_trait;
use openai_rust::chat;
use openai_rust2 as openai_rust;

use crate::agentcollab::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
use crate::agentcollab::config::ModelConfig;
use crate::agentcollab::http_client_pool::get_or_create_client;
use crate::agentcollab::clients::common::send_and_track;
use tokio::sync::Mutex;

/// Client wrapper for OpenAI-compatible Chat Completions APIs.
///
/// The wrapper keeps the model identifier, the sampling temperature and an
/// internal [`TokenUsage`] slot so callers can inspect how many tokens each
/// request consumed. HTTP connections are shared per base URL through
/// [`crate::agentcollab::http_client_pool`].
pub struct OpenAIClient {
    /// Underlying SDK client pointing at the REST endpoint.
    client: openai_rust::Client,
    /// Model name that will be injected into each request.
    model: String,
    temperature: Option<f32>,
    /// Storage for the token usage returned by the most recent request.
    token_usage: Mutex<Option<TokenUsage>>,
}

impl OpenAIClient {
    /// Build a client from a validated [`ModelConfig`].
    pub fn from_config(config: &ModelConfig) -> Self {
        let mut client = Self::new_with_base_url(&config.api_key, &config.model, &config.base_url);
        client.temperature = config.temperature;
        client
    }

    /// Construct a client targeting a custom OpenAI compatible base URL.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        OpenAIClient {
            client: openai_rust::Client::new_with_client_and_base_url(
                secret_key,
                get_or_create_client(base_url),
                base_url,
            ),
            model: model_name.to_string(),
            temperature: None,
            token_usage: Mutex::new(None),
        }
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        // Convert the provided messages into the format expected by openai_rust
        let mut formatted_messages = Vec::with_capacity(messages.len());
        for msg in messages {
            formatted_messages.push(chat::Message {
                role: msg.role.as_str().to_owned(),
                content: msg.content.to_string(),
            });
        }

        let content = send_and_track(
            &self.client,
            &self.model,
            formatted_messages,
            self.temperature,
            &self.token_usage,
        )
        .await?;

        Ok(Message::new(Role::Assistant, content))
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
