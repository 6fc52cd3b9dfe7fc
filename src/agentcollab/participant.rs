//! Participants and their generation policies.
//!
//! A [`Participant`] is a named member of a group chat with a fixed
//! [`ParticipantRole`], an optional code execution capability, and a
//! [`GenerationPolicy`] that produces its next contribution from the shared
//! transcript (or declines to speak).
//!
//! # Example
//!
//! ```rust
//! use agentcollab::participant::{Generation, Participant, ParticipantRole, ScriptedPolicy};
//! use std::sync::Arc;
//!
//! let coder = Participant::new(
//!     "Coder",
//!     ParticipantRole::Generator,
//!     Arc::new(ScriptedPolicy::new(vec!["```python\nprint(42)\n```"])),
//! );
//! assert_eq!(coder.role, ParticipantRole::Generator);
//! assert!(!coder.can_execute);
//!
//! let admin = Participant::executor("Admin");
//! assert!(admin.can_execute);
//! ```

use crate::agentcollab::client_wrapper::{ClientWrapper, Message, Role};
use crate::agentcollab::clients::openai::OpenAIClient;
use crate::agentcollab::config::{ConfigError, ModelConfig};
use crate::agentcollab::transcript::Transcript;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// The closed set of roles a participant can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantRole {
    /// Supplies the opening request and gives final approval.
    Initiator,
    /// Writes code and revisions.
    Generator,
    /// Reviews contributions and either approves or asks for changes.
    Critic,
    /// Writes and reviews tests for the generated code.
    Verifier,
    /// Runs code found in the conversation.
    Executor,
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantRole::Initiator => write!(f, "Initiator"),
            ParticipantRole::Generator => write!(f, "Generator"),
            ParticipantRole::Critic => write!(f, "Critic"),
            ParticipantRole::Verifier => write!(f, "Verifier"),
            ParticipantRole::Executor => write!(f, "Executor"),
        }
    }
}

/// What a generation policy produced for a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    /// Content to append to the transcript.
    Reply(String),
    /// The participant has nothing to say; the next candidate is asked.
    Decline,
}

/// Failure of a generation collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// The model backend returned an error.
    Backend(String),
    /// The backend did not answer within the configured timeout.
    Timeout(Duration),
    /// A local policy failed (closures, scripted replies).
    Policy(String),
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::Backend(msg) => write!(f, "Backend error: {}", msg),
            GenerationError::Timeout(d) => {
                write!(f, "Generation timed out after {} seconds", d.as_secs())
            }
            GenerationError::Policy(msg) => write!(f, "Policy error: {}", msg),
        }
    }
}

impl Error for GenerationError {}

/// Produces a participant's next contribution from the full transcript.
#[async_trait]
pub trait GenerationPolicy: Send + Sync {
    /// `speaker` is the name of the participant this policy speaks for.
    async fn generate(
        &self,
        speaker: &str,
        transcript: &Transcript,
    ) -> Result<Generation, GenerationError>;
}

/// Type of the closure wrapped by [`FnPolicy`].
pub type PolicyFn =
    Arc<dyn Fn(&str, &Transcript) -> Result<Generation, GenerationError> + Send + Sync>;

/// Generation policy backed by a synchronous closure.
///
/// ```rust
/// use agentcollab::participant::{FnPolicy, Generation};
/// use std::sync::Arc;
///
/// use agentcollab::participant::GenerationError;
/// use agentcollab::transcript::Transcript;
///
/// let echo = FnPolicy::new(Arc::new(
///     |_speaker: &str, transcript: &Transcript| -> Result<Generation, GenerationError> {
///         let last = transcript.last().map(|m| m.text()).unwrap_or_default();
///         Ok(Generation::Reply(format!("echo: {}", last)))
///     },
/// ));
/// # let _ = echo;
/// ```
pub struct FnPolicy {
    func: PolicyFn,
}

impl FnPolicy {
    pub fn new(func: PolicyFn) -> Self {
        FnPolicy { func }
    }
}

#[async_trait]
impl GenerationPolicy for FnPolicy {
    async fn generate(
        &self,
        speaker: &str,
        transcript: &Transcript,
    ) -> Result<Generation, GenerationError> {
        (self.func)(speaker, transcript)
    }
}

/// Replays a fixed queue of results, then declines.
///
/// Useful for deterministic demos and tests.
pub struct ScriptedPolicy {
    replies: Mutex<VecDeque<Result<Generation, GenerationError>>>,
}

impl ScriptedPolicy {
    /// Queue plain text replies.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(
            replies
                .into_iter()
                .map(|r| Ok(Generation::Reply(r.into())))
                .collect::<Vec<_>>(),
        )
    }

    /// Queue arbitrary results, including declines and failures.
    pub fn from_results(results: Vec<Result<Generation, GenerationError>>) -> Self {
        ScriptedPolicy {
            replies: Mutex::new(results.into_iter().collect()),
        }
    }

    pub async fn remaining(&self) -> usize {
        self.replies.lock().await.len()
    }
}

#[async_trait]
impl GenerationPolicy for ScriptedPolicy {
    async fn generate(
        &self,
        _speaker: &str,
        _transcript: &Transcript,
    ) -> Result<Generation, GenerationError> {
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(Generation::Decline))
    }
}

/// Always declines.
pub struct NoReply;

#[async_trait]
impl GenerationPolicy for NoReply {
    async fn generate(
        &self,
        _speaker: &str,
        _transcript: &Transcript,
    ) -> Result<Generation, GenerationError> {
        Ok(Generation::Decline)
    }
}

/// Auto-reply cap used by [`Participant::executor`].
pub const DEFAULT_MAX_AUTO_REPLIES: usize = 10;

/// Sends a fixed default reply when nothing else is pending, at most
/// `max_consecutive` times in a row.
///
/// The count covers this speaker's text messages since its last execution
/// result, so running code resets it. Once the cap is reached the policy
/// declines. An executing participant uses this to keep a two-party exchange
/// going when the other side answers without new code.
pub struct AutoReply {
    reply: String,
    max_consecutive: usize,
}

impl AutoReply {
    /// Empty default reply, capped at `max_consecutive`.
    pub fn new(max_consecutive: usize) -> Self {
        AutoReply {
            reply: String::new(),
            max_consecutive,
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    pub fn max_consecutive(&self) -> usize {
        self.max_consecutive
    }

    fn consecutive_replies(speaker: &str, transcript: &Transcript) -> usize {
        let mut count = 0;
        for message in transcript.iter().rev() {
            // the opening message is not an auto reply
            if message.sender != speaker || message.position == 0 {
                continue;
            }
            if message.content.execution().is_some() {
                break;
            }
            count += 1;
        }
        count
    }
}

impl Default for AutoReply {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AUTO_REPLIES)
    }
}

#[async_trait]
impl GenerationPolicy for AutoReply {
    async fn generate(
        &self,
        speaker: &str,
        transcript: &Transcript,
    ) -> Result<Generation, GenerationError> {
        if Self::consecutive_replies(speaker, transcript) >= self.max_consecutive {
            log::debug!(
                "AutoReply::generate(...): {} reached {} consecutive auto replies",
                speaker,
                self.max_consecutive
            );
            return Ok(Generation::Decline);
        }
        Ok(Generation::Reply(self.reply.clone()))
    }
}

/// Generation policy that asks a language model for the next contribution.
///
/// The transcript is replayed as chat messages: the speaker's own messages
/// as `assistant`, everybody else's as `user` prefixed with `[name]: `.
///
/// Backends are tried in order. A backend error or timeout moves on to the
/// next one; the last failure is returned when every backend failed.
#[derive(Clone)]
pub struct LlmPolicy {
    backends: Vec<(Arc<dyn ClientWrapper>, Duration)>,
    system_prompt: String,
}

impl LlmPolicy {
    pub fn new(client: Arc<dyn ClientWrapper>, system_prompt: impl Into<String>) -> Self {
        LlmPolicy {
            backends: vec![(client, Duration::from_secs(600))],
            system_prompt: system_prompt.into(),
        }
    }

    /// Build an [`OpenAIClient`] from a validated config and wrap it.
    pub fn from_config(config: &ModelConfig, system_prompt: impl Into<String>) -> Self {
        let client: Arc<dyn ClientWrapper> = Arc::new(OpenAIClient::from_config(config));
        LlmPolicy {
            backends: vec![(client, config.timeout)],
            system_prompt: system_prompt.into(),
        }
    }

    /// One backend per config, tried in list order.
    pub fn from_configs(
        configs: &[ModelConfig],
        system_prompt: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        if configs.is_empty() {
            return Err(ConfigError::NoModels);
        }
        let backends = configs
            .iter()
            .map(|config| {
                let client: Arc<dyn ClientWrapper> = Arc::new(OpenAIClient::from_config(config));
                (client, config.timeout)
            })
            .collect();
        Ok(LlmPolicy {
            backends,
            system_prompt: system_prompt.into(),
        })
    }

    /// Add a backend tried after the current ones fail.
    pub fn with_fallback(mut self, client: Arc<dyn ClientWrapper>, timeout: Duration) -> Self {
        self.backends.push((client, timeout));
        self
    }

    /// Apply `timeout` to every backend.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        for backend in self.backends.iter_mut() {
            backend.1 = timeout;
        }
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Model identifiers in fallback order.
    pub fn models(&self) -> Vec<&str> {
        self.backends.iter().map(|(c, _)| c.model_name()).collect()
    }

    /// Chat messages sent to the model for `speaker`'s turn.
    pub fn build_messages(&self, speaker: &str, transcript: &Transcript) -> Vec<Message> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(Message::new(Role::System, &self.system_prompt));
        for msg in transcript {
            if msg.sender == speaker {
                messages.push(Message::new(Role::Assistant, msg.text()));
            } else {
                messages.push(Message::new(
                    Role::User,
                    format!("[{}]: {}", msg.sender, msg.text()),
                ));
            }
        }
        messages
    }

    async fn ask(
        client: &dyn ClientWrapper,
        timeout: Duration,
        messages: &[Message],
    ) -> Result<Message, GenerationError> {
        match tokio::time::timeout(timeout, client.send_message(messages)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(GenerationError::Backend(e.to_string())),
            Err(_) => Err(GenerationError::Timeout(timeout)),
        }
    }
}

#[async_trait]
impl GenerationPolicy for LlmPolicy {
    async fn generate(
        &self,
        speaker: &str,
        transcript: &Transcript,
    ) -> Result<Generation, GenerationError> {
        let messages = self.build_messages(speaker, transcript);
        let mut last_error = None;

        for (client, timeout) in &self.backends {
            log::debug!(
                "LlmPolicy::generate(...): {} calling {} with {} messages",
                speaker,
                client.model_name(),
                messages.len()
            );

            let reply = match Self::ask(client.as_ref(), *timeout, &messages).await {
                Ok(reply) => reply,
                Err(e) => {
                    log::warn!(
                        "LlmPolicy::generate(...): {} on {} failed: {}",
                        speaker,
                        client.model_name(),
                        e
                    );
                    last_error = Some(e);
                    continue;
                }
            };

            if let Some(usage) = client.get_last_usage().await {
                log::debug!(
                    "LlmPolicy::generate(...): {} used {} tokens ({} in / {} out)",
                    speaker,
                    usage.total_tokens,
                    usage.input_tokens,
                    usage.output_tokens
                );
            }

            return if reply.content.trim().is_empty() {
                Ok(Generation::Decline)
            } else {
                Ok(Generation::Reply(reply.content.to_string()))
            };
        }

        Err(last_error
            .unwrap_or_else(|| GenerationError::Policy("no model backend configured".to_string())))
    }
}

/// A named member of a group chat.
#[derive(Clone)]
pub struct Participant {
    /// Unique within a conversation.
    pub name: String,
    pub role: ParticipantRole,
    /// Whether pending code is executed on this participant's turn.
    pub can_execute: bool,
    /// Free-form description, e.g. the system prompt summary shown in logs.
    pub description: Option<String>,
    policy: Arc<dyn GenerationPolicy>,
}

impl Participant {
    pub fn new(
        name: impl Into<String>,
        role: ParticipantRole,
        policy: Arc<dyn GenerationPolicy>,
    ) -> Self {
        Participant {
            name: name.into(),
            role,
            can_execute: false,
            description: None,
            policy,
        }
    }

    /// A participant that runs pending code and otherwise sends an empty
    /// auto reply, at most [`DEFAULT_MAX_AUTO_REPLIES`] times in a row.
    pub fn executor(name: impl Into<String>) -> Self {
        Self::executor_with_auto_replies(name, DEFAULT_MAX_AUTO_REPLIES)
    }

    /// Like [`Participant::executor`] with a custom auto reply cap. A cap of
    /// zero makes it decline whenever there is no code to run.
    pub fn executor_with_auto_replies(name: impl Into<String>, max_consecutive: usize) -> Self {
        Self::new(
            name,
            ParticipantRole::Executor,
            Arc::new(AutoReply::new(max_consecutive)),
        )
        .with_code_execution()
    }

    /// Allow this participant to execute pending code on its turn.
    pub fn with_code_execution(mut self) -> Self {
        self.can_execute = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn policy(&self) -> &Arc<dyn GenerationPolicy> {
        &self.policy
    }

    /// Ask this participant's policy for its next contribution.
    pub async fn generate(&self, transcript: &Transcript) -> Result<Generation, GenerationError> {
        self.policy.generate(&self.name, transcript).await
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("can_execute", &self.can_execute)
            .field("description", &self.description)
            .finish()
    }
}
