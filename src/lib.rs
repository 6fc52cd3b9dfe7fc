//! # agentcollab
//!
//! agentcollab runs turn-taking conversations between role-specialised agents that
//! collaborate on a coding task: an initiator states the task, a generator writes code, a
//! critic reviews it, a verifier writes tests, and an executor runs whatever code the
//! conversation settles on. The loop ends when a message ends with a termination sentinel
//! (`TERMINATE` by default) or when the round budget runs out.
//!
//! The crate provides:
//!
//! * **Loop driver**: [`GroupChat`] selects speakers, appends one contribution per round to
//!   an append-only [`transcript::Transcript`] and evaluates the
//!   [`termination::TerminationPredicate`] after every message
//! * **Participants**: [`participant::Participant`] pairs a name and a
//!   [`participant::ParticipantRole`] with a [`participant::GenerationPolicy`]; LLM-backed
//!   policies talk to any OpenAI-compatible endpoint through [`ClientWrapper`]
//! * **Speaker selection**: [`speaker_selection::SpeakerSelection::Auto`] follows the
//!   review workflow (initiator, generator, critic, executor); `RoundRobin` rotates in
//!   registration order
//! * **Code execution**: [`execution::LocalCodeExecutor`] runs fenced Python and shell
//!   blocks in a working directory with a timeout
//! * **Sinks**: [`event::TranscriptSink`] receives every appended message; the crate ships a
//!   log sink, an in-memory history and a JSONL transcript file
//! * **Presets**: [`team`] builds the Admin / Coder / Reviewer / Test_Engineer team
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use agentcollab::config::ModelConfig;
//! use agentcollab::event::LogSink;
//! use agentcollab::team::{code_review_team, TeamKind, ADMIN};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     agentcollab::init_logger();
//!
//!     // gpt-4 first, gpt-3.5-turbo when it fails or times out
//!     let models = ModelConfig::list_from_env(&["gpt-4", "gpt-3.5-turbo"])?;
//!     let team = code_review_team(&models, TeamKind::Review, "coding")?
//!         .with_sink(Arc::new(LogSink));
//!
//!     let (conversation, outcome) = team
//!         .initiate_chat("Write a function that returns the first 10 primes.", ADMIN)
//!         .await?;
//!
//!     println!("{:?} after {} messages", outcome, conversation.transcript().len());
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding agentcollab can opt in to `RUST_LOG` driven diagnostics without
/// choosing a logging backend upfront.
///
/// ```rust
/// agentcollab::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `agentcollab` module.
pub mod agentcollab;

// Re-exporting key items for easier external access.
pub use agentcollab::client_wrapper;
pub use agentcollab::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
pub use agentcollab::clients;
pub use agentcollab::config;
pub use agentcollab::config::{ChatConfig, ConfigError, ModelConfig};
pub use agentcollab::event;
pub use agentcollab::event::{ChatEvent, TranscriptEvent, TranscriptSink};
pub use agentcollab::execution;
pub use agentcollab::group_chat;
pub use agentcollab::group_chat::{
    Conversation, ConversationError, ConversationState, GroupChat, RunOutcome,
};
pub use agentcollab::http_client_pool;
pub use agentcollab::participant;
pub use agentcollab::participant::{
    Generation, GenerationError, GenerationPolicy, Participant, ParticipantRole,
};
pub use agentcollab::speaker_selection;
pub use agentcollab::team;
pub use agentcollab::termination;
pub use agentcollab::transcript;
pub use agentcollab::transcript::{ChatMessage, Recipient, Transcript};
