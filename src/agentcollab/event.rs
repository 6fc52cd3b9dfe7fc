//! Transcript sinks and chat events.
//!
//! Provides a callback-based observability layer for group chats. Implement
//! [`TranscriptSink`] to receive:
//!
//! - **Appended messages**: every message added to the transcript, in order,
//!   as a [`TranscriptEvent`] with the content already rendered to a string
//! - **Loop lifecycle**: conversation start/finish, speaker selection,
//!   declines, code executions and generation failures as [`ChatEvent`]s
//!
//! Both methods have default no-op implementations, so you only override what
//! you care about. Sinks are passed to the group chat at construction time
//! via [`with_sink`](crate::group_chat::GroupChat::with_sink); the chat pushes
//! events and each sink owns its own storage.
//!
//! # Architecture
//!
//! ```text
//! GroupChat (loop driver)
//!   ├─ LogSink            ─▶ log::info! per message (console logger)
//!   ├─ ChatHistory        ─▶ in-memory list polled by a UI
//!   └─ JsonlTranscriptLog ─▶ one JSON object per line on disk
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use agentcollab::event::{ChatEvent, TranscriptEvent, TranscriptSink};
//! use async_trait::async_trait;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl TranscriptSink for Printer {
//!     async fn on_message(&self, event: &TranscriptEvent) {
//!         println!("{} -> {}: {}", event.sender, event.recipient, event.content);
//!     }
//!     async fn on_chat_event(&self, event: &ChatEvent) {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

use crate::agentcollab::transcript::ChatMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// A message appended to a transcript, in the form sinks consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub conversation_id: String,
    pub position: usize,
    pub sender: String,
    /// Recipient name or `"all"`.
    pub recipient: String,
    /// Deterministic string form of the content, including execution results.
    pub content: String,
    pub terminal: bool,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEvent {
    pub fn from_message(conversation_id: &str, message: &ChatMessage) -> Self {
        TranscriptEvent {
            conversation_id: conversation_id.to_string(),
            position: message.position,
            sender: message.sender.clone(),
            recipient: message.recipient.to_string(),
            content: message.text(),
            terminal: message.terminal,
            timestamp: message.timestamp,
        }
    }
}

/// Lifecycle events emitted by the group chat loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// `start` accepted the opening message.
    ConversationStarted {
        conversation_id: String,
        initiator: String,
        participant_count: usize,
        max_rounds: usize,
    },

    /// A candidate was asked to speak.
    SpeakerSelected {
        conversation_id: String,
        /// Round the contribution would occupy (1-based).
        round: usize,
        speaker: String,
        /// Human-readable explanation (e.g. `"Critic approved"`).
        reason: String,
    },

    /// A candidate declined its turn; the next one is asked.
    SpeakerDeclined {
        conversation_id: String,
        speaker: String,
    },

    /// Pending code was run on behalf of `speaker`.
    CodeExecuted {
        conversation_id: String,
        speaker: String,
        blocks: usize,
        exit_code: i32,
    },

    /// A generation policy failed. The step was aborted and nothing appended.
    GenerationFailed {
        conversation_id: String,
        speaker: String,
        error: String,
    },

    /// `run` returned.
    ConversationFinished {
        conversation_id: String,
        rounds: usize,
        /// `true` when a terminal message ended the conversation, `false`
        /// when the round budget ran out.
        terminated: bool,
    },
}

/// Receives transcript appends and chat lifecycle events.
///
/// The `Send + Sync` bound allows sinks to be shared via
/// `Arc<dyn TranscriptSink>`. Use interior synchronisation for any state.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    /// Called once per appended message, in transcript order.
    async fn on_message(&self, _event: &TranscriptEvent) {}

    /// Called for loop lifecycle events.
    async fn on_chat_event(&self, _event: &ChatEvent) {}
}

/// Mirrors every message to the `log` facade.
pub struct LogSink;

#[async_trait]
impl TranscriptSink for LogSink {
    async fn on_message(&self, event: &TranscriptEvent) {
        log::info!(
            "--- MESSAGE #{} ---\nSENDER: {}\nRECIPIENT: {}\nCONTENT:\n{}",
            event.position,
            event.sender,
            event.recipient,
            event.content
        );
    }

    async fn on_chat_event(&self, event: &ChatEvent) {
        match event {
            ChatEvent::GenerationFailed { speaker, error, .. } => {
                log::warn!("{} failed to generate: {}", speaker, error);
            }
            ChatEvent::ConversationFinished {
                rounds, terminated, ..
            } => {
                log::info!(
                    "Conversation finished after {} rounds (terminated: {})",
                    rounds,
                    terminated
                );
            }
            other => log::debug!("{:?}", other),
        }
    }
}

/// One displayed line of a [`ChatHistory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender: String,
    pub recipient: String,
    pub message: String,
}

/// In-memory chat log a UI can poll while a conversation runs.
///
/// ```rust
/// use agentcollab::event::ChatHistory;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let history = ChatHistory::new();
/// assert!(history.entries().await.is_empty());
/// # }
/// ```
#[derive(Default)]
pub struct ChatHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl ChatHistory {
    pub fn new() -> Self {
        ChatHistory {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the entries recorded so far.
    pub async fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[async_trait]
impl TranscriptSink for ChatHistory {
    async fn on_message(&self, event: &TranscriptEvent) {
        self.entries.lock().await.push(HistoryEntry {
            sender: event.sender.clone(),
            recipient: event.recipient.clone(),
            message: event.content.clone(),
        });
    }
}

/// Persists a conversation as newline-delimited JSON, one
/// [`TranscriptEvent`] per line, append-only.
///
/// Writes go through `tokio::fs` so a slow disk does not stall the runtime
/// thread driving the conversation. Each line is written and flushed while
/// holding the file lock, so lines from concurrent chats never interleave.
pub struct JsonlTranscriptLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlTranscriptLog {
    /// Open (or create) `path` for appending. Parent directories are created.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(JsonlTranscriptLog {
            path,
            file: Mutex::new(File::from_std(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every event stored at `path`.
    pub fn read_all(path: impl AsRef<Path>) -> io::Result<Vec<TranscriptEvent>> {
        let data = fs::read_to_string(path)?;
        data.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            })
            .collect()
    }
}

#[async_trait]
impl TranscriptSink for JsonlTranscriptLog {
    async fn on_message(&self, event: &TranscriptEvent) {
        let mut line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                log::error!("JsonlTranscriptLog: cannot serialize message: {}", e);
                return;
            }
        };
        line.push('\n');
        let mut file = self.file.lock().await;
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            log::error!(
                "JsonlTranscriptLog: cannot write to {}: {}",
                self.path.display(),
                e
            );
        }
    }
}
