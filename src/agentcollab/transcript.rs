//! The shared, append-only record of a conversation.
//!
//! A [`Transcript`] is the only mutable state a group chat shares between its
//! participants. Participants and sinks read it; only the loop driver in
//! [`group_chat`](crate::group_chat) appends to it, and nothing ever edits or
//! removes a [`ChatMessage`] once it is there.

use crate::agentcollab::execution::{extract_code_blocks, CodeBlock, ExecutionOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;
use std::slice::Iter;

/// Who a message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    /// Broadcast to every participant of the group chat.
    All,
    /// Addressed to a single named participant.
    Participant(String),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::All => write!(f, "all"),
            Recipient::Participant(name) => write!(f, "{}", name),
        }
    }
}

/// Body of a message: plain text (possibly with code blocks) or a structured
/// execution result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    Execution { outcome: ExecutionOutcome },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }

    /// Deterministic string form used for termination checks, sinks and
    /// prompts.
    pub fn render(&self) -> String {
        match self {
            MessageContent::Text { text } => text.clone(),
            MessageContent::Execution { outcome } => outcome.render(),
        }
    }

    /// Fenced code blocks in a text body. Execution results carry none.
    pub fn code_blocks(&self) -> Vec<CodeBlock> {
        match self {
            MessageContent::Text { text } => extract_code_blocks(text),
            MessageContent::Execution { .. } => Vec::new(),
        }
    }

    pub fn execution(&self) -> Option<&ExecutionOutcome> {
        match self {
            MessageContent::Execution { outcome } => Some(outcome),
            MessageContent::Text { .. } => None,
        }
    }
}

/// One accepted contribution to a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Zero-based position in the transcript.
    pub position: usize,
    /// Name of the participant that authored the message.
    pub sender: String,
    pub recipient: Recipient,
    pub content: MessageContent,
    /// Whether the content satisfied the termination predicate.
    pub terminal: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Shorthand for `self.content.render()`.
    pub fn text(&self) -> String {
        self.content.render()
    }
}

/// Append-only ordered sequence of [`ChatMessage`]s.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Transcript {
            messages: Vec::new(),
        }
    }

    /// Append a message at the next position and return a reference to it.
    ///
    /// Only the loop driver calls this.
    pub(crate) fn append(
        &mut self,
        sender: impl Into<String>,
        recipient: Recipient,
        content: MessageContent,
        terminal: bool,
    ) -> &ChatMessage {
        let position = self.messages.len();
        self.messages.push(ChatMessage {
            position,
            sender: sender.into(),
            recipient,
            content,
            terminal,
            timestamp: Utc::now(),
        });
        &self.messages[position]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn get(&self, position: usize) -> Option<&ChatMessage> {
        self.messages.get(position)
    }

    pub fn iter(&self) -> Iter<'_, ChatMessage> {
        self.messages.iter()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Code blocks that have not been executed yet.
    ///
    /// Scans backwards from the newest message and stops at the first
    /// execution result: blocks from the most recent text message that
    /// carries any are pending.
    pub fn pending_code(&self) -> Option<(usize, Vec<CodeBlock>)> {
        for message in self.messages.iter().rev() {
            if message.content.execution().is_some() {
                return None;
            }
            let blocks = message.content.code_blocks();
            if !blocks.is_empty() {
                return Some((message.position, blocks));
            }
        }
        None
    }
}

impl Index<usize> for Transcript {
    type Output = ChatMessage;

    fn index(&self, position: usize) -> &ChatMessage {
        &self.messages[position]
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a ChatMessage;
    type IntoIter = Iter<'a, ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
