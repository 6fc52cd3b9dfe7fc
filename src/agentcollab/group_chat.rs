//! The turn-taking conversation loop.
//!
//! A [`GroupChat`] owns an ordered list of [`Participant`]s and drives
//! [`Conversation`]s between them. Each [`step`](GroupChat::step) picks the
//! next speaker, obtains exactly one contribution (generated text or the
//! result of running pending code), appends it to the transcript, advances the
//! round counter and checks whether the message ends the conversation.
//!
//! ```text
//! start ─▶ [message #0] ─▶ step ─▶ step ─▶ ... ─┬─▶ terminal message   ─▶ Terminated
//!                                               └─▶ round == max_rounds ─▶ Incomplete
//! ```
//!
//! Conversations are strictly sequential: the driver holds `&mut Conversation`
//! for the whole step and awaits one collaborator at a time.
//!
//! # Example
//!
//! ```rust
//! use agentcollab::config::ChatConfig;
//! use agentcollab::group_chat::{GroupChat, RunOutcome};
//! use agentcollab::participant::{Participant, ParticipantRole, ScriptedPolicy};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut chat = GroupChat::new(ChatConfig::default())?;
//! chat.add_participant(Participant::new(
//!     "Admin",
//!     ParticipantRole::Initiator,
//!     Arc::new(ScriptedPolicy::new(vec!["Thanks! TERMINATE"])),
//! ))?;
//! chat.add_participant(Participant::new(
//!     "Coder",
//!     ParticipantRole::Generator,
//!     Arc::new(ScriptedPolicy::new(vec!["```python\nprint('hi')\n```"])),
//! ))?;
//!
//! let (conversation, outcome) = chat.initiate_chat("Say hi in Python", "Admin").await?;
//! assert_eq!(outcome, RunOutcome::Terminated { rounds: 2 });
//! assert_eq!(conversation.transcript().len(), 3);
//! # Ok(())
//! # }
//! ```

use crate::agentcollab::config::{ChatConfig, ConfigError};
use crate::agentcollab::event::{ChatEvent, TranscriptEvent, TranscriptSink};
use crate::agentcollab::execution::{CodeBlock, CodeExecutor, ExecutionOutcome};
use crate::agentcollab::participant::{Generation, GenerationError, Participant};
use crate::agentcollab::speaker_selection::SpeakerSelector;
use crate::agentcollab::termination::TerminationPredicate;
use crate::agentcollab::transcript::{ChatMessage, MessageContent, Recipient, Transcript};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Errors that stop a group chat call.
///
/// None of them discard the transcript: whatever was appended before the
/// failure stays in the caller's [`Conversation`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationError {
    /// Every candidate declined, or nobody was eligible to speak.
    SpeakerSelection {
        last_speaker: String,
        reason: String,
    },
    /// A generation policy failed; nothing was appended for this step.
    Generation {
        speaker: String,
        source: GenerationError,
    },
    /// The named participant is not registered.
    UnknownParticipant(String),
    /// A participant with this name is already registered.
    DuplicateParticipant(String),
    /// The conversation already terminated or used up its round budget.
    ConversationFinished,
    InvalidConfiguration(ConfigError),
}

impl fmt::Display for ConversationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationError::SpeakerSelection {
                last_speaker,
                reason,
            } => write!(
                f,
                "No participant could speak after {} ({})",
                last_speaker, reason
            ),
            ConversationError::Generation { speaker, source } => {
                write!(f, "{} failed to generate a reply: {}", speaker, source)
            }
            ConversationError::UnknownParticipant(name) => {
                write!(f, "Unknown participant: {}", name)
            }
            ConversationError::DuplicateParticipant(name) => {
                write!(f, "Participant already registered: {}", name)
            }
            ConversationError::ConversationFinished => {
                write!(f, "Conversation has already finished")
            }
            ConversationError::InvalidConfiguration(e) => write!(f, "{}", e),
        }
    }
}

impl Error for ConversationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConversationError::Generation { source, .. } => Some(source),
            ConversationError::InvalidConfiguration(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for ConversationError {
    fn from(e: ConfigError) -> Self {
        ConversationError::InvalidConfiguration(e)
    }
}

/// Lifecycle state of a [`Conversation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Active,
    /// A terminal message was appended.
    Terminated,
}

/// How a [`GroupChat::run`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A message satisfied the termination predicate.
    Terminated { rounds: usize },
    /// The round budget ran out first. The transcript is complete up to that
    /// point and can be resumed with [`Conversation::extend_budget`].
    Incomplete { rounds: usize },
}

impl RunOutcome {
    pub fn rounds(&self) -> usize {
        match self {
            RunOutcome::Terminated { rounds } | RunOutcome::Incomplete { rounds } => *rounds,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, RunOutcome::Terminated { .. })
    }
}

/// One run of a group chat: its transcript, round counter and budget.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: String,
    transcript: Transcript,
    round: usize,
    max_rounds: usize,
    state: ConversationState,
}

impl Conversation {
    fn new(max_rounds: usize) -> Self {
        Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            transcript: Transcript::new(),
            round: 0,
            max_rounds,
            state: ConversationState::Active,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Contributions accepted after the opening message.
    pub fn round(&self) -> usize {
        self.round
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ConversationState::Terminated
    }

    /// Terminated, or out of rounds.
    pub fn is_finished(&self) -> bool {
        self.is_terminated() || self.round >= self.max_rounds
    }

    /// Grant `extra` more rounds. Has no effect on a terminated conversation.
    pub fn extend_budget(&mut self, extra: usize) {
        if self.is_terminated() {
            return;
        }
        self.max_rounds = self.max_rounds.saturating_add(extra);
    }
}

/// Drives conversations between a fixed set of participants.
pub struct GroupChat {
    config: ChatConfig,
    participants: Vec<Participant>,
    selector: SpeakerSelector,
    termination: TerminationPredicate,
    executor: Option<Arc<dyn CodeExecutor>>,
    sinks: Vec<Arc<dyn TranscriptSink>>,
}

impl GroupChat {
    /// Validate `config` and create an empty group chat.
    pub fn new(config: ChatConfig) -> Result<Self, ConversationError> {
        config.validate()?;
        Ok(GroupChat {
            selector: SpeakerSelector::new(
                config.speaker_selection,
                config.approval_phrases.clone(),
            ),
            termination: TerminationPredicate::new(config.sentinels.clone()),
            config,
            participants: Vec::new(),
            executor: None,
            sinks: Vec::new(),
        })
    }

    /// Register a participant. Registration order breaks selection ties.
    pub fn add_participant(&mut self, participant: Participant) -> Result<(), ConversationError> {
        if self.participant(&participant.name).is_some() {
            return Err(ConversationError::DuplicateParticipant(participant.name));
        }
        log::debug!(
            "GroupChat::add_participant(...): {} as {}",
            participant.name,
            participant.role
        );
        self.participants.push(participant);
        Ok(())
    }

    /// Forward every appended message and lifecycle event to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Run pending code on the turn of participants that can execute.
    pub fn with_executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, name: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.name == name)
    }

    pub fn termination(&self) -> &TerminationPredicate {
        &self.termination
    }

    /// Open a conversation with `initial_message` from `initiator`.
    ///
    /// The opening message is position 0 and does not count as a round. It
    /// is checked for termination like any other message.
    pub async fn start(
        &self,
        initial_message: impl Into<String>,
        initiator: &str,
    ) -> Result<Conversation, ConversationError> {
        if self.participant(initiator).is_none() {
            return Err(ConversationError::UnknownParticipant(initiator.to_string()));
        }

        let mut conversation = Conversation::new(self.config.max_rounds);
        self.emit_event(&ChatEvent::ConversationStarted {
            conversation_id: conversation.id.clone(),
            initiator: initiator.to_string(),
            participant_count: self.participants.len(),
            max_rounds: conversation.max_rounds,
        })
        .await;

        log::info!(
            "GroupChat::start(...): conversation {} opened by {} ({} participants, {} rounds)",
            conversation.id,
            initiator,
            self.participants.len(),
            conversation.max_rounds
        );

        self.accept(
            &mut conversation,
            initiator,
            MessageContent::text(initial_message),
        )
        .await;
        Ok(conversation)
    }

    /// Obtain and append exactly one contribution.
    pub async fn step<'c>(
        &self,
        conversation: &'c mut Conversation,
    ) -> Result<&'c ChatMessage, ConversationError> {
        if conversation.is_finished() {
            return Err(ConversationError::ConversationFinished);
        }

        let last_speaker = conversation
            .transcript
            .last()
            .map(|m| m.sender.clone())
            .unwrap_or_default();
        let candidates = self
            .selector
            .candidates(&self.participants, &conversation.transcript);
        let round = conversation.round + 1;

        log::debug!(
            "GroupChat::step(...): round {} after {}: {} candidates ({})",
            round,
            last_speaker,
            candidates.order.len(),
            candidates.reason
        );

        let mut contribution = None;
        for idx in candidates.order {
            let participant = &self.participants[idx];
            self.emit_event(&ChatEvent::SpeakerSelected {
                conversation_id: conversation.id.clone(),
                round,
                speaker: participant.name.clone(),
                reason: candidates.reason.clone(),
            })
            .await;

            if let Some(outcome) = self.try_execute(conversation, participant).await {
                contribution = Some((idx, MessageContent::Execution { outcome }));
                break;
            }

            match participant.generate(&conversation.transcript).await {
                Ok(Generation::Reply(text)) => {
                    contribution = Some((idx, MessageContent::text(text)));
                    break;
                }
                Ok(Generation::Decline) => {
                    log::debug!("GroupChat::step(...): {} declined", participant.name);
                    self.emit_event(&ChatEvent::SpeakerDeclined {
                        conversation_id: conversation.id.clone(),
                        speaker: participant.name.clone(),
                    })
                    .await;
                }
                Err(e) => {
                    log::error!(
                        "GroupChat::step(...): {} failed in round {}: {}",
                        participant.name,
                        round,
                        e
                    );
                    self.emit_event(&ChatEvent::GenerationFailed {
                        conversation_id: conversation.id.clone(),
                        speaker: participant.name.clone(),
                        error: e.to_string(),
                    })
                    .await;
                    return Err(ConversationError::Generation {
                        speaker: participant.name.clone(),
                        source: e,
                    });
                }
            }
        }

        let (idx, content) = match contribution {
            Some(found) => found,
            None => {
                log::warn!(
                    "GroupChat::step(...): nobody spoke after {} ({})",
                    last_speaker,
                    candidates.reason
                );
                return Err(ConversationError::SpeakerSelection {
                    last_speaker,
                    reason: candidates.reason,
                });
            }
        };

        let position = self
            .accept(conversation, &self.participants[idx].name, content)
            .await;
        Ok(&conversation.transcript[position])
    }

    /// Step until a terminal message or the round budget is reached.
    ///
    /// Running an already terminated conversation returns
    /// [`RunOutcome::Terminated`] without stepping.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
    ) -> Result<RunOutcome, ConversationError> {
        loop {
            if conversation.is_terminated() {
                let outcome = RunOutcome::Terminated {
                    rounds: conversation.round,
                };
                return Ok(self.finish(conversation, outcome).await);
            }
            if conversation.round >= conversation.max_rounds {
                log::warn!(
                    "GroupChat::run(...): conversation {} ran out of rounds ({})",
                    conversation.id,
                    conversation.max_rounds
                );
                let outcome = RunOutcome::Incomplete {
                    rounds: conversation.round,
                };
                return Ok(self.finish(conversation, outcome).await);
            }
            self.step(conversation).await?;
        }
    }

    /// `start` followed by `run`.
    pub async fn initiate_chat(
        &self,
        message: impl Into<String>,
        initiator: &str,
    ) -> Result<(Conversation, RunOutcome), ConversationError> {
        let mut conversation = self.start(message, initiator).await?;
        let outcome = self.run(&mut conversation).await?;
        Ok((conversation, outcome))
    }

    /// Run pending code if `participant` may execute it and an executor is set.
    async fn try_execute(
        &self,
        conversation: &Conversation,
        participant: &Participant,
    ) -> Option<ExecutionOutcome> {
        if !participant.can_execute {
            return None;
        }
        let executor = self.executor.as_ref()?;
        let (position, blocks) = conversation.transcript.pending_code()?;

        log::info!(
            "GroupChat::step(...): {} executing {} code block(s) from message #{}",
            participant.name,
            blocks.len(),
            position
        );

        let outcome = self.execute_blocks(executor.as_ref(), &blocks).await;
        self.emit_event(&ChatEvent::CodeExecuted {
            conversation_id: conversation.id.clone(),
            speaker: participant.name.clone(),
            blocks: blocks.len(),
            exit_code: outcome.exit_code,
        })
        .await;
        Some(outcome)
    }

    /// Run blocks in order, stopping after the first failure, and fold the
    /// results into one outcome.
    async fn execute_blocks(
        &self,
        executor: &dyn CodeExecutor,
        blocks: &[CodeBlock],
    ) -> ExecutionOutcome {
        let mut combined: Option<ExecutionOutcome> = None;
        for block in blocks {
            let outcome = match executor.execute(block, &self.config.work_dir).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::warn!(
                        "GroupChat::execute_blocks(...): {} block could not run: {}",
                        block.language,
                        e
                    );
                    ExecutionOutcome::from_error(block, &e)
                }
            };
            let failed = !outcome.succeeded();
            combined = Some(match combined {
                None => outcome,
                Some(mut acc) => {
                    acc.stdout.push_str(&outcome.stdout);
                    acc.stderr.push_str(&outcome.stderr);
                    acc.exit_code = outcome.exit_code;
                    acc.file_name = outcome.file_name;
                    acc.duration_ms += outcome.duration_ms;
                    acc
                }
            });
            if failed {
                break;
            }
        }
        combined.unwrap_or_else(|| ExecutionOutcome::failed("", 1, "no code to execute"))
    }

    /// Append `content` from `sender`, advance the round and notify sinks.
    /// Returns the new message's position.
    async fn accept(
        &self,
        conversation: &mut Conversation,
        sender: &str,
        content: MessageContent,
    ) -> usize {
        let terminal = self.termination.is_terminal(&content);
        let recipient = self.recipient_for(sender);
        let position = conversation
            .transcript
            .append(sender, recipient, content, terminal)
            .position;

        // the opening message is not a round
        if position > 0 {
            conversation.round += 1;
        }
        if terminal {
            conversation.state = ConversationState::Terminated;
        }

        let message = &conversation.transcript[position];
        log::info!(
            "GroupChat: #{} {} -> {} (round {}{})",
            position,
            message.sender,
            message.recipient,
            conversation.round,
            if terminal { ", terminal" } else { "" }
        );

        let event = TranscriptEvent::from_message(&conversation.id, message);
        for sink in &self.sinks {
            sink.on_message(&event).await;
        }
        position
    }

    /// With exactly two participants messages go to the other one.
    fn recipient_for(&self, sender: &str) -> Recipient {
        if self.participants.len() == 2 {
            if let Some(other) = self.participants.iter().find(|p| p.name != sender) {
                return Recipient::Participant(other.name.clone());
            }
        }
        Recipient::All
    }

    async fn finish(&self, conversation: &Conversation, outcome: RunOutcome) -> RunOutcome {
        self.emit_event(&ChatEvent::ConversationFinished {
            conversation_id: conversation.id.clone(),
            rounds: outcome.rounds(),
            terminated: outcome.is_terminated(),
        })
        .await;
        outcome
    }

    async fn emit_event(&self, event: &ChatEvent) {
        for sink in &self.sinks {
            sink.on_chat_event(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentcollab::event::ChatHistory;
    use crate::agentcollab::execution::ExecutionError;
    use crate::agentcollab::participant::{ParticipantRole, ScriptedPolicy};
    use async_trait::async_trait;
    use std::path::Path;
    use tokio::sync::Mutex;

    fn scripted(name: &str, role: ParticipantRole, replies: Vec<&str>) -> Participant {
        Participant::new(name, role, Arc::new(ScriptedPolicy::new(replies)))
    }

    /// Records the blocks it was asked to run and replays canned outcomes.
    struct FakeExecutor {
        ran: Mutex<Vec<String>>,
        exit_codes: Vec<i32>,
    }

    #[async_trait]
    impl CodeExecutor for FakeExecutor {
        async fn execute(
            &self,
            block: &CodeBlock,
            _work_dir: &Path,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            let mut ran = self.ran.lock().await;
            let code = self.exit_codes.get(ran.len()).copied().unwrap_or(0);
            ran.push(block.code.clone());
            let mut outcome = ExecutionOutcome::failed(block.language.clone(), code, "");
            outcome.stdout = format!("ran {}\n", block.code);
            Ok(outcome)
        }
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_initiator() {
        let mut chat = GroupChat::new(ChatConfig::default()).unwrap();
        chat.add_participant(scripted("Admin", ParticipantRole::Initiator, vec![]))
            .unwrap();
        let err = chat.start("hello", "Nobody").await.unwrap_err();
        assert_eq!(err, ConversationError::UnknownParticipant("Nobody".into()));
    }

    #[test]
    fn test_duplicate_participant_rejected() {
        let mut chat = GroupChat::new(ChatConfig::default()).unwrap();
        chat.add_participant(scripted("Coder", ParticipantRole::Generator, vec![]))
            .unwrap();
        let err = chat
            .add_participant(scripted("Coder", ParticipantRole::Critic, vec![]))
            .unwrap_err();
        assert_eq!(err, ConversationError::DuplicateParticipant("Coder".into()));
        assert_eq!(chat.participants().len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ChatConfig::default().with_sentinels(Vec::<String>::new());
        assert!(matches!(
            GroupChat::new(config),
            Err(ConversationError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_two_party_messages_are_addressed_directly() {
        let mut chat = GroupChat::new(ChatConfig::default()).unwrap();
        chat.add_participant(scripted("Admin", ParticipantRole::Initiator, vec![]))
            .unwrap();
        chat.add_participant(scripted("Coder", ParticipantRole::Generator, vec!["done"]))
            .unwrap();

        let mut conversation = chat.start("write X", "Admin").await.unwrap();
        let reply = chat.step(&mut conversation).await.unwrap();
        assert_eq!(reply.recipient, Recipient::Participant("Admin".into()));
        assert_eq!(
            conversation.transcript()[0].recipient,
            Recipient::Participant("Coder".into())
        );
    }

    #[tokio::test]
    async fn test_executing_participant_runs_pending_code_in_order() {
        let executor = Arc::new(FakeExecutor {
            ran: Mutex::new(Vec::new()),
            exit_codes: vec![0, 0],
        });
        let mut chat = GroupChat::new(ChatConfig::default())
            .unwrap()
            .with_executor(executor.clone());
        chat.add_participant(
            scripted("Admin", ParticipantRole::Initiator, vec![]).with_code_execution(),
        )
        .unwrap();
        chat.add_participant(scripted(
            "Coder",
            ParticipantRole::Generator,
            vec!["```python\nprint(1)\n```\n```sh\necho 2\n```"],
        ))
        .unwrap();

        let mut conversation = chat.start("write X", "Admin").await.unwrap();
        chat.step(&mut conversation).await.unwrap();
        let result = chat.step(&mut conversation).await.unwrap();

        assert_eq!(result.sender, "Admin");
        let outcome = result.content.execution().unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.stdout, "ran print(1)\nran echo 2\n");
        assert_eq!(*executor.ran.lock().await, vec!["print(1)", "echo 2"]);
        assert!(conversation.transcript().pending_code().is_none());
    }

    #[tokio::test]
    async fn test_execution_stops_after_first_failure() {
        let executor = Arc::new(FakeExecutor {
            ran: Mutex::new(Vec::new()),
            exit_codes: vec![1, 0],
        });
        let chat = GroupChat::new(ChatConfig::default())
            .unwrap()
            .with_executor(executor.clone());
        let blocks = vec![CodeBlock::new("python", "boom"), CodeBlock::new("sh", "true")];

        let outcome = chat.execute_blocks(executor.as_ref(), &blocks).await;
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(executor.ran.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_events_reach_sinks() {
        let history = Arc::new(ChatHistory::new());
        let mut chat = GroupChat::new(ChatConfig::default())
            .unwrap()
            .with_sink(history.clone());
        chat.add_participant(scripted("Admin", ParticipantRole::Initiator, vec![]))
            .unwrap();
        chat.add_participant(scripted(
            "Coder",
            ParticipantRole::Generator,
            vec!["done TERMINATE"],
        ))
        .unwrap();

        let (_, outcome) = chat.initiate_chat("write X", "Admin").await.unwrap();
        assert_eq!(outcome, RunOutcome::Terminated { rounds: 1 });
        let entries = history.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].message, "done TERMINATE");
    }

    #[tokio::test]
    async fn test_extend_budget_resumes_incomplete_run() {
        let mut chat = GroupChat::new(ChatConfig::default().with_max_rounds(1)).unwrap();
        chat.add_participant(scripted("Admin", ParticipantRole::Initiator, vec!["TERMINATE"]))
            .unwrap();
        chat.add_participant(scripted("Coder", ParticipantRole::Generator, vec!["v1"]))
            .unwrap();

        let mut conversation = chat.start("write X", "Admin").await.unwrap();
        let outcome = chat.run(&mut conversation).await.unwrap();
        assert_eq!(outcome, RunOutcome::Incomplete { rounds: 1 });
        assert_eq!(
            chat.step(&mut conversation).await.unwrap_err(),
            ConversationError::ConversationFinished
        );

        conversation.extend_budget(1);
        let outcome = chat.run(&mut conversation).await.unwrap();
        assert_eq!(outcome, RunOutcome::Terminated { rounds: 2 });
        assert_eq!(conversation.state(), ConversationState::Terminated);
    }
}
