use agentcollab::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
use agentcollab::config::ChatConfig;
use agentcollab::event::{ChatEvent, ChatHistory, JsonlTranscriptLog, TranscriptEvent, TranscriptSink};
use agentcollab::execution::LocalCodeExecutor;
use agentcollab::group_chat::{ConversationError, ConversationState, GroupChat, RunOutcome};
use agentcollab::participant::{
    FnPolicy, Generation, GenerationError, LlmPolicy, Participant, ParticipantRole,
    ScriptedPolicy,
};
use agentcollab::speaker_selection::SpeakerSelection;
use agentcollab::transcript::{Recipient, Transcript};
use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn scripted(name: &str, role: ParticipantRole, replies: Vec<&str>) -> Participant {
    Participant::new(name, role, Arc::new(ScriptedPolicy::new(replies)))
}

fn three_agent_chat(config: ChatConfig, coder: Participant) -> GroupChat {
    let mut chat = GroupChat::new(config).unwrap();
    chat.add_participant(scripted("Admin", ParticipantRole::Initiator, vec!["TERMINATE"]))
        .unwrap();
    chat.add_participant(coder).unwrap();
    chat.add_participant(scripted("Reviewer", ParticipantRole::Critic, vec!["Looks good!"]))
        .unwrap();
    chat
}

/// Collects lifecycle events for assertions.
#[derive(Default)]
struct EventRecorder {
    events: Mutex<Vec<ChatEvent>>,
    messages: Mutex<Vec<TranscriptEvent>>,
}

#[async_trait]
impl TranscriptSink for EventRecorder {
    async fn on_message(&self, event: &TranscriptEvent) {
        self.messages.lock().await.push(event.clone());
    }

    async fn on_chat_event(&self, event: &ChatEvent) {
        self.events.lock().await.push(event.clone());
    }
}

#[tokio::test]
async fn test_review_workflow_terminates_on_sentinel() {
    let recorder = Arc::new(EventRecorder::default());
    let chat = three_agent_chat(
        ChatConfig::default(),
        scripted(
            "Coder",
            ParticipantRole::Generator,
            vec!["```python\ndef x():\n    return 1\n```"],
        ),
    )
    .with_sink(recorder.clone());

    let (conversation, outcome) = chat.initiate_chat("write X", "Admin").await.unwrap();

    assert_eq!(outcome, RunOutcome::Terminated { rounds: 3 });
    assert_eq!(conversation.transcript().len(), 4);
    assert_eq!(conversation.state(), ConversationState::Terminated);

    let senders: Vec<&str> = conversation
        .transcript()
        .iter()
        .map(|m| m.sender.as_str())
        .collect();
    assert_eq!(senders, vec!["Admin", "Coder", "Reviewer", "Admin"]);
    assert!(conversation.transcript()[3].terminal);
    assert!(conversation.transcript().iter().take(3).all(|m| !m.terminal));

    // the sink saw every message exactly once, in order
    let messages = recorder.messages.lock().await;
    let positions: Vec<usize> = messages.iter().map(|m| m.position).collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);

    let events = recorder.events.lock().await;
    assert!(matches!(events.first(), Some(ChatEvent::ConversationStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(ChatEvent::ConversationFinished {
            rounds: 3,
            terminated: true,
            ..
        })
    ));
}

#[tokio::test]
async fn test_coder_terminates_after_review_approval() {
    let mut chat = GroupChat::new(ChatConfig::default()).unwrap();
    chat.add_participant(scripted("Admin", ParticipantRole::Initiator, vec![]))
        .unwrap();
    chat.add_participant(scripted(
        "Coder",
        ParticipantRole::Generator,
        vec!["```python\ndef x():\n    return 1\n```", "TERMINATE"],
    ))
    .unwrap();
    chat.add_participant(scripted("Reviewer", ParticipantRole::Critic, vec!["Looks good!"]))
        .unwrap();

    let (conversation, outcome) = chat.initiate_chat("write X", "Admin").await.unwrap();

    assert_eq!(outcome, RunOutcome::Terminated { rounds: 3 });
    assert_eq!(conversation.transcript().len(), 4);
    let last = conversation.transcript().last().unwrap();
    assert_eq!(last.sender, "Coder");
    assert!(last.terminal);
}

#[tokio::test]
async fn test_generation_failure_leaves_transcript_untouched() {
    let coder = Participant::new(
        "Coder",
        ParticipantRole::Generator,
        Arc::new(ScriptedPolicy::from_results(vec![Err(
            GenerationError::Backend("connection refused".to_string()),
        )])),
    );
    let chat = three_agent_chat(ChatConfig::default(), coder);

    let mut conversation = chat.start("write X", "Admin").await.unwrap();
    let err = chat.run(&mut conversation).await.unwrap_err();

    match err {
        ConversationError::Generation { speaker, source } => {
            assert_eq!(speaker, "Coder");
            assert_eq!(source, GenerationError::Backend("connection refused".to_string()));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(conversation.transcript().len(), 1);
    assert_eq!(conversation.round(), 0);
}

#[tokio::test]
async fn test_zero_round_budget() {
    let coder = scripted("Coder", ParticipantRole::Generator, vec!["code"]);
    let chat = three_agent_chat(ChatConfig::default().with_max_rounds(0), coder);

    let (conversation, outcome) = chat.initiate_chat("write X", "Admin").await.unwrap();
    assert_eq!(outcome, RunOutcome::Incomplete { rounds: 0 });
    assert_eq!(conversation.transcript().len(), 1);

    // a terminal opening message still wins
    let (conversation, outcome) = chat.initiate_chat("never mind. TERMINATE", "Admin").await.unwrap();
    assert_eq!(outcome, RunOutcome::Terminated { rounds: 0 });
    assert!(conversation.transcript()[0].terminal);
}

#[tokio::test]
async fn test_budget_exhaustion_returns_incomplete() {
    let talker = |name: &str, role| {
        Participant::new(
            name,
            role,
            Arc::new(FnPolicy::new(Arc::new(
                |speaker: &str, transcript: &Transcript| -> Result<Generation, GenerationError> {
                    Ok(Generation::Reply(format!(
                        "{} speaking at #{}",
                        speaker,
                        transcript.len()
                    )))
                },
            ))),
        )
    };
    let mut chat = GroupChat::new(ChatConfig::default().with_max_rounds(7)).unwrap();
    chat.add_participant(talker("Admin", ParticipantRole::Initiator)).unwrap();
    chat.add_participant(talker("Coder", ParticipantRole::Generator)).unwrap();
    chat.add_participant(talker("Reviewer", ParticipantRole::Critic)).unwrap();

    let (conversation, outcome) = chat.initiate_chat("go", "Admin").await.unwrap();

    assert_eq!(outcome, RunOutcome::Incomplete { rounds: 7 });
    assert_eq!(conversation.transcript().len(), conversation.round() + 1);
    let messages = conversation.transcript().messages();
    for pair in messages.windows(2) {
        assert_ne!(pair[0].sender, pair[1].sender);
    }
    for (i, message) in messages.iter().enumerate() {
        assert_eq!(message.position, i);
    }
}

#[tokio::test]
async fn test_round_robin_rotation() {
    let config = ChatConfig::default()
        .with_max_rounds(4)
        .with_speaker_selection(SpeakerSelection::RoundRobin);
    let mut chat = GroupChat::new(config).unwrap();
    chat.add_participant(scripted("A", ParticipantRole::Initiator, vec!["a1"])).unwrap();
    chat.add_participant(scripted("B", ParticipantRole::Critic, vec!["b1", "b2"])).unwrap();
    chat.add_participant(scripted("C", ParticipantRole::Generator, vec!["c1", "c2"])).unwrap();

    let (conversation, _) = chat.initiate_chat("start", "A").await.unwrap();
    let senders: Vec<&str> = conversation
        .transcript()
        .iter()
        .map(|m| m.sender.as_str())
        .collect();
    assert_eq!(senders, vec!["A", "B", "C", "A", "B"]);
}

#[tokio::test]
async fn test_everyone_declining_is_a_selection_error() {
    let mut chat = GroupChat::new(ChatConfig::default()).unwrap();
    chat.add_participant(scripted("Admin", ParticipantRole::Initiator, vec![]))
        .unwrap();
    chat.add_participant(scripted("Coder", ParticipantRole::Generator, vec![]))
        .unwrap();
    chat.add_participant(scripted("Reviewer", ParticipantRole::Critic, vec![]))
        .unwrap();
    let mut conversation = chat.start("write X", "Admin").await.unwrap();

    let err = chat.step(&mut conversation).await.unwrap_err();
    match err {
        ConversationError::SpeakerSelection { last_speaker, .. } => {
            assert_eq!(last_speaker, "Admin")
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(conversation.transcript().len(), 1);
    assert_eq!(conversation.round(), 0);
}

#[tokio::test]
async fn test_single_participant_cannot_continue() {
    let mut chat = GroupChat::new(ChatConfig::default()).unwrap();
    chat.add_participant(scripted("Admin", ParticipantRole::Initiator, vec!["more"]))
        .unwrap();
    let mut conversation = chat.start("hello", "Admin").await.unwrap();
    assert!(matches!(
        chat.step(&mut conversation).await,
        Err(ConversationError::SpeakerSelection { .. })
    ));
}

#[tokio::test]
async fn test_executor_runs_code_and_reports_back() {
    let dir = tempfile::tempdir().unwrap();
    let config = ChatConfig::default()
        .with_max_rounds(6)
        .with_work_dir(dir.path());
    let mut chat = GroupChat::new(config)
        .unwrap()
        .with_executor(Arc::new(LocalCodeExecutor::new().with_timeout(30)));
    chat.add_participant(Participant::executor("Executor")).unwrap();
    chat.add_participant(scripted(
        "Coder",
        ParticipantRole::Generator,
        vec![
            "```sh\n# filename: hello.sh\necho hello > hello.txt\ncat hello.txt\n```",
            "The file was written. TERMINATE",
        ],
    ))
    .unwrap();

    let (conversation, outcome) = chat
        .initiate_chat("Write hello to hello.txt and print it", "Executor")
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Terminated { rounds: 3 });
    let result = &conversation.transcript()[2];
    assert_eq!(result.sender, "Executor");
    assert_eq!(result.recipient, Recipient::Participant("Coder".to_string()));
    let execution = result.content.execution().unwrap();
    assert!(execution.succeeded());
    assert_eq!(execution.stdout.trim(), "hello");
    assert!(result.text().starts_with("exitcode: 0 (execution succeeded)"));
    assert!(dir.path().join("hello.txt").exists());
}

#[tokio::test]
async fn test_failed_execution_is_not_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let config = ChatConfig::default()
        .with_max_rounds(3)
        .with_work_dir(dir.path());
    let mut chat = GroupChat::new(config)
        .unwrap()
        .with_executor(Arc::new(LocalCodeExecutor::new()));
    chat.add_participant(Participant::executor("Executor")).unwrap();
    chat.add_participant(scripted(
        "Coder",
        ParticipantRole::Generator,
        vec!["```sh\necho TERMINATE\nexit 3\n```", "fixed it"],
    ))
    .unwrap();

    let mut conversation = chat.start("run something", "Executor").await.unwrap();
    chat.step(&mut conversation).await.unwrap();
    let result = chat.step(&mut conversation).await.unwrap();

    let outcome = result.content.execution().unwrap().clone();
    assert_eq!(outcome.exit_code, 3);
    assert!(!result.terminal);
    assert!(!conversation.is_terminated());

    // the failure routes back to the Coder
    let next = chat.step(&mut conversation).await.unwrap();
    assert_eq!(next.sender, "Coder");
}

fn hello_pair(dir: &std::path::Path, executor: Participant) -> GroupChat {
    let config = ChatConfig::default().with_max_rounds(10).with_work_dir(dir);
    let mut chat = GroupChat::new(config)
        .unwrap()
        .with_executor(Arc::new(LocalCodeExecutor::new()));
    chat.add_participant(executor).unwrap();
    chat.add_participant(scripted(
        "Coder",
        ParticipantRole::Generator,
        vec!["```sh\necho hi\n```", "The script printed hi.", "TERMINATE"],
    ))
    .unwrap();
    chat
}

#[tokio::test]
async fn test_executor_auto_replies_to_plain_text() {
    let dir = tempfile::tempdir().unwrap();
    let chat = hello_pair(dir.path(), Participant::executor("Executor"));

    let (conversation, outcome) = chat
        .initiate_chat("Print hi from a shell script", "Executor")
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Terminated { rounds: 5 });
    let transcript = conversation.transcript();
    assert_eq!(transcript.len(), 6);
    assert_eq!(transcript[2].content.execution().unwrap().stdout.trim(), "hi");
    assert_eq!(transcript[4].sender, "Executor");
    assert_eq!(transcript[4].text(), "");
    assert_eq!(transcript.last().unwrap().sender, "Coder");
}

#[tokio::test]
async fn test_executor_without_auto_replies_stalls() {
    let dir = tempfile::tempdir().unwrap();
    let chat = hello_pair(dir.path(), Participant::executor_with_auto_replies("Executor", 0));

    let mut conversation = chat
        .start("Print hi from a shell script", "Executor")
        .await
        .unwrap();
    let err = chat.run(&mut conversation).await.unwrap_err();

    assert!(matches!(err, ConversationError::SpeakerSelection { .. }));
    assert_eq!(conversation.transcript().len(), 4);
}

#[tokio::test]
async fn test_history_and_jsonl_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("conversation.jsonl");
    let history = Arc::new(ChatHistory::new());
    let jsonl = Arc::new(JsonlTranscriptLog::open(&log_path).unwrap());

    let chat = three_agent_chat(
        ChatConfig::default(),
        scripted("Coder", ParticipantRole::Generator, vec!["print(1)"]),
    )
    .with_sink(history.clone())
    .with_sink(jsonl);

    let (conversation, _) = chat.initiate_chat("write X", "Admin").await.unwrap();

    let entries = history.entries().await;
    assert_eq!(entries.len(), conversation.transcript().len());
    assert_eq!(entries[0].sender, "Admin");
    assert_eq!(entries[0].recipient, "all");

    let logged = JsonlTranscriptLog::read_all(&log_path).unwrap();
    assert_eq!(logged.len(), conversation.transcript().len());
    assert!(logged.iter().all(|e| e.conversation_id == conversation.id()));
    assert!(logged.last().unwrap().terminal);
}

struct MockClient {
    replies: Mutex<Vec<String>>,
    seen: Mutex<Vec<usize>>,
    usage: Mutex<Option<TokenUsage>>,
}

#[async_trait]
impl ClientWrapper for MockClient {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        self.seen.lock().await.push(messages.len());
        let mut replies = self.replies.lock().await;
        // an empty reply makes the policy decline
        let reply = if replies.is_empty() {
            String::new()
        } else {
            replies.remove(0)
        };
        Ok(Message::new(Role::Assistant, reply))
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

#[tokio::test]
async fn test_llm_backed_participant_sees_full_transcript() {
    let client = Arc::new(MockClient {
        replies: Mutex::new(vec!["```python\nprint(2)\n```".to_string()]),
        seen: Mutex::new(Vec::new()),
        usage: Mutex::new(None),
    });
    let coder = Participant::new(
        "Coder",
        ParticipantRole::Generator,
        Arc::new(LlmPolicy::new(client.clone(), "You write Python.")),
    );
    let chat = three_agent_chat(ChatConfig::default(), coder);

    let (conversation, outcome) = chat.initiate_chat("write X", "Admin").await.unwrap();
    assert!(outcome.is_terminated());
    assert_eq!(conversation.transcript()[1].text(), "```python\nprint(2)\n```");
    // first turn: system prompt plus the opening message; second turn declines
    assert_eq!(*client.seen.lock().await, vec![2, 4]);
}

struct FailingClient;

#[async_trait]
impl ClientWrapper for FailingClient {
    fn model_name(&self) -> &str {
        "gpt-4"
    }

    async fn send_message(
        &self,
        _messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        Err("503 service unavailable".into())
    }
}

#[tokio::test]
async fn test_coder_falls_back_to_second_model() {
    let fallback = Arc::new(MockClient {
        replies: Mutex::new(vec!["```python\nprint(3)\n```".to_string()]),
        seen: Mutex::new(Vec::new()),
        usage: Mutex::new(None),
    });
    let policy = LlmPolicy::new(Arc::new(FailingClient), "You write Python.")
        .with_fallback(fallback.clone(), Duration::from_secs(5));
    assert_eq!(policy.models(), vec!["gpt-4", "mock"]);

    let coder = Participant::new("Coder", ParticipantRole::Generator, Arc::new(policy));
    let chat = three_agent_chat(ChatConfig::default(), coder);

    let (conversation, outcome) = chat.initiate_chat("write X", "Admin").await.unwrap();
    assert!(outcome.is_terminated());
    assert_eq!(conversation.transcript()[1].sender, "Coder");
    assert_eq!(conversation.transcript()[1].text(), "```python\nprint(3)\n```");
    assert_eq!(fallback.seen.lock().await.first(), Some(&2));
}
