//! Ready-made teams.
//!
//! [`TeamKind::Review`] is the three member coding team (Admin, Coder,
//! Reviewer) with a 15 round budget. [`TeamKind::ReviewAndTest`] adds a
//! Test_Engineer and raises the budget to 30 rounds to leave room for review
//! iterations on both application and test code. [`execution_pair`] is the
//! two-party setup where an executor runs whatever the Coder writes.
//!
//! Every LLM-backed member gets its own [`LlmPolicy`] over the same ordered
//! list of [`ModelConfig`]s: the first model answers unless it fails or times
//! out, then the next one is tried. HTTP connections are shared through the
//! client pool.

use crate::agentcollab::config::{ChatConfig, ModelConfig};
use crate::agentcollab::execution::LocalCodeExecutor;
use crate::agentcollab::group_chat::{ConversationError, GroupChat};
use crate::agentcollab::participant::{
    GenerationPolicy, LlmPolicy, Participant, ParticipantRole,
};
use std::path::PathBuf;
use std::sync::Arc;

pub const ADMIN: &str = "Admin";
pub const CODER: &str = "Coder";
pub const REVIEWER: &str = "Reviewer";
pub const TEST_ENGINEER: &str = "Test_Engineer";
pub const EXECUTOR: &str = "Executor";

pub const ADMIN_PROMPT: &str = "A human administrator who initiates tasks and reviews final \
outcomes. You will execute tests and report results as requested by other agents. Do not ask \
for human input during the conversation. When the work is approved and the tests pass, reply \
with 'TERMINATE'.";

pub const CODER_PROMPT: &str = "You are a helpful AI assistant specialized in Python programming.
You can write Python code, explain concepts, and debug issues.
When you provide code, ensure it is complete, runnable, and follows good practices including documentation.
If you need to run code or tests, suggest it and wait for approval.
Once the task is complete, reply with 'TERMINATE' to end the conversation.";

pub const REVIEWER_PROMPT: &str = "You are a meticulous Code Reviewer.
Your sole role is to provide feedback, suggestions, and critique on any Python code presented in the conversation, including application code and test code.
NEVER write or rewrite any code yourself.
NEVER suggest specific code implementations. Instead, describe what needs to be changed or improved conceptually.

Focus on the following aspects of the code:
- Correctness: does it solve the problem accurately and without bugs, or does the test code accurately test the application code?
- Efficiency: can it be optimized for speed or resource usage?
- Readability and style (PEP 8): formatting, naming conventions and overall structure.
- Documentation (PEP 257): docstrings on public modules, classes, functions and methods, and judicious inline comments.
- Edge cases: does the code handle error conditions gracefully, or do the tests cover them?
- Test coverage: does the test code adequately cover the application code?

If the code is flawless and needs no changes, respond with: 'Looks good!'
If changes are needed, clearly explain the areas for improvement.
Once the code is approved, you are done.";

pub const TEST_ENGINEER_PROMPT: &str = "You are a skilled Test Engineer specialized in Python.
Your primary role is to create comprehensive unit tests for the Python code provided by the Coder.
Your tests should:
- Be written using Python's unittest framework unless told otherwise.
- Cover normal cases, edge cases, and invalid inputs.
- Assert the correctness of the Coder's functions.
- Be self-contained and runnable.
Once the test code is complete, present it to the Reviewer for feedback before requesting execution by the Admin.
If the tests look good and no more test cases are needed, respond with: 'Looks good!'";

pub const EXECUTION_CODER_PROMPT: &str = "You are a helpful assistant that writes Python code. \
When asked, provide runnable Python code inside a markdown block. Once you have provided the \
complete and correct code, indicate that you are done by ending your message with 'TERMINATE'.";

/// Which preset to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamKind {
    /// Admin, Coder, Reviewer.
    Review,
    /// Admin, Coder, Reviewer, Test_Engineer.
    ReviewAndTest,
}

impl TeamKind {
    /// Round budget the preset ships with.
    pub fn default_max_rounds(&self) -> usize {
        match self {
            TeamKind::Review => 15,
            TeamKind::ReviewAndTest => 30,
        }
    }

    /// `(name, role, system prompt)` of each member in registration order.
    pub fn members(&self) -> Vec<(&'static str, ParticipantRole, &'static str)> {
        let mut members = vec![
            (ADMIN, ParticipantRole::Initiator, ADMIN_PROMPT),
            (CODER, ParticipantRole::Generator, CODER_PROMPT),
            (REVIEWER, ParticipantRole::Critic, REVIEWER_PROMPT),
        ];
        if *self == TeamKind::ReviewAndTest {
            members.push((TEST_ENGINEER, ParticipantRole::Verifier, TEST_ENGINEER_PROMPT));
        }
        members
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig::default().with_max_rounds(self.default_max_rounds())
    }
}

/// Assemble a preset with policies produced by `make_policy(name, prompt)`.
///
/// The Admin is the initiator and the only member allowed to execute code.
pub fn build_team<F>(
    kind: TeamKind,
    config: ChatConfig,
    mut make_policy: F,
) -> Result<GroupChat, ConversationError>
where
    F: FnMut(&str, &str) -> Arc<dyn GenerationPolicy>,
{
    let work_dir = config.work_dir.clone();
    let mut chat = GroupChat::new(config)?
        .with_executor(Arc::new(LocalCodeExecutor::new()));
    for (name, role, prompt) in kind.members() {
        let mut participant =
            Participant::new(name, role, make_policy(name, prompt)).with_description(prompt);
        if role == ParticipantRole::Initiator {
            participant = participant.with_code_execution();
        }
        chat.add_participant(participant)?;
    }
    log::info!(
        "team::build_team(...): {:?} team with {} members, code runs in {}",
        kind,
        chat.participants().len(),
        work_dir.display()
    );
    Ok(chat)
}

/// The LLM-backed coding team, each member talking to `models` in order.
pub fn code_review_team(
    models: &[ModelConfig],
    kind: TeamKind,
    work_dir: impl Into<PathBuf>,
) -> Result<GroupChat, ConversationError> {
    let template = LlmPolicy::from_configs(models, "")?;
    let config = kind.chat_config().with_work_dir(work_dir);
    build_team(kind, config, |_name, prompt| {
        Arc::new(template.clone().with_system_prompt(prompt))
    })
}

/// An executor and a Coder talking directly to each other.
///
/// The executor opens the conversation with the task, runs the code blocks
/// the Coder replies with and sends back the results. When the Coder answers
/// without code the executor sends an empty auto reply, up to
/// [`DEFAULT_MAX_AUTO_REPLIES`](crate::agentcollab::participant::DEFAULT_MAX_AUTO_REPLIES)
/// times in a row.
pub fn execution_pair(
    models: &[ModelConfig],
    work_dir: impl Into<PathBuf>,
    max_rounds: usize,
) -> Result<GroupChat, ConversationError> {
    let config = ChatConfig::default()
        .with_max_rounds(max_rounds)
        .with_work_dir(work_dir);
    let mut chat = GroupChat::new(config)?.with_executor(Arc::new(LocalCodeExecutor::new()));
    chat.add_participant(Participant::executor(EXECUTOR))?;
    chat.add_participant(Participant::new(
        CODER,
        ParticipantRole::Generator,
        Arc::new(LlmPolicy::from_configs(models, EXECUTION_CODER_PROMPT)?),
    ))?;
    Ok(chat)
}
