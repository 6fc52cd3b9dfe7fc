//! Code Review Team Demo
//!
//! Runs the Admin / Coder / Reviewer / Test_Engineer team on a single coding
//! request. Messages are logged as they are appended and the whole
//! conversation is written to `coding/conversation.jsonl`.
//!
//! To run this example, set your API key:
//! export OPENAI_API_KEY=your_openai_key
//!
//! Optional overrides:
//! export AGENTCOLLAB_MODEL=gpt-4,gpt-3.5-turbo   (tried in order)
//! export AGENTCOLLAB_BASE_URL=http://localhost:11434   (e.g. a local Ollama server)
//!
//! Then run: cargo run --example code_review_team -- "Write a function that returns the first 10 primes."
//! Pass `--no-tests` before the request for the three member team.

use agentcollab::config::ModelConfig;
use agentcollab::event::{JsonlTranscriptLog, LogSink};
use agentcollab::group_chat::RunOutcome;
use agentcollab::team::{code_review_team, TeamKind, ADMIN};
use std::sync::Arc;

const DEFAULT_REQUEST: &str = "Write a Python function that returns the first 10 prime numbers, \
with unit tests.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    agentcollab::init_logger();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let kind = if args.first().map(|a| a == "--no-tests").unwrap_or(false) {
        args.remove(0);
        TeamKind::Review
    } else {
        TeamKind::ReviewAndTest
    };
    let request = if args.is_empty() {
        DEFAULT_REQUEST.to_string()
    } else {
        args.join(" ")
    };

    let models = ModelConfig::list_from_env(&["gpt-4", "gpt-3.5-turbo"])?;
    let transcript_log = Arc::new(JsonlTranscriptLog::open("coding/conversation.jsonl")?);

    let team = code_review_team(&models, kind, "coding")?
        .with_sink(Arc::new(LogSink))
        .with_sink(transcript_log.clone());

    let names: Vec<&str> = models.iter().map(|m| m.model.as_str()).collect();
    println!("=== agentcollab: {:?} team on {} ===\n", kind, names.join(", "));
    println!("Request: {}\n", request);

    let (conversation, outcome) = team.initiate_chat(request, ADMIN).await?;

    for message in conversation.transcript() {
        println!("--- #{} {} -> {} ---", message.position, message.sender, message.recipient);
        println!("{}\n", message.text());
    }

    match outcome {
        RunOutcome::Terminated { rounds } => {
            println!("Conversation terminated after {} rounds.", rounds)
        }
        RunOutcome::Incomplete { rounds } => println!(
            "Round budget of {} exhausted before the team finished.",
            rounds
        ),
    }
    println!(
        "Transcript written to {}",
        transcript_log.path().display()
    );
    Ok(())
}
