//! Speaker selection policy.
//!
//! Given the participants in registration order and the transcript so far,
//! the selector produces an ordered list of candidates for the next turn.
//! The group chat asks candidates in that order and the first one that does
//! not decline speaks. The immediately preceding speaker is never a candidate.
//!
//! [`SpeakerSelection::Auto`] is a deterministic state machine over roles:
//!
//! ```text
//! Initiator ─▶ Generator ─▶ Critic ─┬─▶ Generator (revise)
//!                                   └─▶ Executor (approved) ─▶ Initiator ─▶ [terminal]
//! ```
//!
//! The preferred roles for the current state come first, then every other
//! eligible participant in registration order as a fallback.

use crate::agentcollab::participant::{Participant, ParticipantRole};
use crate::agentcollab::transcript::{ChatMessage, Transcript};
use std::fmt;

/// Strategy used to pick the next speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerSelection {
    /// Rule-driven choice based on the last speaker's role and message.
    Auto,
    /// Fixed rotation in registration order.
    RoundRobin,
}

impl fmt::Display for SpeakerSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeakerSelection::Auto => write!(f, "auto"),
            SpeakerSelection::RoundRobin => write!(f, "round_robin"),
        }
    }
}

/// One slot in a preference list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preferred {
    Role(ParticipantRole),
    /// Executor role first, then anybody allowed to run code.
    Executing,
}

/// Ordered candidates for the next turn plus why they were chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidates {
    /// Indices into the participant list, best candidate first.
    pub order: Vec<usize>,
    pub reason: String,
}

/// Applies a [`SpeakerSelection`] strategy.
#[derive(Debug, Clone)]
pub struct SpeakerSelector {
    mode: SpeakerSelection,
    approval_phrases: Vec<String>,
}

impl SpeakerSelector {
    pub fn new(mode: SpeakerSelection, approval_phrases: Vec<String>) -> Self {
        SpeakerSelector {
            mode,
            approval_phrases,
        }
    }

    pub fn mode(&self) -> SpeakerSelection {
        self.mode
    }

    /// Whether `text` contains one of the approval phrases.
    pub fn is_approval(&self, text: &str) -> bool {
        self.approval_phrases
            .iter()
            .any(|phrase| text.contains(phrase.as_str()))
    }

    /// Candidates for the turn after the latest message of `transcript`.
    pub fn candidates(&self, participants: &[Participant], transcript: &Transcript) -> Candidates {
        let last = match transcript.last() {
            Some(last) => last,
            None => {
                return Candidates {
                    order: (0..participants.len()).collect(),
                    reason: "empty transcript".to_string(),
                }
            }
        };
        let last_idx = participants.iter().position(|p| p.name == last.sender);

        match self.mode {
            SpeakerSelection::RoundRobin => {
                let n = participants.len();
                let start = last_idx.map(|i| i + 1).unwrap_or(0);
                let order = (0..n)
                    .map(|offset| (start + offset) % n)
                    .filter(|&i| Some(i) != last_idx)
                    .collect();
                Candidates {
                    order,
                    reason: "round robin turn".to_string(),
                }
            }
            SpeakerSelection::Auto => {
                let last_role = last_idx.map(|i| participants[i].role);
                let (preferences, reason) = self.preferences(last, last_role);
                Candidates {
                    order: Self::order_by_preference(participants, last_idx, &preferences),
                    reason,
                }
            }
        }
    }

    fn preferences(
        &self,
        last: &ChatMessage,
        last_role: Option<ParticipantRole>,
    ) -> (Vec<Preferred>, String) {
        use ParticipantRole::*;
        use Preferred::{Executing, Role};

        if let Some(outcome) = last.content.execution() {
            return if outcome.succeeded() {
                (vec![Role(Initiator)], "execution succeeded".to_string())
            } else {
                (
                    vec![Role(Generator), Role(Critic)],
                    "execution failed".to_string(),
                )
            };
        }

        let text = last.text();
        match last_role {
            None => (Vec::new(), format!("unknown sender {}", last.sender)),
            Some(Initiator) => (
                vec![Role(Generator), Role(Verifier), Role(Critic)],
                "request from Initiator".to_string(),
            ),
            Some(Generator) => (
                vec![Role(Critic), Role(Verifier)],
                "Generator contribution needs review".to_string(),
            ),
            Some(Critic) => {
                if self.is_approval(&text) {
                    (
                        vec![Executing, Role(Verifier), Role(Generator), Role(Initiator)],
                        "Critic approved".to_string(),
                    )
                } else {
                    (vec![Role(Generator)], "Critic requested changes".to_string())
                }
            }
            Some(Verifier) => {
                if !last.content.code_blocks().is_empty() {
                    (
                        vec![Role(Critic), Executing],
                        "Verifier tests need review".to_string(),
                    )
                } else if self.is_approval(&text) {
                    (
                        vec![Executing, Role(Initiator)],
                        "Verifier approved".to_string(),
                    )
                } else {
                    (vec![Role(Generator)], "Verifier requested changes".to_string())
                }
            }
            Some(Executor) => (
                vec![Role(Initiator), Role(Generator)],
                "Executor reported".to_string(),
            ),
        }
    }

    fn order_by_preference(
        participants: &[Participant],
        last_idx: Option<usize>,
        preferences: &[Preferred],
    ) -> Vec<usize> {
        let mut order: Vec<usize> = Vec::with_capacity(participants.len());
        let eligible = |i: usize, order: &Vec<usize>| Some(i) != last_idx && !order.contains(&i);

        for preference in preferences {
            match preference {
                Preferred::Role(role) => {
                    for (i, p) in participants.iter().enumerate() {
                        if p.role == *role && eligible(i, &order) {
                            order.push(i);
                        }
                    }
                }
                Preferred::Executing => {
                    for (i, p) in participants.iter().enumerate() {
                        if p.role == ParticipantRole::Executor && eligible(i, &order) {
                            order.push(i);
                        }
                    }
                    for (i, p) in participants.iter().enumerate() {
                        if p.can_execute && eligible(i, &order) {
                            order.push(i);
                        }
                    }
                }
            }
        }

        for i in 0..participants.len() {
            if eligible(i, &order) {
                order.push(i);
            }
        }

        order
    }
}
