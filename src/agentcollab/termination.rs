//! Termination predicate over message content.

use crate::agentcollab::transcript::MessageContent;

/// Decides whether a message ends the conversation.
///
/// A message is terminal when its content, with trailing whitespace trimmed,
/// ends with one of the configured sentinels. Matching is case-sensitive.
///
/// ```rust
/// use agentcollab::termination::TerminationPredicate;
///
/// let predicate = TerminationPredicate::default();
/// assert!(predicate.matches("All done. TERMINATE"));
/// assert!(predicate.matches("All done. TERMINATE \n"));
/// assert!(!predicate.matches("terminate"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationPredicate {
    sentinels: Vec<String>,
}

impl TerminationPredicate {
    pub fn new<I, S>(sentinels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TerminationPredicate {
            sentinels: sentinels.into_iter().map(Into::into).collect(),
        }
    }

    /// The `TASK_COMPLETED` vocabulary used by execution-confirmed deployments.
    pub fn task_completed() -> Self {
        Self::new(vec!["TASK_COMPLETED"])
    }

    pub fn sentinels(&self) -> &[String] {
        &self.sentinels
    }

    pub fn matches(&self, text: &str) -> bool {
        let trimmed = text.trim_end();
        self.sentinels
            .iter()
            .any(|sentinel| trimmed.ends_with(sentinel.as_str()))
    }

    /// Evaluate a message body. Failed executions never terminate.
    pub fn is_terminal(&self, content: &MessageContent) -> bool {
        match content {
            MessageContent::Text { text } => self.matches(text),
            MessageContent::Execution { outcome } => {
                outcome.succeeded() && self.matches(&outcome.render())
            }
        }
    }
}

impl Default for TerminationPredicate {
    fn default() -> Self {
        Self::new(vec!["TERMINATE"])
    }
}
