//! Conversation sessions.
//!
//! A session is one conversation thread: an append-only [`Transcript`] plus
//! whatever agent state the conversation needs. Sessions live in a
//! [`SessionStore`] keyed by id, each behind its own lock.

mod store;

pub use store::{InMemorySessionStore, SessionHandle, SessionStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Display names used when rendering a transcript into a prompt.
#[derive(Debug, Clone, Copy)]
pub struct Speakers {
    pub user: &'static str,
    pub assistant: &'static str,
}

impl Speakers {
    pub const VIVA: Speakers = Speakers {
        user: "Student",
        assistant: "Examiner",
    };

    pub const CONSULTATION: Speakers = Speakers {
        user: "Patient",
        assistant: "Doctor",
    };
}

/// Text used for an empty transcript.
pub const EMPTY_HISTORY: &str = "No conversation yet.";

/// Ordered, append-only list of turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(Turn {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Role::User, content);
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of assistant turns so far.
    pub fn assistant_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|turn| turn.role == Role::Assistant)
            .count()
    }

    /// Render the last `window` turns as `Speaker: text` paragraphs.
    pub fn history_text(&self, speakers: Speakers, window: usize) -> String {
        if self.turns.is_empty() {
            return EMPTY_HISTORY.to_string();
        }

        let start = self.turns.len().saturating_sub(window);
        self.turns[start..]
            .iter()
            .map(|turn| {
                let speaker = match turn.role {
                    Role::User => speakers.user,
                    Role::Assistant => speakers.assistant,
                };
                format!("{}: {}\n\n", speaker, turn.content)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_history_text() {
        let transcript = Transcript::new();
        assert_eq!(transcript.history_text(Speakers::VIVA, 10), EMPTY_HISTORY);
    }

    #[test]
    fn test_history_window_and_labels() {
        let mut transcript = Transcript::new();
        for i in 0..6 {
            transcript.push_assistant(format!("q{}", i));
            transcript.push_user(format!("a{}", i));
        }

        let text = transcript.history_text(Speakers::CONSULTATION, 3);
        assert_eq!(text, "Patient: a4\n\nDoctor: q5\n\nPatient: a5\n\n");
        assert_eq!(transcript.assistant_turns(), 6);
        assert_eq!(transcript.len(), 12);
    }

    #[test]
    fn test_turns_serialize_with_lowercase_roles() {
        let mut transcript = Transcript::new();
        transcript.push_user("hello");

        let json = serde_json::to_value(&transcript).unwrap();
        assert_eq!(json[0]["role"], "user");
        assert_eq!(json[0]["content"], "hello");
        assert!(json[0]["timestamp"].is_string());
    }
}
