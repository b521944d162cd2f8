use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who wrote a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::User => f.write_str("user"),
            ChatRole::Assistant => f.write_str("assistant"),
        }
    }
}

/// A single transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Where a Q&A session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaState {
    AwaitingInput,
    ProcessingAnswer,
    Finalizing,
    Complete,
}

/// Per-image Q&A state: the evolving report, the transcript and, once the
/// user stops the session, the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub image_id: String,
    pub state: QaState,
    pub chat_history: Vec<ChatMessage>,
    pub current_report: Option<String>,
    pub final_report: Option<String>,
    /// Latest chat reply, handed out once by the next view.
    pub pending_reply: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// New session seeded with the initial formatted report. The report is also
    /// the first assistant entry of the transcript.
    pub fn seeded(image_id: impl Into<String>, initial_report: impl Into<String>) -> Self {
        let report = initial_report.into();
        let now = Utc::now();
        Self {
            image_id: image_id.into(),
            state: QaState::AwaitingInput,
            chat_history: vec![ChatMessage::assistant(report.clone())],
            current_report: Some(report),
            final_report: None,
            pending_reply: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn qa_complete(&self) -> bool {
        self.state == QaState::Complete
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.chat_history.push(message);
        self.touch();
    }

    pub fn transition(&mut self, state: QaState) {
        self.state = state;
        self.touch();
    }

    /// Marks the session complete with `report` as both final and current report.
    pub fn complete_with(&mut self, report: String) {
        self.current_report = Some(report.clone());
        self.final_report = Some(report);
        self.transition(QaState::Complete);
    }

    /// `"{role}: {content}"` lines, one per transcript entry.
    pub fn transcript(&self) -> String {
        self.chat_history
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
