//! Per-session state: who is answering, what has been said, what has been
//! answered, and the latest extracted preferences.
//!
//! A [`SessionStore`] is owned by whichever view drives the session and is
//! dropped with it. Nothing here is persisted.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::{Result, SwipeError};
use crate::preferences::{ParticipantPreferences, PreferenceBundle, PreferenceMapping};

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The person whose preferences are being collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub role: String,
    pub description: String,
}

impl Participant {
    pub fn new(name: impl Into<String>, role: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One transcript entry. On the wire only `{role, content}` is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    #[serde(skip_serializing, default)]
    pub timestamp_ms: u64,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp_ms: now_ms(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp_ms: now_ms(),
        }
    }
}

/// One answered question-flow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_answer: Option<String>,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
}

impl Answer {
    pub fn new(question: impl Into<String>, answer: impl Into<String>, follow_up_answer: Option<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            follow_up_answer,
            timestamp_ms: now_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SessionStore {
    id: Uuid,
    participant: Participant,
    transcript: Vec<ConversationTurn>,
    answers: Vec<Answer>,
    preferences: Option<ParticipantPreferences>,
}

impl SessionStore {
    pub fn new(participant: Participant) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant,
            transcript: Vec::new(),
            answers: Vec::new(),
            preferences: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    /// Replace the identity. Only allowed before anything has been recorded.
    pub fn set_participant(&mut self, participant: Participant) -> Result<()> {
        if self.has_started() {
            return Err(SwipeError::IdentityLocked);
        }
        self.participant = participant;
        Ok(())
    }

    pub fn has_started(&self) -> bool {
        !self.transcript.is_empty() || !self.answers.is_empty()
    }

    pub fn push_turn(&mut self, turn: ConversationTurn) {
        self.transcript.push(turn);
    }

    pub fn transcript(&self) -> &[ConversationTurn] {
        &self.transcript
    }

    pub fn user_turns(&self) -> usize {
        self.transcript.iter().filter(|t| t.role == TurnRole::User).count()
    }

    pub fn record_answer(&mut self, answer: Answer) {
        self.answers.push(answer);
    }

    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    /// Extraction results replace the previous mapping wholesale.
    pub fn replace_preferences(&mut self, preferences: ParticipantPreferences) {
        self.preferences = Some(preferences);
    }

    pub fn preferences(&self) -> Option<&ParticipantPreferences> {
        self.preferences.as_ref()
    }

    /// The bundle to hand to the negotiation view; empty if nothing was extracted.
    pub fn bundle(&self) -> PreferenceBundle {
        self.preferences
            .clone()
            .unwrap_or_else(|| ParticipantPreferences::new(&self.participant, PreferenceMapping::new()))
    }
}
