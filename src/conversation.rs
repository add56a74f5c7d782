//! Chat-driven preference extraction.
//!
//! A [`Conversation`] owns the session store for one participant and keeps a
//! display log alongside the transcript. Remote failures are shown inline in
//! the display log; the transcript only ever holds completed exchanges, so a
//! failed message can simply be sent again.

use std::sync::Arc;
use tracing::{info, warn};

use crate::api::PreferenceService;
use crate::error::{Result, SwipeError};
use crate::preferences::{ParticipantPreferences, PreferencesOutput};
use crate::session::{ConversationTurn, Participant, SessionStore};

pub const DEFAULT_MAX_TURNS: usize = 8;

/// One line of what the user sees.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEntry {
    Turn(ConversationTurn),
    /// Inline status, e.g. "agent unreachable". Never sent to the remote side.
    Notice(String),
}

pub struct Conversation {
    service: Arc<dyn PreferenceService>,
    store: SessionStore,
    display: Vec<ChatEntry>,
    max_turns: usize,
}

impl Conversation {
    pub fn new(service: Arc<dyn PreferenceService>, participant: Participant) -> Self {
        Self {
            service,
            store: SessionStore::new(participant),
            display: Vec::new(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn into_store(self) -> SessionStore {
        self.store
    }

    pub fn display(&self) -> &[ChatEntry] {
        &self.display
    }

    pub fn remaining_turns(&self) -> usize {
        self.max_turns.saturating_sub(self.store.user_turns())
    }

    /// Send one user message and return the assistant's reply.
    ///
    /// On a remote failure the user message and an "agent unreachable" notice
    /// are added to the display log and the error is returned; the transcript
    /// is left untouched.
    pub async fn send(&mut self, message: &str) -> Result<String> {
        if self.remaining_turns() == 0 {
            return Err(SwipeError::TurnLimitReached(self.max_turns));
        }

        let user_turn = ConversationTurn::user(message);
        self.display.push(ChatEntry::Turn(user_turn.clone()));

        let reply = self
            .service
            .chat(message, self.store.participant(), self.store.transcript())
            .await;

        match reply {
            Ok(text) => {
                let assistant_turn = ConversationTurn::assistant(text.clone());
                self.store.push_turn(user_turn);
                self.store.push_turn(assistant_turn.clone());
                self.display.push(ChatEntry::Turn(assistant_turn));
                Ok(text)
            }
            Err(e) => {
                warn!(session = %self.store.id(), error = %e, "chat turn failed");
                self.display.push(ChatEntry::Notice(e.user_message()));
                Err(e)
            }
        }
    }

    /// Extract preferences from the transcript so far and store them,
    /// replacing whatever was extracted before.
    pub async fn extract(&mut self) -> Result<ParticipantPreferences> {
        if self.store.transcript().is_empty() {
            return Err(SwipeError::EmptyTranscript);
        }
        let output = self
            .service
            .extract_preferences(self.store.transcript(), self.store.participant())
            .await?;

        let primary = output
            .primary_for(self.store.participant())
            .cloned()
            .unwrap_or_else(|| ParticipantPreferences::empty(self.store.participant()));
        info!(
            session = %self.store.id(),
            keys = primary.preferences.len(),
            "preferences extracted"
        );
        self.store.replace_preferences(primary.clone());
        Ok(primary)
    }

    /// Extraction result wrapped for formatting.
    pub fn output(&self) -> PreferencesOutput {
        PreferencesOutput::single(self.store.bundle())
    }
}
