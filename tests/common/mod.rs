//! Shared helpers for integration tests: an in-memory preference service.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use policy_swipe::api::{AnswersRequest, NextQuestion, NextQuestionRequest, PreferenceService};
use policy_swipe::preferences::{ParticipantPreferences, PreferenceMapping, PreferenceValue, PreferencesOutput};
use policy_swipe::session::{ConversationTurn, Participant};
use policy_swipe::{Result, SwipeError};

pub fn alice() -> Participant {
    Participant::new("Alice", "neighbor", "Lives next to the proposed site")
}

pub fn unavailable(endpoint: &str) -> SwipeError {
    SwipeError::RemoteUnavailable {
        endpoint: endpoint.to_string(),
        detail: "connection refused".to_string(),
    }
}

pub fn mapping(pairs: &[(&str, PreferenceValue)]) -> PreferenceMapping {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Scripted responses. An empty queue means "fail" for chat and update, and
/// "ask a generated question" for question generation.
#[derive(Default)]
pub struct FakeService {
    pub chat_replies: Mutex<VecDeque<Option<String>>>,
    pub questions: Mutex<VecDeque<Option<NextQuestion>>>,
    pub updates: Mutex<VecDeque<Option<PreferenceMapping>>>,
    pub extraction: Mutex<Option<PreferencesOutput>>,
    pub finalized: Mutex<Option<PreferencesOutput>>,
    pub calls: Mutex<Vec<&'static str>>,
    pub question_requests: Mutex<Vec<NextQuestionRequest>>,
    pub finalize_requests: Mutex<Vec<AnswersRequest>>,
    pub chat_history_lens: Mutex<Vec<usize>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chat(self, replies: Vec<Option<&str>>) -> Self {
        *self.chat_replies.lock().unwrap() = replies.into_iter().map(|r| r.map(str::to_string)).collect();
        self
    }

    pub fn with_questions(self, questions: Vec<Option<NextQuestion>>) -> Self {
        *self.questions.lock().unwrap() = questions.into_iter().collect();
        self
    }

    pub fn with_updates(self, updates: Vec<Option<PreferenceMapping>>) -> Self {
        *self.updates.lock().unwrap() = updates.into_iter().collect();
        self
    }

    pub fn with_extraction(self, output: PreferencesOutput) -> Self {
        *self.extraction.lock().unwrap() = Some(output);
        self
    }

    pub fn with_finalized(self, output: PreferencesOutput) -> Self {
        *self.finalized.lock().unwrap() = Some(output);
        self
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PreferenceService for FakeService {
    async fn chat(&self, message: &str, _participant: &Participant, history: &[ConversationTurn]) -> Result<String> {
        self.record("chat");
        self.chat_history_lens.lock().unwrap().push(history.len());
        match self.chat_replies.lock().unwrap().pop_front().flatten() {
            Some(reply) => Ok(reply),
            None => Err(unavailable(&format!("/api/chat ({message})"))),
        }
    }

    async fn extract_preferences(&self, history: &[ConversationTurn], _participant: &Participant) -> Result<PreferencesOutput> {
        self.record("extract");
        if history.is_empty() {
            return Err(SwipeError::EmptyTranscript);
        }
        self.extraction
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| unavailable("/api/extract-preferences"))
    }

    async fn format_output(&self, output: &PreferencesOutput) -> Result<String> {
        self.record("format");
        Ok(policy_swipe::format_output(output))
    }

    async fn generate_next_question(&self, request: &NextQuestionRequest) -> Result<NextQuestion> {
        self.record("next_question");
        self.question_requests.lock().unwrap().push(request.clone());
        match self.questions.lock().unwrap().pop_front() {
            Some(Some(q)) => Ok(q),
            Some(None) => Err(unavailable("/api/generate-next-question")),
            None => Ok(NextQuestion::Ask(format!("Generated question {}?", request.question_count + 1))),
        }
    }

    async fn update_preferences(&self, _request: &AnswersRequest) -> Result<PreferenceMapping> {
        self.record("update");
        self.updates
            .lock()
            .unwrap()
            .pop_front()
            .flatten()
            .ok_or_else(|| unavailable("/api/update-preferences"))
    }

    async fn finalize_preferences(&self, request: &AnswersRequest, _participant: &Participant) -> Result<PreferencesOutput> {
        self.record("finalize");
        self.finalize_requests.lock().unwrap().push(request.clone());
        self.finalized
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| unavailable("/api/finalize-preferences"))
    }
}

pub fn output_for(participant: &Participant, prefs: PreferenceMapping) -> PreferencesOutput {
    PreferencesOutput::single(ParticipantPreferences::new(participant, prefs))
}
