//! HTTP client for the preference API.
//!
//! Every remote operation the session needs is behind [`PreferenceService`],
//! so the conversation driver and the question flow can run against
//! [`ApiClient`] in production and against an in-memory fake in tests.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, SwipeError};
use crate::preferences::{PreferenceMapping, PreferencesOutput};
use crate::session::{Answer, ConversationTurn, Participant};

pub const CHAT_PATH: &str = "/api/chat";
pub const EXTRACT_PATH: &str = "/api/extract-preferences";
pub const FORMAT_PATH: &str = "/api/format-output";
pub const NEXT_QUESTION_PATH: &str = "/api/generate-next-question";
pub const UPDATE_PATH: &str = "/api/update-preferences";
pub const FINALIZE_PATH: &str = "/api/finalize-preferences";

// -- Request / response bodies ----------------------------------------------

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    pub participant_name: &'a str,
    pub role: &'a str,
    pub conversation_history: &'a [ConversationTurn],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    response: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExtractRequest<'a> {
    pub conversation_history: &'a [ConversationTurn],
    pub participant_name: &'a str,
    pub role: &'a str,
}

#[derive(Debug, Deserialize)]
struct FormatResponse {
    formatted_output: Option<String>,
}

/// Body for the question-generation endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct NextQuestionRequest {
    pub user_name: String,
    pub user_role: String,
    pub user_description: String,
    pub previous_answers: Vec<Answer>,
    pub current_preferences: PreferenceMapping,
    pub question_count: usize,
}

#[derive(Debug, Deserialize)]
struct NextQuestionResponse {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    complete: Option<bool>,
}

/// Body shared by the update and finalize endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct AnswersRequest {
    pub user_name: String,
    pub user_role: String,
    pub user_description: String,
    pub answers: Vec<Answer>,
}

impl AnswersRequest {
    pub fn new(participant: &Participant, answers: &[Answer]) -> Self {
        Self {
            user_name: participant.name.clone(),
            user_role: participant.role.clone(),
            user_description: participant.description.clone(),
            answers: answers.to_vec(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    preferences: PreferenceMapping,
}

/// What the question generator decided.
#[derive(Debug, Clone, PartialEq)]
pub enum NextQuestion {
    Ask(String),
    Complete,
}

// -- Service seam -----------------------------------------------------------

#[async_trait]
pub trait PreferenceService: Send + Sync {
    /// Send `message` with the prior transcript; returns the assistant reply.
    async fn chat(&self, message: &str, participant: &Participant, history: &[ConversationTurn]) -> Result<String>;

    async fn extract_preferences(&self, history: &[ConversationTurn], participant: &Participant) -> Result<PreferencesOutput>;

    async fn format_output(&self, output: &PreferencesOutput) -> Result<String>;

    async fn generate_next_question(&self, request: &NextQuestionRequest) -> Result<NextQuestion>;

    async fn update_preferences(&self, request: &AnswersRequest) -> Result<PreferenceMapping>;

    async fn finalize_preferences(&self, request: &AnswersRequest, participant: &Participant) -> Result<PreferencesOutput>;
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL of the preference API (e.g. `http://localhost:8001`).
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Covers the whole request; LLM-backed calls are slow.
    pub request_timeout: Duration,
}

impl ApiClientConfig {
    /// Defaults: connect 5 s, request 60 s.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
        }
    }
}

pub struct ApiClient {
    config: ApiClientConfig,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// POST `body` as JSON and return the raw JSON reply.
    ///
    /// Transport errors and non-2xx statuses are `RemoteUnavailable`; a body
    /// that is not JSON is `MalformedResponse`.
    async fn post_value<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<serde_json::Value> {
        let url = self.url(path);
        debug!(%url, "POST");
        let resp = self.client.post(&url).json(body).send().await.map_err(|e| {
            warn!(error = %e, endpoint = path, "request failed");
            SwipeError::remote(path, e)
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), endpoint = path, "non-success status");
            return Err(SwipeError::remote(path, format!("HTTP {}: {}", status.as_u16(), text)));
        }

        let bytes = resp.bytes().await.map_err(|e| SwipeError::remote(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(error = %e, endpoint = path, "response was not JSON");
            SwipeError::malformed(path, e)
        })
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let value = self.post_value(path, body).await?;
        serde_json::from_value(value).map_err(|e| SwipeError::malformed(path, e))
    }
}

#[async_trait]
impl PreferenceService for ApiClient {
    async fn chat(&self, message: &str, participant: &Participant, history: &[ConversationTurn]) -> Result<String> {
        let request = ChatRequest {
            message,
            participant_name: &participant.name,
            role: &participant.role,
            conversation_history: history,
        };
        let reply: ChatResponse = self.post_json(CHAT_PATH, &request).await?;
        reply
            .response
            .ok_or_else(|| SwipeError::malformed(CHAT_PATH, "missing field `response`"))
    }

    async fn extract_preferences(&self, history: &[ConversationTurn], participant: &Participant) -> Result<PreferencesOutput> {
        if history.is_empty() {
            return Err(SwipeError::EmptyTranscript);
        }
        let request = ExtractRequest {
            conversation_history: history,
            participant_name: &participant.name,
            role: &participant.role,
        };
        let value = self.post_value(EXTRACT_PATH, &request).await?;
        PreferencesOutput::from_remote(value, participant).map_err(|e| SwipeError::malformed(EXTRACT_PATH, e))
    }

    async fn format_output(&self, output: &PreferencesOutput) -> Result<String> {
        let reply: FormatResponse = self.post_json(FORMAT_PATH, output).await?;
        reply
            .formatted_output
            .ok_or_else(|| SwipeError::malformed(FORMAT_PATH, "missing field `formatted_output`"))
    }

    async fn generate_next_question(&self, request: &NextQuestionRequest) -> Result<NextQuestion> {
        let reply: NextQuestionResponse = self.post_json(NEXT_QUESTION_PATH, request).await?;
        if reply.complete == Some(true) {
            return Ok(NextQuestion::Complete);
        }
        match reply.question {
            Some(q) if !q.trim().is_empty() => Ok(NextQuestion::Ask(q)),
            _ => Err(SwipeError::malformed(NEXT_QUESTION_PATH, "neither `question` nor `complete`")),
        }
    }

    async fn update_preferences(&self, request: &AnswersRequest) -> Result<PreferenceMapping> {
        let reply: UpdateResponse = self.post_json(UPDATE_PATH, request).await?;
        Ok(reply.preferences)
    }

    async fn finalize_preferences(&self, request: &AnswersRequest, participant: &Participant) -> Result<PreferencesOutput> {
        let value = self.post_value(FINALIZE_PATH, request).await?;
        PreferencesOutput::from_remote(value, participant).map_err(|e| SwipeError::malformed(FINALIZE_PATH, e))
    }
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    config: ApiClientConfig,
}

impl ApiClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: ApiClientConfig::new(base_url),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> ApiClient {
        // Falls back to a default client rather than panicking.
        let client = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .build()
            .unwrap_or_default();

        ApiClient {
            config: self.config,
            client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::PreferenceValue;

    #[test]
    fn test_builder_defaults() {
        let client = ApiClient::builder("http://localhost:8001").build();
        assert_eq!(client.config.connect_timeout, Duration::from_secs(5));
        assert_eq!(client.config.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_builder_overrides_timeouts() {
        let client = ApiClient::builder("http://localhost:8001")
            .connect_timeout(Duration::from_secs(1))
            .request_timeout(Duration::from_secs(2))
            .build();
        assert_eq!(client.config.connect_timeout, Duration::from_secs(1));
        assert_eq!(client.config.request_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = ApiClient::builder("http://localhost:8001/").build();
        assert_eq!(client.url(CHAT_PATH), "http://localhost:8001/api/chat");
    }

    #[test]
    fn test_chat_request_serializes_history_as_role_content() {
        let history = vec![ConversationTurn::user("hi"), ConversationTurn::assistant("hello")];
        let req = ChatRequest {
            message: "more",
            participant_name: "Alice",
            role: "neighbor",
            conversation_history: &history,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["conversation_history"][1]["role"], "assistant");
        assert_eq!(v["conversation_history"][0]["content"], "hi");
        assert!(v["conversation_history"][0].get("timestamp_ms").is_none());
    }

    #[test]
    fn test_next_question_request_fields() {
        let mut prefs = PreferenceMapping::new();
        prefs.insert("budget", PreferenceValue::Number(10.0));
        let req = NextQuestionRequest {
            user_name: "Alice".into(),
            user_role: "neighbor".into(),
            user_description: "d".into(),
            previous_answers: vec![],
            current_preferences: prefs,
            question_count: 3,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["question_count"], 3);
        assert_eq!(v["current_preferences"]["budget"], 10.0);
        assert!(v["previous_answers"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_rejects_empty_transcript_without_network() {
        let client = ApiClient::builder("http://127.0.0.1:9").build();
        let p = Participant::new("Alice", "neighbor", "");
        let err = client.extract_preferences(&[], &p).await.unwrap_err();
        assert!(matches!(err, SwipeError::EmptyTranscript));
    }
}
