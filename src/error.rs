//! Crate-level error type.
//!
//! Remote failures come in two flavours: the call never produced a usable
//! HTTP response (`RemoteUnavailable`) or it did but the body was not what
//! the endpoint promises (`MalformedResponse`). Both read the same to a user;
//! see [`SwipeError::user_message`].

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SwipeError>;

#[derive(Debug, Error)]
pub enum SwipeError {
    /// Network or HTTP-status failure calling a remote endpoint.
    #[error("{endpoint} unavailable: {detail}")]
    RemoteUnavailable { endpoint: String, detail: String },

    /// The endpoint answered but the body had missing or unexpected fields.
    #[error("{endpoint} returned a malformed response: {detail}")]
    MalformedResponse { endpoint: String, detail: String },

    /// Transport-level failure on the negotiation WebSocket.
    #[error("negotiation channel: {0}")]
    Channel(String),

    /// A handoff blob could not be decoded into a preference bundle.
    #[error("invalid handoff: {0}")]
    Handoff(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// An answer was submitted for a step other than the current one.
    #[error("answer submitted for step {got}, but the current step is {expected}")]
    InvalidStep { expected: usize, got: usize },

    #[error("question flow already complete")]
    FlowComplete,

    #[error("question flow has not been started")]
    FlowNotStarted,

    #[error("cannot extract preferences from an empty transcript")]
    EmptyTranscript,

    #[error("conversation limit of {0} turns reached")]
    TurnLimitReached(usize),

    /// Participant identity is frozen once the first turn is recorded.
    #[error("participant identity cannot change after the conversation has started")]
    IdentityLocked,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwipeError {
    pub(crate) fn remote(endpoint: &str, detail: impl ToString) -> Self {
        SwipeError::RemoteUnavailable {
            endpoint: endpoint.to_string(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn malformed(endpoint: &str, detail: impl ToString) -> Self {
        SwipeError::MalformedResponse {
            endpoint: endpoint.to_string(),
            detail: detail.to_string(),
        }
    }

    /// True for any failure attributable to a remote endpoint.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SwipeError::RemoteUnavailable { .. } | SwipeError::MalformedResponse { .. }
        )
    }

    /// Text suitable for showing inline to the user.
    ///
    /// Malformed responses are reported exactly like unreachable endpoints.
    pub fn user_message(&self) -> String {
        if self.is_remote() {
            "The agent is unreachable right now. Please try again.".to_string()
        } else {
            self.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_and_malformed_are_both_remote() {
        assert!(SwipeError::remote("/api/chat", "refused").is_remote());
        assert!(SwipeError::malformed("/api/chat", "missing response").is_remote());
        assert!(!SwipeError::FlowComplete.is_remote());
    }

    #[test]
    fn test_malformed_user_message_matches_unavailable() {
        let a = SwipeError::remote("/api/chat", "timeout");
        let b = SwipeError::malformed("/api/extract-preferences", "bad json");
        assert_eq!(a.user_message(), b.user_message());
        assert!(a.user_message().contains("unreachable"));
    }

    #[test]
    fn test_invalid_step_display() {
        let e = SwipeError::InvalidStep { expected: 2, got: 0 };
        assert_eq!(
            e.to_string(),
            "answer submitted for step 0, but the current step is 2"
        );
    }

    #[test]
    fn test_non_remote_user_message_is_display() {
        let e = SwipeError::TurnLimitReached(8);
        assert_eq!(e.user_message(), "conversation limit of 8 turns reached");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: SwipeError = io.into();
        assert!(matches!(e, SwipeError::Io(_)));
    }
}
