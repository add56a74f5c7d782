//! Typed negotiation events.
//!
//! Frames arrive as JSON objects with a `type` discriminator. Parsing never
//! fails: an unknown `type`, a known `type` with unusable fields, or a frame
//! that is not JSON at all becomes [`NegotiationEvent::Unknown`], which is
//! logged but drives no derived view.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoreEvent {
    #[serde(default)]
    pub round: Option<u32>,
    pub agent: String,
    pub score: f64,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoundComplete {
    pub round: u32,
    pub average_score: f64,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProposalEvent {
    #[serde(default)]
    pub round: Option<u32>,
    #[serde(default)]
    pub modifications_count: Option<u64>,
    #[serde(default)]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub base_project: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompleteEvent {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CompleteEvent {
    /// Full agreement, as opposed to a best attainable compromise.
    pub fn is_success(&self) -> bool {
        self.success == Some(true)
            || self
                .status
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("success"))
    }
}

/// The terminal proposal. Kept for display after the channel closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalProposal {
    #[serde(default)]
    pub base_project: Option<Value>,
    #[serde(default)]
    pub modifications: Vec<Value>,
    #[serde(default)]
    pub compensation: BTreeMap<String, f64>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifications_count: Option<u64>,
}

impl FinalProposal {
    /// Explicit count when sent, otherwise the number of listed modifications.
    pub fn modification_count(&self) -> u64 {
        self.modifications_count
            .unwrap_or(self.modifications.len() as u64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationEvent {
    Status { message: String },
    RoundStart { round: u32 },
    Score(ScoreEvent),
    RoundComplete(RoundComplete),
    Proposal(ProposalEvent),
    Complete(CompleteEvent),
    FinalProposal(FinalProposal),
    /// `failed` or `error`.
    Failed { message: String },
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct StatusFields {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct RoundStartFields {
    round: u32,
}

#[derive(Deserialize)]
struct FailureFields {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl NegotiationEvent {
    /// Parse one decoded frame.
    pub fn from_value(value: &Value) -> Self {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let parsed = match kind.as_str() {
            "status" => from(value).map(|f: StatusFields| NegotiationEvent::Status { message: f.message }),
            "round_start" => from(value).map(|f: RoundStartFields| NegotiationEvent::RoundStart { round: f.round }),
            "score" => from(value).map(NegotiationEvent::Score),
            "round_complete" => from(value).map(NegotiationEvent::RoundComplete),
            "proposal" => from(value).map(NegotiationEvent::Proposal),
            "complete" => from(value).map(NegotiationEvent::Complete),
            "final_proposal" => from(value).map(NegotiationEvent::FinalProposal),
            "failed" | "error" => from(value).map(|f: FailureFields| NegotiationEvent::Failed {
                message: f
                    .message
                    .or(f.error)
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "negotiation failed".to_string()),
            }),
            _ => None,
        };

        parsed.unwrap_or(NegotiationEvent::Unknown { kind })
    }

    /// Parse a text frame. Non-JSON text yields `Unknown` with kind `invalid`
    /// and the text wrapped as a JSON string.
    pub fn from_text(text: &str) -> (Self, Value) {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => (Self::from_value(&value), value),
            Err(_) => (
                NegotiationEvent::Unknown {
                    kind: "invalid".to_string(),
                },
                Value::String(text.to_string()),
            ),
        }
    }

    /// The `type` string this event was parsed from.
    pub fn kind(&self) -> &str {
        match self {
            NegotiationEvent::Status { .. } => "status",
            NegotiationEvent::RoundStart { .. } => "round_start",
            NegotiationEvent::Score(_) => "score",
            NegotiationEvent::RoundComplete(_) => "round_complete",
            NegotiationEvent::Proposal(_) => "proposal",
            NegotiationEvent::Complete(_) => "complete",
            NegotiationEvent::FinalProposal(_) => "final_proposal",
            NegotiationEvent::Failed { .. } => "failed",
            NegotiationEvent::Unknown { kind } => kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationEvent::Complete(_) | NegotiationEvent::FinalProposal(_) | NegotiationEvent::Failed { .. }
        )
    }
}

fn from<T: serde::de::DeserializeOwned>(value: &Value) -> Option<T> {
    T::deserialize(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_round_start_parses() {
        let e = NegotiationEvent::from_value(&json!({"type": "round_start", "round": 2}));
        assert_eq!(e, NegotiationEvent::RoundStart { round: 2 });
    }

    #[test]
    fn test_score_accepts_integer_score() {
        let e = NegotiationEvent::from_value(&json!({"type": "score", "agent": "A", "score": 4, "round": 1}));
        match e {
            NegotiationEvent::Score(s) => {
                assert_eq!(s.score, 4.0);
                assert_eq!(s.round, Some(1));
                assert!(s.explanation.is_none());
            }
            other => panic!("expected score, got {other:?}"),
        }
    }

    #[test]
    fn test_round_complete_parses_scores() {
        let e = NegotiationEvent::from_value(&json!({
            "type": "round_complete", "round": 1, "average_score": 3.5, "scores": {"A": 4, "B": 3}
        }));
        match e {
            NegotiationEvent::RoundComplete(rc) => {
                assert_eq!(rc.average_score, 3.5);
                assert_eq!(rc.scores.get("B"), Some(&3.0));
            }
            other => panic!("expected round_complete, got {other:?}"),
        }
    }

    #[rstest]
    #[case(json!({"type": "failed", "message": "budget exceeded"}), "budget exceeded")]
    #[case(json!({"type": "error", "error": "boom"}), "boom")]
    #[case(json!({"type": "error"}), "negotiation failed")]
    #[case(json!({"type": "failed", "message": "  "}), "negotiation failed")]
    fn test_failure_messages(#[case] frame: Value, #[case] expected: &str) {
        assert_eq!(
            NegotiationEvent::from_value(&frame),
            NegotiationEvent::Failed {
                message: expected.to_string()
            }
        );
    }

    #[rstest]
    #[case(json!({"success": true}), true)]
    #[case(json!({"status": "SUCCESS"}), true)]
    #[case(json!({"status": "pareto_optimal"}), false)]
    #[case(json!({}), false)]
    fn test_complete_success_indicator(#[case] fields: Value, #[case] expected: bool) {
        let c: CompleteEvent = serde_json::from_value(fields).unwrap();
        assert_eq!(c.is_success(), expected);
    }

    #[test]
    fn test_unknown_type_is_unknown() {
        let e = NegotiationEvent::from_value(&json!({"type": "heartbeat"}));
        assert_eq!(e.kind(), "heartbeat");
        assert!(matches!(e, NegotiationEvent::Unknown { .. }));
    }

    #[test]
    fn test_malformed_known_type_is_unknown() {
        let e = NegotiationEvent::from_value(&json!({"type": "round_start", "round": "two"}));
        assert_eq!(e, NegotiationEvent::Unknown { kind: "round_start".into() });
    }

    #[test]
    fn test_missing_type_is_unknown_empty_kind() {
        let e = NegotiationEvent::from_value(&json!({"round": 1}));
        assert_eq!(e.kind(), "");
    }

    #[test]
    fn test_from_text_invalid_json() {
        let (e, raw) = NegotiationEvent::from_text("not json");
        assert_eq!(e.kind(), "invalid");
        assert_eq!(raw, Value::String("not json".into()));
    }

    #[test]
    fn test_final_proposal_modification_count_falls_back_to_len() {
        let fp: FinalProposal = serde_json::from_value(json!({
            "total_cost": 100.0, "modifications": [{"type": "a"}, {"type": "b"}]
        }))
        .unwrap();
        assert_eq!(fp.modification_count(), 2);
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(NegotiationEvent::Failed { message: "x".into() }.is_terminal());
        assert!(!NegotiationEvent::RoundStart { round: 1 }.is_terminal());
    }
}
