//! Tests for the chat-driven extraction client and the session store.

mod common;

use common::*;
use std::sync::Arc;

use policy_swipe::conversation::{ChatEntry, Conversation};
use policy_swipe::preferences::{format_output, PreferenceValue};
use policy_swipe::session::{Participant, SessionStore, TurnRole};
use policy_swipe::SwipeError;

#[tokio::test]
async fn test_send_appends_both_turns() {
    let fake = Arc::new(FakeService::new().with_chat(vec![Some("What worries you most?")]));
    let mut convo = Conversation::new(fake.clone(), alice());

    let reply = convo.send("Noise at night").await.unwrap();
    assert_eq!(reply, "What worries you most?");

    let transcript = convo.store().transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, TurnRole::User);
    assert_eq!(transcript[0].content, "Noise at night");
    assert_eq!(transcript[1].role, TurnRole::Assistant);
    // History sent excludes the message being sent.
    assert_eq!(*fake.chat_history_lens.lock().unwrap(), vec![0]);
}

#[tokio::test]
async fn test_failed_send_leaves_transcript_and_shows_notice() {
    let fake = Arc::new(FakeService::new().with_chat(vec![None, Some("ok")]));
    let mut convo = Conversation::new(fake.clone(), alice());

    let err = convo.send("hello").await.unwrap_err();
    assert!(err.is_remote());
    assert!(convo.store().transcript().is_empty());
    match convo.display().last() {
        Some(ChatEntry::Notice(text)) => assert!(text.contains("unreachable")),
        other => panic!("expected a notice, got {other:?}"),
    }

    // The same message can be sent again.
    convo.send("hello").await.unwrap();
    assert_eq!(convo.store().transcript().len(), 2);
    assert_eq!(*fake.chat_history_lens.lock().unwrap(), vec![0, 0]);
}

#[tokio::test]
async fn test_turn_limit() {
    let fake = Arc::new(FakeService::new().with_chat(vec![Some("a"), Some("b")]));
    let mut convo = Conversation::new(fake.clone(), alice()).with_max_turns(1);
    convo.send("one").await.unwrap();
    assert_eq!(convo.remaining_turns(), 0);
    let err = convo.send("two").await.unwrap_err();
    assert!(matches!(err, SwipeError::TurnLimitReached(1)));
    assert_eq!(fake.count("chat"), 1);
}

#[tokio::test]
async fn test_extract_on_empty_transcript_rejected_locally() {
    let fake = Arc::new(FakeService::new());
    let mut convo = Conversation::new(fake.clone(), alice());
    let err = convo.extract().await.unwrap_err();
    assert!(matches!(err, SwipeError::EmptyTranscript));
    assert_eq!(fake.count("extract"), 0);
}

#[tokio::test]
async fn test_extract_replaces_preferences_wholesale() {
    let prefs = mapping(&[
        ("max_noise_db", PreferenceValue::Number(60.0)),
        ("quiet_hours", PreferenceValue::Unspecified),
    ]);
    let fake = Arc::new(
        FakeService::new()
            .with_chat(vec![Some("noted"), Some("noted again")])
            .with_extraction(output_for(&alice(), prefs.clone())),
    );
    let mut convo = Conversation::new(fake.clone(), alice());
    convo.send("Keep it quiet").await.unwrap();

    let extracted = convo.extract().await.unwrap();
    assert_eq!(extracted.preferences, prefs);

    let narrower = mapping(&[("max_noise_db", PreferenceValue::Number(55.0))]);
    *fake.extraction.lock().unwrap() = Some(output_for(&alice(), narrower.clone()));
    convo.send("Actually 55").await.unwrap();
    convo.extract().await.unwrap();

    let held = convo.store().preferences().unwrap();
    assert_eq!(held.preferences, narrower);
    assert!(held.preferences.get("quiet_hours").is_none());
}

#[tokio::test]
async fn test_extract_failure_keeps_previous_preferences() {
    let prefs = mapping(&[("budget", PreferenceValue::Number(10.0))]);
    let fake = Arc::new(
        FakeService::new()
            .with_chat(vec![Some("ok")])
            .with_extraction(output_for(&alice(), prefs.clone())),
    );
    let mut convo = Conversation::new(fake.clone(), alice());
    convo.send("hi").await.unwrap();
    convo.extract().await.unwrap();

    *fake.extraction.lock().unwrap() = None;
    assert!(convo.extract().await.is_err());
    assert_eq!(convo.store().preferences().unwrap().preferences, prefs);
}

#[tokio::test]
async fn test_output_formats_canonical_block() {
    let prefs = mapping(&[
        ("max_noise_db", PreferenceValue::Number(60.0)),
        ("quiet_hours", PreferenceValue::Unspecified),
    ]);
    let fake = Arc::new(
        FakeService::new()
            .with_chat(vec![Some("ok")])
            .with_extraction(output_for(&alice(), prefs)),
    );
    let mut convo = Conversation::new(fake, alice());
    convo.send("hi").await.unwrap();
    convo.extract().await.unwrap();

    assert_eq!(
        format_output(&convo.output()),
        "PARTICIPANTS:\n\nAlice (neighbor):\n  - max_noise_db: 60.0\n  - quiet_hours: None"
    );
}

#[test]
fn test_bundle_before_extraction_is_empty() {
    let store = SessionStore::new(alice());
    let bundle = store.bundle();
    assert_eq!(bundle.participant_name, "Alice");
    assert!(bundle.preferences.is_empty());
}

#[tokio::test]
async fn test_identity_locked_after_first_turn() {
    let fake = Arc::new(FakeService::new().with_chat(vec![Some("ok")]));
    let mut convo = Conversation::new(fake, alice());
    convo.send("hi").await.unwrap();
    let mut store = convo.into_store();
    let err = store
        .set_participant(Participant::new("Mallory", "owner", ""))
        .unwrap_err();
    assert!(matches!(err, SwipeError::IdentityLocked));
    assert_eq!(store.participant().name, "Alice");
}
