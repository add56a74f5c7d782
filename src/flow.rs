//! Question flow controller.
//!
//! Presents a bounded sequence of questions and collects one answer per step.
//! Two shapes are supported:
//!
//! - **Scripted**: a fixed three-question scenario, each question optionally
//!   carrying a follow-up triggered by the primary answer.
//! - **Dynamic**: the next question is requested from the remote side after
//!   every answer, up to `max_steps`, finishing early when the remote side
//!   reports it has enough information.
//!
//! On completion the answers are sent for finalization. A failed
//! finalization degrades to the last preferences the flow held; it never
//! leaves the flow hanging.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::{AnswersRequest, NextQuestion, NextQuestionRequest, PreferenceService};
use crate::error::{Result, SwipeError};
use crate::preferences::{ParticipantPreferences, PreferenceMapping};
use crate::session::{Answer, Participant, SessionStore};

pub const DEFAULT_MAX_STEPS: usize = 12;

pub const AGREE: &str = "agree";
pub const DISAGREE: &str = "disagree";

/// Asked whenever question generation fails or returns nothing usable.
pub const FALLBACK_QUESTION: &str =
    "Is there anything else about this policy that matters to you, such as a cost, a limit or a date?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMode {
    Scripted,
    Dynamic,
}

impl std::fmt::Display for FlowMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowMode::Scripted => write!(f, "scripted"),
            FlowMode::Dynamic => write!(f, "dynamic"),
        }
    }
}

// ---------------------------------------------------------------------------
// Questions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FollowUpTrigger {
    Always,
    /// Only when the primary answer matches (case-insensitive).
    OnAnswer(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub prompt: String,
    pub trigger: FollowUpTrigger,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub prompt: String,
    /// Scenario text shown above the prompt.
    pub context: Option<String>,
    pub follow_up: Option<FollowUp>,
}

impl Question {
    pub fn plain(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
            follow_up: None,
        }
    }

    /// The follow-up to ask after `answer`, if any.
    pub fn follow_up_for(&self, answer: &str) -> Option<&FollowUp> {
        self.follow_up.as_ref().filter(|f| match &f.trigger {
            FollowUpTrigger::Always => true,
            FollowUpTrigger::OnAnswer(expected) => expected.eq_ignore_ascii_case(answer.trim()),
        })
    }
}

/// The fixed three-step scenario.
pub fn scripted_questions() -> Vec<Question> {
    vec![
        Question {
            prompt: "Indoor venues should require masks whenever local case rates exceed 50 per 100k.".into(),
            context: Some(
                "Your city is drafting its winter respiratory-illness policy with a monthly budget of $50M."
                    .into(),
            ),
            follow_up: Some(FollowUp {
                prompt: "What case rate, if any, would make a mask requirement acceptable to you?".into(),
                trigger: FollowUpTrigger::OnAnswer(DISAGREE.into()),
            }),
        },
        Question {
            prompt: "Restaurants and shops should cap indoor capacity at 50% during outbreaks, with monthly compensation for lost revenue.".into(),
            context: Some("Small businesses report revenue drops of 20-40% under capacity limits.".into()),
            follow_up: Some(FollowUp {
                prompt: "What monthly compensation would make the cap fair for an affected business?".into(),
                trigger: FollowUpTrigger::OnAnswer(AGREE.into()),
            }),
        },
        Question {
            prompt: "Schools should stay in person with weekly testing rather than switch to remote learning.".into(),
            context: Some("Testing costs roughly $25 per student per week.".into()),
            follow_up: Some(FollowUp {
                prompt: "How many hours a day of mask wearing is reasonable for school-age children?".into(),
                trigger: FollowUpTrigger::Always,
            }),
        },
    ]
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FlowOutcome {
    pub answers: Vec<Answer>,
    pub preferences: ParticipantPreferences,
    /// True when finalization failed and the last held preferences were used.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowStep {
    Next(Question),
    Complete(FlowOutcome),
}

pub struct QuestionFlow {
    service: Arc<dyn PreferenceService>,
    /// Identity, the recorded answers and the finalized preferences.
    store: SessionStore,
    mode: FlowMode,
    max_steps: usize,
    script: Vec<Question>,
    step: usize,
    current: Option<Question>,
    held: PreferenceMapping,
    complete: bool,
}

impl QuestionFlow {
    pub fn new(service: Arc<dyn PreferenceService>, participant: Participant, mode: FlowMode, max_steps: usize) -> Self {
        Self::with_store(service, SessionStore::new(participant), mode, max_steps)
    }

    /// Drive the flow on an existing session; answers are recorded into it.
    pub fn with_store(service: Arc<dyn PreferenceService>, store: SessionStore, mode: FlowMode, max_steps: usize) -> Self {
        let script = match mode {
            FlowMode::Scripted => scripted_questions(),
            FlowMode::Dynamic => Vec::new(),
        };
        Self {
            service,
            store,
            mode,
            max_steps,
            script,
            step: 0,
            current: None,
            held: PreferenceMapping::new(),
            complete: false,
        }
    }

    pub fn scripted(service: Arc<dyn PreferenceService>, participant: Participant) -> Self {
        Self::new(service, participant, FlowMode::Scripted, DEFAULT_MAX_STEPS)
    }

    pub fn dynamic(service: Arc<dyn PreferenceService>, participant: Participant, max_steps: usize) -> Self {
        Self::new(service, participant, FlowMode::Dynamic, max_steps)
    }

    /// Replace the scripted questions. Has no effect on a dynamic flow.
    pub fn with_script(mut self, script: Vec<Question>) -> Self {
        if self.mode == FlowMode::Scripted {
            self.script = script;
        }
        self
    }

    pub fn mode(&self) -> FlowMode {
        self.mode
    }

    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.current.as_ref()
    }

    pub fn answers(&self) -> &[Answer] {
        self.store.answers()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn into_store(self) -> SessionStore {
        self.store
    }

    /// Preferences as of the last successful update.
    pub fn held_preferences(&self) -> &PreferenceMapping {
        &self.held
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn step_limit(&self) -> usize {
        match self.mode {
            FlowMode::Scripted => self.script.len().min(self.max_steps),
            FlowMode::Dynamic => self.max_steps,
        }
    }

    /// Present the first question. For a flow with no steps at all this
    /// completes immediately.
    pub async fn start(&mut self) -> Result<FlowStep> {
        if self.complete {
            return Err(SwipeError::FlowComplete);
        }
        if let Some(q) = &self.current {
            return Ok(FlowStep::Next(q.clone()));
        }
        if self.step_limit() == 0 {
            return Ok(FlowStep::Complete(self.finish().await));
        }
        match self.mode {
            FlowMode::Scripted => {
                let first = self.script[0].clone();
                self.current = Some(first.clone());
                Ok(FlowStep::Next(first))
            }
            FlowMode::Dynamic => self.advance_dynamic().await,
        }
    }

    /// Record the answer for `step_index` and move on.
    ///
    /// `follow_up_answer` is kept only when the current question's follow-up
    /// applies to `answer`.
    pub async fn submit_answer(
        &mut self,
        step_index: usize,
        answer: &str,
        follow_up_answer: Option<&str>,
    ) -> Result<FlowStep> {
        if self.complete {
            return Err(SwipeError::FlowComplete);
        }
        let question = self.current.as_ref().ok_or(SwipeError::FlowNotStarted)?;
        if step_index != self.step {
            return Err(SwipeError::InvalidStep {
                expected: self.step,
                got: step_index,
            });
        }

        let follow_up = match (question.follow_up_for(answer), follow_up_answer) {
            (Some(_), Some(text)) => Some(text.to_string()),
            (None, Some(_)) => {
                debug!(step = step_index, "follow-up answer ignored, follow-up not triggered");
                None
            }
            (_, None) => None,
        };
        self.store.record_answer(Answer::new(question.prompt.clone(), answer, follow_up));
        self.step += 1;
        self.current = None;

        match self.mode {
            FlowMode::Scripted => {
                if self.step >= self.step_limit() {
                    return Ok(FlowStep::Complete(self.finish().await));
                }
                let next = self.script[self.step].clone();
                self.current = Some(next.clone());
                Ok(FlowStep::Next(next))
            }
            FlowMode::Dynamic => {
                self.refresh_preferences().await;
                if self.store.answers().len() >= self.max_steps {
                    return Ok(FlowStep::Complete(self.finish().await));
                }
                self.advance_dynamic().await
            }
        }
    }

    /// Finish now, e.g. when the caller has been told enough information was
    /// collected.
    pub async fn finish_early(&mut self) -> Result<FlowOutcome> {
        if self.complete {
            return Err(SwipeError::FlowComplete);
        }
        Ok(self.finish().await)
    }

    fn answers_request(&self) -> AnswersRequest {
        AnswersRequest::new(self.store.participant(), self.store.answers())
    }

    async fn refresh_preferences(&mut self) {
        match self.service.update_preferences(&self.answers_request()).await {
            Ok(prefs) => self.held = prefs,
            Err(e) => warn!(error = %e, "preference update failed, keeping previous preferences"),
        }
    }

    async fn advance_dynamic(&mut self) -> Result<FlowStep> {
        let participant = self.store.participant();
        let request = NextQuestionRequest {
            user_name: participant.name.clone(),
            user_role: participant.role.clone(),
            user_description: participant.description.clone(),
            previous_answers: self.store.answers().to_vec(),
            current_preferences: self.held.clone(),
            question_count: self.store.answers().len(),
        };
        let question = match self.service.generate_next_question(&request).await {
            Ok(NextQuestion::Ask(prompt)) => Question::plain(prompt),
            Ok(NextQuestion::Complete) => {
                info!(answers = self.store.answers().len(), "remote reported enough information");
                return Ok(FlowStep::Complete(self.finish().await));
            }
            Err(e) => {
                warn!(error = %e, "question generation failed, using fallback question");
                Question::plain(FALLBACK_QUESTION)
            }
        };
        self.current = Some(question.clone());
        Ok(FlowStep::Next(question))
    }

    async fn finish(&mut self) -> FlowOutcome {
        self.complete = true;
        self.current = None;

        let participant = self.store.participant();
        let result = self
            .service
            .finalize_preferences(&self.answers_request(), participant)
            .await;

        let (preferences, degraded) = match result {
            Ok(output) => match output.primary_for(participant) {
                Some(p) => (p.clone(), false),
                None => (ParticipantPreferences::new(participant, self.held.clone()), true),
            },
            Err(e) => {
                warn!(error = %e, "finalization failed, using last held preferences");
                (ParticipantPreferences::new(participant, self.held.clone()), true)
            }
        };
        self.store.replace_preferences(preferences.clone());

        info!(session = %self.store.id(), answers = self.store.answers().len(), degraded, "question flow complete");
        FlowOutcome {
            answers: self.store.answers().to_vec(),
            preferences,
            degraded,
        }
    }
}
