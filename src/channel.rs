//! Negotiation session channel.
//!
//! [`NegotiationSession`] is the client-side state machine: it consumes
//! frames in arrival order, keeps the verbatim event log, and maintains the
//! per-round snapshots and the terminal outcome. It does no I/O.
//!
//! [`NegotiationChannel`] drives one WebSocket run: connect, send the single
//! initiating preference bundle, then feed every received frame into the
//! session until a failure, the server closing, or the optional idle
//! timeout expires.
//!
//! ```text
//! Idle -> Connecting -> Open -> RoundInProgress(n) <-> RoundSettled(n)
//!                          \            |                   /
//!                           +--> Succeeded | PartialSuccess | Failed
//! any -> Closed (transport closed; Disconnected if no terminal event)
//! ```

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::error::{Result, SwipeError};
use crate::events::{FinalProposal, NegotiationEvent, ProposalEvent};
use crate::preferences::PreferenceBundle;
use crate::session::now_ms;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    RoundInProgress(u32),
    RoundSettled(u32),
    Succeeded,
    PartialSuccess,
    Failed,
    Closed,
}

/// How a run ended, as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,
    /// Best attainable compromise, not full agreement.
    PartialSuccess { status: Option<String> },
    Failed { message: String },
    /// The transport closed before any terminal event.
    Disconnected,
}

/// Proposal metadata attached to a round.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalMeta {
    pub modifications_count: Option<u64>,
    pub total_cost: Option<f64>,
    pub reasoning: Option<String>,
    pub base_project: Option<Value>,
}

impl From<ProposalEvent> for ProposalMeta {
    fn from(p: ProposalEvent) -> Self {
        Self {
            modifications_count: p.modifications_count,
            total_cost: p.total_cost,
            reasoning: p.reasoning,
            base_project: p.base_project,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundSnapshot {
    pub round: u32,
    pub average_score: Option<f64>,
    pub scores: BTreeMap<String, f64>,
    pub proposal: Option<ProposalMeta>,
    /// Set once `round_complete` for this round has been seen.
    pub settled: bool,
}

impl RoundSnapshot {
    fn new(round: u32) -> Self {
        Self {
            round,
            average_score: None,
            scores: BTreeMap::new(),
            proposal: None,
            settled: false,
        }
    }
}

/// One received frame, stored verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    pub seq: usize,
    pub received_ms: u64,
    pub event: NegotiationEvent,
    pub raw: Value,
}

// ---------------------------------------------------------------------------
// NegotiationSession
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct NegotiationSession {
    state: ChannelState,
    outcome: Option<Outcome>,
    current_round: Option<u32>,
    rounds: BTreeMap<u32, RoundSnapshot>,
    log: Vec<LoggedEvent>,
    final_proposal: Option<FinalProposal>,
    status_message: Option<String>,
    completion_message: Option<String>,
}

impl Default for NegotiationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl NegotiationSession {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Idle,
            outcome: None,
            current_round: None,
            rounds: BTreeMap::new(),
            log: Vec::new(),
            final_proposal: None,
            status_message: None,
            completion_message: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Failed { .. }))
    }

    pub fn current_round(&self) -> Option<u32> {
        self.current_round
    }

    /// All rounds seen so far, ordered by round number.
    pub fn rounds(&self) -> impl Iterator<Item = &RoundSnapshot> {
        self.rounds.values()
    }

    pub fn round(&self, round: u32) -> Option<&RoundSnapshot> {
        self.rounds.get(&round)
    }

    /// The highest-numbered round seen.
    pub fn latest_round(&self) -> Option<&RoundSnapshot> {
        self.rounds.values().next_back()
    }

    pub fn log(&self) -> &[LoggedEvent] {
        &self.log
    }

    pub fn final_proposal(&self) -> Option<&FinalProposal> {
        self.final_proposal.as_ref()
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn completion_message(&self) -> Option<&str> {
        self.completion_message.as_deref()
    }

    /// Agent names in first-seen-round order, then alphabetically.
    pub fn agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = Vec::new();
        for snap in self.rounds.values() {
            for name in snap.scores.keys() {
                if !agents.contains(name) {
                    agents.push(name.clone());
                }
            }
        }
        agents
    }

    // -- transitions --------------------------------------------------------

    pub fn begin_connect(&mut self) {
        if self.state == ChannelState::Idle {
            self.state = ChannelState::Connecting;
        } else {
            warn!(state = ?self.state, "connect requested outside Idle, ignored");
        }
    }

    pub fn opened(&mut self) {
        if self.state == ChannelState::Connecting {
            self.state = ChannelState::Open;
        } else {
            warn!(state = ?self.state, "open reported outside Connecting, ignored");
        }
    }

    /// The transport is gone. A close without any terminal event is reported
    /// as `Disconnected`, never as a failed negotiation.
    pub fn transport_closed(&mut self) {
        if self.outcome.is_none() {
            self.outcome = Some(Outcome::Disconnected);
        }
        self.state = ChannelState::Closed;
    }

    /// Apply one text frame. Returns false when the frame was dropped because
    /// the session already failed or closed.
    pub fn apply_text(&mut self, text: &str) -> bool {
        let (event, raw) = NegotiationEvent::from_text(text);
        self.apply(event, raw)
    }

    /// Apply one decoded frame.
    pub fn apply_value(&mut self, raw: Value) -> bool {
        let event = NegotiationEvent::from_value(&raw);
        self.apply(event, raw)
    }

    fn apply(&mut self, event: NegotiationEvent, raw: Value) -> bool {
        if self.is_failed() || self.state == ChannelState::Closed {
            debug!(kind = event.kind(), "frame after failure or close dropped");
            return false;
        }
        if matches!(self.state, ChannelState::Idle | ChannelState::Connecting) {
            self.state = ChannelState::Open;
        }

        self.log.push(LoggedEvent {
            seq: self.log.len(),
            received_ms: now_ms(),
            event: event.clone(),
            raw,
        });

        let terminal = self.is_terminal();
        match event {
            NegotiationEvent::Status { message } => {
                self.status_message = Some(message);
            }
            NegotiationEvent::RoundStart { round } if !terminal => {
                self.rounds.entry(round).or_insert_with(|| RoundSnapshot::new(round));
                self.current_round = Some(round);
                self.state = ChannelState::RoundInProgress(round);
            }
            NegotiationEvent::Score(score) if !terminal => match score.round.or(self.current_round) {
                Some(round) => {
                    self.snapshot_mut(round).scores.insert(score.agent, score.score);
                }
                None => debug!(agent = %score.agent, "score before any round, not projected"),
            },
            NegotiationEvent::RoundComplete(rc) if !terminal => {
                let snap = self.snapshot_mut(rc.round);
                // Merge: a partial score map never drops scores already received.
                snap.scores.extend(rc.scores);
                snap.average_score = Some(rc.average_score);
                snap.settled = true;
                if self.current_round.map_or(true, |c| rc.round >= c) {
                    self.current_round = Some(rc.round);
                    self.state = ChannelState::RoundSettled(rc.round);
                }
            }
            NegotiationEvent::Proposal(p) if !terminal => match p.round.or(self.current_round) {
                Some(round) => {
                    self.snapshot_mut(round).proposal = Some(ProposalMeta::from(p));
                }
                None => debug!("proposal before any round, not projected"),
            },
            NegotiationEvent::Complete(c) => {
                self.completion_message = c.message.clone();
                let outcome = if c.is_success() {
                    Outcome::Success
                } else {
                    Outcome::PartialSuccess { status: c.status.clone() }
                };
                self.settle(outcome);
            }
            NegotiationEvent::FinalProposal(fp) => {
                info!(total_cost = fp.total_cost, modifications = fp.modification_count(), "final proposal received");
                self.final_proposal = Some(fp);
                if !terminal {
                    self.settle(Outcome::Success);
                }
            }
            // Overrides an earlier success or partial outcome.
            NegotiationEvent::Failed { message } => {
                warn!(%message, after_terminal = terminal, "negotiation failed");
                self.settle(Outcome::Failed { message });
            }
            NegotiationEvent::Unknown { kind } => {
                debug!(%kind, "unrecognised event logged only");
            }
            // Round events after a terminal outcome: logged only.
            _ => {}
        }
        true
    }

    fn settle(&mut self, outcome: Outcome) {
        self.state = match outcome {
            Outcome::Success => ChannelState::Succeeded,
            Outcome::PartialSuccess { .. } => ChannelState::PartialSuccess,
            Outcome::Failed { .. } => ChannelState::Failed,
            Outcome::Disconnected => ChannelState::Closed,
        };
        self.outcome = Some(outcome);
    }

    fn snapshot_mut(&mut self, round: u32) -> &mut RoundSnapshot {
        self.rounds.entry(round).or_insert_with(|| RoundSnapshot::new(round))
    }
}

// ---------------------------------------------------------------------------
// NegotiationChannel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket URL, e.g. `ws://localhost:8000/ws/negotiate`.
    pub url: String,
    /// Maximum silence between frames before the run is abandoned. `None`
    /// waits for as long as the server keeps the connection open; a
    /// negotiation can go quiet for minutes between `status` and
    /// `final_proposal`.
    pub idle_timeout: Option<Duration>,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

pub struct NegotiationChannel {
    config: ChannelConfig,
    updates: Option<mpsc::UnboundedSender<LoggedEvent>>,
}

impl NegotiationChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config, updates: None }
    }

    /// Receive a copy of every event as it is applied.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<LoggedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.updates = Some(tx);
        rx
    }

    /// Run one negotiation, feeding `session` until the run ends.
    ///
    /// The connection is always closed on return, and `session` always ends
    /// in `Closed`. Only a failure to connect or to send the initiating
    /// bundle is returned as an error.
    pub async fn run(&self, bundle: &PreferenceBundle, session: &mut NegotiationSession) -> Result<()> {
        session.begin_connect();
        info!(url = %self.config.url, participant = %bundle.participant_name, "opening negotiation channel");

        let ws = match tokio_tungstenite::connect_async(self.config.url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!(error = %e, url = %self.config.url, "connect failed");
                session.transport_closed();
                return Err(SwipeError::Channel(e.to_string()));
            }
        };
        session.opened();

        let (mut sink, mut stream) = ws.split();

        let initiating = serde_json::to_string(bundle).map_err(|e| SwipeError::Channel(e.to_string()))?;
        if let Err(e) = sink.send(WsMessage::Text(initiating)).await {
            warn!(error = %e, "sending preferences failed");
            session.transport_closed();
            return Err(SwipeError::Channel(e.to_string()));
        }

        loop {
            let next = match self.config.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, stream.next()).await,
                None => Ok(stream.next().await),
            };
            match next {
                Err(_) => {
                    warn!(timeout = ?self.config.idle_timeout, "no frame within idle timeout, closing");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "channel read error");
                    break;
                }
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    if session.apply_text(&text) {
                        if let (Some(tx), Some(last)) = (&self.updates, session.log().last()) {
                            let _ = tx.send(last.clone());
                        }
                    }
                    if session.is_failed() {
                        break;
                    }
                }
                Ok(Some(Ok(WsMessage::Close(_)))) => break,
                Ok(Some(Ok(_))) => {} // binary / ping / pong
            }
        }

        let _ = sink.close().await;
        session.transport_closed();
        info!(outcome = ?session.outcome(), events = session.log().len(), "negotiation channel closed");
        Ok(())
    }
}
