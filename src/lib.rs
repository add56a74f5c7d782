//! policy-swipe: collect a participant's policy preferences by chat or by
//! agree/disagree questions, hand them off, and follow a live multi-agent
//! negotiation over WebSocket.

pub mod api;
pub mod channel;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod flow;
pub mod handoff;
pub mod preferences;
pub mod replay;
pub mod session;
pub mod view;

pub use api::{ApiClient, PreferenceService};
pub use channel::{ChannelState, NegotiationChannel, NegotiationSession, Outcome};
pub use config::AppConfig;
pub use conversation::Conversation;
pub use error::{Result, SwipeError};
pub use events::NegotiationEvent;
pub use flow::{FlowMode, FlowStep, QuestionFlow};
pub use preferences::{format_output, PreferenceBundle, PreferenceMapping, PreferenceValue, PreferencesOutput};
pub use session::{Participant, SessionStore};
pub use view::NegotiationView;
