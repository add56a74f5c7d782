//! Application configuration.
//!
//! Resolution order, later wins: built-in defaults, the TOML file
//! (`--config <path>` or `./policy-swipe.toml` when present), environment
//! overrides, then command-line flags (applied by the binary).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::api::{ApiClient, ApiClientBuilder};
use crate::channel::ChannelConfig;
use crate::conversation::DEFAULT_MAX_TURNS;
use crate::error::{Result, SwipeError};
use crate::flow::{FlowMode, DEFAULT_MAX_STEPS};

pub const DEFAULT_CONFIG_FILE: &str = "policy-swipe.toml";
pub const ENV_API_URL: &str = "POLICY_SWIPE_API_URL";
pub const ENV_WS_URL: &str = "POLICY_SWIPE_WS_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationSection {
    pub ws_url: String,
    /// Seconds of silence before a run is abandoned; 0 waits indefinitely.
    pub idle_timeout_secs: u64,
    /// Page the hand-off URL points at.
    pub handoff_base: String,
}

impl Default for NegotiationSection {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000/ws/negotiate".to_string(),
            idle_timeout_secs: 0,
            handoff_base: "http://localhost:3000/negotiate".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSection {
    pub mode: FlowMode,
    pub max_steps: usize,
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            mode: FlowMode::Scripted,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    pub max_turns: usize,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiSection,
    pub negotiation: NegotiationSection,
    pub flow: FlowSection,
    pub chat: ChatSection,
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SwipeError::Config(e.to_string()))
    }

    /// Load `path`, or `./policy-swipe.toml` when no path is given. A missing
    /// default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        if !explicit && !path.exists() {
            debug!("no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| SwipeError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api.base_url = url;
        }
        if let Some(url) = lookup(ENV_WS_URL).filter(|v| !v.trim().is_empty()) {
            self.negotiation.ws_url = url;
        }
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(SwipeError::Config("api.base_url cannot be empty".into()));
        }
        if self.negotiation.ws_url.trim().is_empty() {
            return Err(SwipeError::Config("negotiation.ws_url cannot be empty".into()));
        }
        if self.api.connect_timeout_secs == 0 || self.api.request_timeout_secs == 0 {
            return Err(SwipeError::Config("api timeouts cannot be 0".into()));
        }
        if self.flow.max_steps == 0 {
            return Err(SwipeError::Config("flow.max_steps cannot be 0".into()));
        }
        if self.chat.max_turns == 0 {
            return Err(SwipeError::Config("chat.max_turns cannot be 0".into()));
        }
        Ok(())
    }

    pub fn api_client(&self) -> ApiClient {
        ApiClientBuilder::new(self.api.base_url.clone())
            .connect_timeout(Duration::from_secs(self.api.connect_timeout_secs))
            .request_timeout(Duration::from_secs(self.api.request_timeout_secs))
            .build()
    }

    pub fn channel_config(&self) -> ChannelConfig {
        let idle = self.negotiation.idle_timeout_secs;
        ChannelConfig::new(self.negotiation.ws_url.clone())
            .with_idle_timeout((idle > 0).then(|| Duration::from_secs(idle)))
    }
}
