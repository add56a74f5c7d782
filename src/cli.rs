use crate::config::AppConfig;
use crate::error::Result;
use crate::flow::FlowMode;
use crate::session::Participant;
use clap::{Args as ClapArgs, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "policy-swipe")]
#[command(version)]
#[command(about = "Collect policy preferences by chat or swipe, then watch agents negotiate them")]
pub struct Args {
    /// TOML config file (defaults to ./policy-swipe.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the preference API
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct ParticipantArgs {
    /// Participant name
    #[arg(long)]
    pub name: String,

    /// Stakeholder role (e.g. neighbor, business owner)
    #[arg(long)]
    pub role: String,

    /// Short self-description used to personalise questions
    #[arg(long, default_value = "")]
    pub description: String,
}

impl ParticipantArgs {
    pub fn participant(&self) -> Participant {
        Participant::new(self.name.clone(), self.role.clone(), self.description.clone())
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Talk to the preference agent, then extract preferences
    Chat {
        #[command(flatten)]
        participant: ParticipantArgs,

        /// Maximum user messages before extraction
        #[arg(long)]
        max_turns: Option<usize>,
    },

    /// Answer agree/disagree questions
    Swipe {
        #[command(flatten)]
        participant: ParticipantArgs,

        /// Question source: scripted scenario or remote-generated
        #[arg(long, value_enum)]
        mode: Option<FlowMode>,

        /// Upper bound on questions in dynamic mode
        #[arg(long)]
        max_steps: Option<usize>,
    },

    /// Run a negotiation from a hand-off URL or blob and render it live
    Negotiate {
        /// Hand-off URL (`...?prefs=...`) or bare blob
        #[arg(long)]
        handoff: String,

        /// Negotiation WebSocket URL
        #[arg(long)]
        ws_url: Option<String>,

        /// Seconds without a frame before giving up (0 waits indefinitely)
        #[arg(long)]
        idle_timeout: Option<u64>,

        /// Print the full event log after the run
        #[arg(long)]
        show_log: bool,
    },

    /// Format an extraction result file
    Format {
        /// JSON file holding an extraction result
        path: PathBuf,

        /// Ask the API to format instead of formatting locally
        #[arg(long)]
        remote: bool,
    },

    /// Serve a recorded negotiation over WebSocket
    Replay {
        /// JSON-lines event script
        #[arg(long)]
        script: PathBuf,

        #[arg(long, default_value = "8000")]
        port: u16,

        /// Delay between replayed frames
        #[arg(long, default_value = "500")]
        delay_ms: u64,
    },

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Args {
    /// File, then environment, then these flags.
    pub fn resolve_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        config.apply_env();
        self.apply_flags(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply_flags(&self, config: &mut AppConfig) {
        if let Some(url) = &self.api_url {
            config.api.base_url = url.clone();
        }
        match &self.command {
            Command::Chat { max_turns: Some(n), .. } => config.chat.max_turns = *n,
            Command::Swipe { mode, max_steps, .. } => {
                if let Some(mode) = mode {
                    config.flow.mode = *mode;
                }
                if let Some(n) = max_steps {
                    config.flow.max_steps = *n;
                }
            }
            Command::Negotiate { ws_url, idle_timeout, .. } => {
                if let Some(url) = ws_url {
                    config.negotiation.ws_url = url.clone();
                }
                if let Some(secs) = idle_timeout {
                    config.negotiation.idle_timeout_secs = *secs;
                }
            }
            _ => {}
        }
    }
}
