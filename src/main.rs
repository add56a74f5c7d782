use clap::{CommandFactory, Parser};
use colored::*;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use policy_swipe::api::PreferenceService;
use policy_swipe::channel::{NegotiationChannel, NegotiationSession};
use policy_swipe::cli::{Args, Command};
use policy_swipe::config::AppConfig;
use policy_swipe::conversation::{ChatEntry, Conversation};
use policy_swipe::flow::{FlowStep, QuestionFlow, AGREE, DISAGREE};
use policy_swipe::preferences::{format_output, PreferenceBundle, PreferencesOutput};
use policy_swipe::replay::{self, ReplayScript};
use policy_swipe::session::Participant;
use policy_swipe::view::{describe_event, NegotiationView};
use policy_swipe::{handoff, SwipeError};

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("policy_swipe=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Command::Completions { shell } = &args.command {
        clap_complete::generate(*shell, &mut Args::command(), "policy-swipe", &mut std::io::stdout());
        return Ok(());
    }

    let config = args.resolve_config()?;

    match &args.command {
        Command::Chat { participant, .. } => run_chat(&config, participant.participant()).await?,
        Command::Swipe { participant, .. } => run_swipe(&config, participant.participant()).await?,
        Command::Negotiate { handoff, show_log, .. } => run_negotiate(&config, handoff, *show_log).await?,
        Command::Format { path, remote } => run_format(&config, path, *remote).await?,
        Command::Replay { script, port, delay_ms } => run_replay(script, *port, *delay_ms).await?,
        Command::Completions { .. } => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Terminal input
// ---------------------------------------------------------------------------

async fn prompt(input: &mut Input, label: &str) -> std::io::Result<Option<String>> {
    print!("{} ", label.bright_yellow());
    std::io::stdout().flush()?;
    Ok(input.next_line().await?.map(|l| l.trim().to_string()))
}

/// `a`/`y`/`agree` or `d`/`n`/`disagree`.
fn parse_swipe(input: &str) -> Option<&'static str> {
    match input.to_lowercase().as_str() {
        "a" | "y" | "yes" | "agree" | "right" => Some(AGREE),
        "d" | "n" | "no" | "disagree" | "left" => Some(DISAGREE),
        _ => None,
    }
}

fn print_participant(participant: &Participant) {
    println!("{}", "POLICY SWIPE".bright_cyan().bold());
    println!("{}: {}", "Participant".bright_yellow(), participant.name.bright_white());
    println!("{}: {}", "Role".bright_yellow(), participant.role);
    println!("{}", "=".repeat(50).bright_blue());
}

fn print_result(config: &AppConfig, bundle: &PreferenceBundle) -> Result<(), SwipeError> {
    println!();
    println!("{}", format_output(&PreferencesOutput::single(bundle.clone())));
    println!();
    let url = handoff::to_url(&config.negotiation.handoff_base, bundle)?;
    println!("{} {}", "Hand-off:".bright_green(), url);
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn run_chat(config: &AppConfig, participant: Participant) -> Result<(), SwipeError> {
    let service: Arc<dyn PreferenceService> = Arc::new(config.api_client());
    let mut conversation = Conversation::new(service, participant).with_max_turns(config.chat.max_turns);
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    print_participant(conversation.store().participant());
    println!("{}", "Type your thoughts; an empty line or `done` ends the conversation.".dimmed());

    while conversation.remaining_turns() > 0 {
        let Some(line) = prompt(&mut input, "you>").await? else { break };
        if line.is_empty() || line.eq_ignore_ascii_case("done") {
            break;
        }
        match conversation.send(&line).await {
            Ok(reply) => println!("{} {}", "agent>".bright_cyan(), reply),
            Err(e) => {
                if let Some(ChatEntry::Notice(notice)) = conversation.display().last() {
                    println!("{}", notice.bright_red());
                } else {
                    println!("{}", e.to_string().bright_red());
                }
            }
        }
    }

    if conversation.store().user_turns() == 0 {
        println!("{}", "Nothing to extract.".dimmed());
        return Ok(());
    }

    println!("{}", "Extracting preferences...".dimmed());
    if let Err(e) = conversation.extract().await {
        warn!(error = %e, "extraction failed");
        println!("{}", e.user_message().bright_red());
    }
    print_result(config, &conversation.store().bundle())
}

async fn run_swipe(config: &AppConfig, participant: Participant) -> Result<(), SwipeError> {
    let service: Arc<dyn PreferenceService> = Arc::new(config.api_client());
    let mut flow = QuestionFlow::new(service, participant.clone(), config.flow.mode, config.flow.max_steps);
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    print_participant(&participant);
    println!("{}", "Answer a(gree) or d(isagree); `done` finishes early.".dimmed());

    let mut step = flow.start().await?;
    let outcome = loop {
        let question = match step {
            FlowStep::Complete(outcome) => break outcome,
            FlowStep::Next(q) => q,
        };
        println!();
        if let Some(context) = &question.context {
            println!("{}", context.dimmed());
        }
        println!("{} {}", format!("Q{}:", flow.current_step() + 1).bright_green().bold(), question.prompt);

        let Some(line) = prompt(&mut input, ">").await? else {
            break flow.finish_early().await?;
        };
        if line.eq_ignore_ascii_case("done") {
            break flow.finish_early().await?;
        }
        let answer = match parse_swipe(&line) {
            Some(a) => a.to_string(),
            // Free text is accepted as-is for generated questions.
            None if question.follow_up.is_none() && !line.is_empty() => line,
            None => {
                println!("{}", "Please answer agree or disagree.".bright_red());
                step = FlowStep::Next(question);
                continue;
            }
        };

        let follow_up = match question.follow_up_for(&answer) {
            Some(f) => prompt(&mut input, &format!("{} >", f.prompt)).await?.filter(|s| !s.is_empty()),
            None => None,
        };
        step = flow
            .submit_answer(flow.current_step(), &answer, follow_up.as_deref())
            .await?;
    };

    if outcome.degraded {
        println!("{}", "Could not finalize with the agent; showing the preferences collected so far.".bright_yellow());
    }
    let store = flow.into_store();
    info!(session = %store.id(), answers = store.answers().len(), "swipe session finished");
    print_result(config, &store.bundle())
}

async fn run_negotiate(config: &AppConfig, handoff_input: &str, show_log: bool) -> Result<(), SwipeError> {
    let bundle = handoff::from_url_or_blob(handoff_input)?;
    let mut channel = NegotiationChannel::new(config.channel_config());
    let mut updates = channel.subscribe();
    let mut session = NegotiationSession::new();

    println!(
        "{} {} ({})",
        "Negotiating for".bright_cyan().bold(),
        bundle.participant_name.bright_white(),
        bundle.role
    );

    let result = {
        let run = channel.run(&bundle, &mut session);
        tokio::pin!(run);
        loop {
            tokio::select! {
                r = &mut run => break r,
                Some(event) = updates.recv() => println!("{}", describe_event(&event).dimmed()),
            }
        }
    };
    while let Ok(event) = updates.try_recv() {
        println!("{}", describe_event(&event).dimmed());
    }

    let view = NegotiationView::project(&session);
    println!();
    print!("{}", view.render());
    if show_log {
        println!("{}", "Event log".bright_green());
        for line in &view.log_lines {
            println!("  {line}");
        }
    }
    result
}

async fn run_format(config: &AppConfig, path: &Path, remote: bool) -> Result<(), SwipeError> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| SwipeError::Config(format!("{}: {e}", path.display())))?;
    // A file may hold any of the extraction shapes; the fallback identity is
    // only used for the bare `{preferences}` shape.
    let fallback = Participant::new("Participant", "unspecified", "");
    let output = PreferencesOutput::from_remote(value, &fallback).map_err(SwipeError::Config)?;

    if remote {
        let client = config.api_client();
        match client.format_output(&output).await {
            Ok(text) => {
                println!("{text}");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "remote formatting failed, formatting locally");
            }
        }
    }
    println!("{}", format_output(&output));
    Ok(())
}

async fn run_replay(script_path: &Path, port: u16, delay_ms: u64) -> Result<(), SwipeError> {
    let script = Arc::new(ReplayScript::load(script_path)?);
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    eprintln!(
        "{}",
        format!("  Replay relay at ws://localhost:{port}{}", replay::NEGOTIATE_PATH).bright_green()
    );
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());
    replay::serve(listener, script, Duration::from_millis(delay_ms)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_swipe_aliases() {
        assert_eq!(parse_swipe("A"), Some(AGREE));
        assert_eq!(parse_swipe("yes"), Some(AGREE));
        assert_eq!(parse_swipe("d"), Some(DISAGREE));
        assert_eq!(parse_swipe("Disagree"), Some(DISAGREE));
        assert_eq!(parse_swipe("maybe"), None);
    }
}
