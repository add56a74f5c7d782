//! Negotiation visualization.
//!
//! [`NegotiationView::project`] is a pure function of a [`NegotiationSession`]:
//! score series across rounds, the latest round's bars, the event log as
//! display lines, and, once terminal, the final proposal summary and an
//! outcome banner. [`NegotiationView::render`] draws it for a terminal.

use colored::*;
use serde_json::Value;

use crate::channel::{LoggedEvent, NegotiationSession, Outcome, ProposalMeta, RoundSnapshot};
use crate::events::{FinalProposal, NegotiationEvent};

/// Scores run from 1 to this value.
pub const MAX_SCORE: f64 = 5.0;
const BAR_WIDTH: usize = 20;

// ---------------------------------------------------------------------------
// Projection types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub label: String,
    /// `(round, score)`, ascending by round. Rounds without a value are skipped.
    pub points: Vec<(u32, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentBar {
    pub agent: String,
    pub score: f64,
    pub glyph: char,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundPanel {
    pub round: u32,
    pub settled: bool,
    pub average_score: Option<f64>,
    pub bars: Vec<AgentBar>,
    pub proposal: Option<ProposalMeta>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalSummary {
    pub total_cost: f64,
    pub modification_count: u64,
    pub modifications: Vec<String>,
    pub compensation: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Banner {
    Success,
    PartialSuccess(Option<String>),
    Failed(String),
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationView {
    pub series: Vec<Series>,
    pub latest: Option<RoundPanel>,
    pub log_lines: Vec<String>,
    pub final_summary: Option<FinalSummary>,
    pub banner: Option<Banner>,
    pub status: Option<String>,
    /// Closing message from `complete`, shown under the banner.
    pub completion: Option<String>,
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

impl NegotiationView {
    pub fn project(session: &NegotiationSession) -> Self {
        let mut series = vec![Series {
            label: "average".to_string(),
            points: session
                .rounds()
                .filter_map(|r| r.average_score.map(|avg| (r.round, avg)))
                .collect(),
        }];
        for agent in session.agents() {
            series.push(Series {
                points: session
                    .rounds()
                    .filter_map(|r| r.scores.get(&agent).map(|s| (r.round, *s)))
                    .collect(),
                label: agent,
            });
        }

        let banner = session.outcome().map(|o| match o {
            Outcome::Success => Banner::Success,
            Outcome::PartialSuccess { status } => Banner::PartialSuccess(status.clone()),
            Outcome::Failed { message } => Banner::Failed(message.clone()),
            Outcome::Disconnected => Banner::Disconnected,
        });

        Self {
            series,
            latest: session.latest_round().map(round_panel),
            log_lines: session.log().iter().map(describe_event).collect(),
            final_summary: session.final_proposal().map(summarize),
            banner,
            status: session.status_message().map(str::to_string),
            completion: session.completion_message().map(str::to_string),
        }
    }

    /// Terminal rendering with colors and block bars.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(50);

        out.push_str(&format!("{}\n", "POLICY NEGOTIATION".bright_cyan().bold()));
        if let Some(status) = &self.status {
            out.push_str(&format!("{}: {}\n", "Status".bright_yellow(), status));
        }
        out.push_str(&format!("{}\n", rule.bright_blue()));

        // -- score history --
        if self.series.iter().any(|s| !s.points.is_empty()) {
            out.push_str(&format!("{}\n", "Score history".bright_green()));
            for s in &self.series {
                if s.points.is_empty() {
                    continue;
                }
                let points: Vec<String> = s.points.iter().map(|(r, v)| format!("R{r}={v:.1}")).collect();
                out.push_str(&format!("  {:<12} {}\n", s.label, points.join("  ")));
            }
            out.push('\n');
        }

        // -- latest round --
        if let Some(panel) = &self.latest {
            let state = if panel.settled { "settled" } else { "in progress" };
            out.push_str(&format!(
                "{} {}\n",
                format!("Round {}", panel.round).bright_green().bold(),
                format!("({state})").dimmed()
            ));
            for bar in &panel.bars {
                out.push_str(&format!(
                    "  {} {:<16} {} {:.1}\n",
                    glyph_colored(bar.glyph),
                    bar.agent,
                    score_bar(bar.score),
                    bar.score
                ));
            }
            if let Some(avg) = panel.average_score {
                out.push_str(&format!("  {} {:.2}\n", "Average:".bright_yellow(), avg));
            }
            if let Some(p) = &panel.proposal {
                if let Some(n) = p.modifications_count {
                    out.push_str(&format!("  {} {}\n", "Modifications:".bright_yellow(), n));
                }
                if let Some(cost) = p.total_cost {
                    out.push_str(&format!("  {} {}\n", "Total cost:".bright_yellow(), format_cost(cost)));
                }
                if let Some(reasoning) = &p.reasoning {
                    out.push_str(&format!("  {} {}\n", "Reasoning:".bright_yellow(), reasoning));
                }
            }
            out.push('\n');
        }

        // -- final proposal --
        if let Some(summary) = &self.final_summary {
            out.push_str(&format!("{}\n", "Final proposal".bright_magenta().bold()));
            out.push_str(&format!("  {} {}\n", "Total cost:".bright_yellow(), format_cost(summary.total_cost)));
            out.push_str(&format!("  {} {}\n", "Modifications:".bright_yellow(), summary.modification_count));
            for m in &summary.modifications {
                out.push_str(&format!("    - {m}\n"));
            }
            if !summary.compensation.is_empty() {
                out.push_str(&format!("  {}\n", "Compensation:".bright_yellow()));
                for (who, amount) in &summary.compensation {
                    out.push_str(&format!("    - {who}: {}\n", format_cost(*amount)));
                }
            }
            out.push('\n');
        }

        if let Some(banner) = &self.banner {
            out.push_str(&format!("{}\n", rule.bright_blue()));
            out.push_str(&format!("{}\n", banner_text(banner)));
            if let Some(message) = &self.completion {
                out.push_str(&format!("{message}\n"));
            }
        }
        out
    }
}

fn round_panel(snap: &RoundSnapshot) -> RoundPanel {
    RoundPanel {
        round: snap.round,
        settled: snap.settled,
        average_score: snap.average_score,
        bars: snap
            .scores
            .iter()
            .map(|(agent, score)| AgentBar {
                agent: agent.clone(),
                score: *score,
                glyph: status_glyph(*score),
            })
            .collect(),
        proposal: snap.proposal.clone(),
    }
}

fn summarize(fp: &FinalProposal) -> FinalSummary {
    FinalSummary {
        total_cost: fp.total_cost,
        modification_count: fp.modification_count(),
        modifications: fp.modifications.iter().map(describe_modification).collect(),
        compensation: fp.compensation.iter().map(|(k, v)| (k.clone(), *v)).collect(),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// ✓ for 4 and above, ⚠ for 3, ✗ below.
pub fn status_glyph(score: f64) -> char {
    if score >= 4.0 {
        '✓'
    } else if score >= 3.0 {
        '⚠'
    } else {
        '✗'
    }
}

fn glyph_colored(glyph: char) -> ColoredString {
    let s = glyph.to_string();
    match glyph {
        '✓' => s.bright_green(),
        '⚠' => s.bright_yellow(),
        _ => s.bright_red(),
    }
}

fn score_bar(score: f64) -> String {
    let filled = ((score.clamp(0.0, MAX_SCORE) / MAX_SCORE) * BAR_WIDTH as f64).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled))
}

fn banner_text(banner: &Banner) -> ColoredString {
    match banner {
        Banner::Success => "NEGOTIATION SUCCEEDED".bright_green().bold(),
        Banner::PartialSuccess(Some(status)) => format!("PARTIAL AGREEMENT ({status})").bright_yellow().bold(),
        Banner::PartialSuccess(None) => "PARTIAL AGREEMENT".bright_yellow().bold(),
        Banner::Failed(message) => format!("NEGOTIATION FAILED: {message}").bright_red().bold(),
        Banner::Disconnected => "DISCONNECTED before the negotiation finished".bright_red(),
    }
}

/// Dollar amount with thousands separators, no cents: `$12,000`.
pub fn format_cost(amount: f64) -> String {
    let rounded = amount.round();
    let negative = rounded < 0.0;
    let digits = format!("{}", rounded.abs() as u64);
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if negative {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

/// `{type, cost, benefit, details}` objects become
/// `type: details ($cost, benefit)`; anything else is shown as-is.
fn describe_modification(m: &Value) -> String {
    let Value::Object(fields) = m else {
        return match m {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    };
    let text = |key: &str| fields.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());

    let label = ["description", "name", "type"].into_iter().find_map(|k| text(k));
    let mut line = match (label, text("details")) {
        (Some(label), Some(details)) if label != details => format!("{label}: {details}"),
        (Some(label), _) => label.to_string(),
        (None, Some(details)) => details.to_string(),
        (None, None) => m.to_string(),
    };

    let mut extras = Vec::new();
    if let Some(cost) = fields.get("cost").and_then(Value::as_f64) {
        extras.push(format_cost(cost));
    }
    if let Some(benefit) = text("benefit") {
        extras.push(benefit.to_string());
    }
    if !extras.is_empty() {
        line.push_str(&format!(" ({})", extras.join(", ")));
    }
    line
}

/// One display line for a logged event.
pub fn describe_event(entry: &LoggedEvent) -> String {
    let body = match &entry.event {
        NegotiationEvent::Status { message } => format!("status: {message}"),
        NegotiationEvent::RoundStart { round } => format!("round {round} started"),
        NegotiationEvent::Score(s) => {
            let mut line = format!("{} {} scored {:.1}", status_glyph(s.score), s.agent, s.score);
            if let Some(expl) = &s.explanation {
                line.push_str(&format!(": {expl}"));
            }
            line
        }
        NegotiationEvent::RoundComplete(rc) => {
            format!("round {} complete, average {:.2}", rc.round, rc.average_score)
        }
        NegotiationEvent::Proposal(p) => {
            let mut line = "proposal".to_string();
            if let Some(n) = p.modifications_count {
                line.push_str(&format!(", {n} modifications"));
            }
            if let Some(cost) = p.total_cost {
                line.push_str(&format!(", {}", format_cost(cost)));
            }
            line
        }
        NegotiationEvent::Complete(c) => match (&c.message, c.is_success()) {
            (Some(m), _) => format!("complete: {m}"),
            (None, true) => "complete: success".to_string(),
            (None, false) => format!("complete: {}", c.status.as_deref().unwrap_or("partial")),
        },
        NegotiationEvent::FinalProposal(fp) => format!(
            "final proposal, {} modifications, {}",
            fp.modification_count(),
            format_cost(fp.total_cost)
        ),
        NegotiationEvent::Failed { message } => format!("failed: {message}"),
        NegotiationEvent::Unknown { kind } if kind.is_empty() => "unrecognised event".to_string(),
        NegotiationEvent::Unknown { kind } => format!("unrecognised event `{kind}`"),
    };
    format!("[{:>3}] {}", entry.seq, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn session_with(frames: &[Value]) -> NegotiationSession {
        let mut s = NegotiationSession::new();
        s.begin_connect();
        s.opened();
        for f in frames {
            s.apply_value(f.clone());
        }
        s
    }

    #[rstest]
    #[case(5.0, '✓')]
    #[case(4.0, '✓')]
    #[case(3.0, '⚠')]
    #[case(3.5, '⚠')]
    #[case(2.9, '✗')]
    #[case(1.0, '✗')]
    fn test_status_glyph(#[case] score: f64, #[case] glyph: char) {
        assert_eq!(status_glyph(score), glyph);
    }

    #[rstest]
    #[case(0.0, "$0")]
    #[case(999.0, "$999")]
    #[case(12000.0, "$12,000")]
    #[case(50_000_000.0, "$50,000,000")]
    #[case(1234.6, "$1,235")]
    #[case(-2500.0, "-$2,500")]
    fn test_format_cost(#[case] amount: f64, #[case] expected: &str) {
        assert_eq!(format_cost(amount), expected);
    }

    #[test]
    fn test_score_bar_width() {
        assert_eq!(score_bar(5.0).chars().count(), BAR_WIDTH);
        assert_eq!(score_bar(0.0).chars().filter(|c| *c == '█').count(), 0);
        assert_eq!(score_bar(9.0).chars().filter(|c| *c == '█').count(), BAR_WIDTH);
    }

    #[test]
    fn test_empty_session_projection() {
        let v = NegotiationView::project(&NegotiationSession::new());
        assert!(v.latest.is_none());
        assert!(v.banner.is_none());
        assert!(v.final_summary.is_none());
        assert_eq!(v.series.len(), 1);
        assert!(v.series[0].points.is_empty());
    }

    #[test]
    fn test_series_per_agent_and_average() {
        let s = session_with(&[
            json!({"type": "round_start", "round": 1}),
            json!({"type": "round_complete", "round": 1, "average_score": 3.5, "scores": {"A": 4, "B": 3}}),
            json!({"type": "round_start", "round": 2}),
            json!({"type": "score", "agent": "A", "score": 5}),
        ]);
        let v = NegotiationView::project(&s);
        assert_eq!(v.series[0].label, "average");
        assert_eq!(v.series[0].points, vec![(1, 3.5)]);
        let a = v.series.iter().find(|s| s.label == "A").unwrap();
        assert_eq!(a.points, vec![(1, 4.0), (2, 5.0)]);
        let b = v.series.iter().find(|s| s.label == "B").unwrap();
        assert_eq!(b.points, vec![(1, 3.0)]);
    }

    #[test]
    fn test_latest_panel_has_glyphs_and_proposal() {
        let s = session_with(&[
            json!({"type": "round_start", "round": 1}),
            json!({"type": "score", "agent": "A", "score": 2}),
            json!({"type": "proposal", "modifications_count": 2, "total_cost": 1500.0}),
        ]);
        let v = NegotiationView::project(&s);
        let panel = v.latest.unwrap();
        assert_eq!(panel.round, 1);
        assert!(!panel.settled);
        assert_eq!(panel.bars[0].glyph, '✗');
        assert_eq!(panel.proposal.unwrap().modifications_count, Some(2));
    }

    #[test]
    fn test_modification_descriptions() {
        assert_eq!(describe_modification(&json!({"description": "extend hours"})), "extend hours");
        assert_eq!(describe_modification(&json!({"type": "capacity"})), "capacity");
        assert_eq!(describe_modification(&json!("plain")), "plain");
        assert_eq!(describe_modification(&json!(7)), "7");
        assert_eq!(
            describe_modification(&json!({
                "type": "add_bike_lane",
                "cost": 8000,
                "benefit": "safer commute",
                "details": "Protected lane on Main St"
            })),
            "add_bike_lane: Protected lane on Main St ($8,000, safer commute)"
        );
        assert_eq!(describe_modification(&json!({"type": "noise_wall", "cost": 2500.0})), "noise_wall ($2,500)");
    }

    #[test]
    fn test_completion_message_rendered_under_banner() {
        let s = session_with(&[json!({"type": "complete", "success": true, "message": "Agreement reached"})]);
        let v = NegotiationView::project(&s);
        assert_eq!(v.completion.as_deref(), Some("Agreement reached"));
        let out = v.render();
        assert!(out.trim_end().ends_with("Agreement reached"));
    }

    #[test]
    fn test_log_lines_numbered() {
        let s = session_with(&[
            json!({"type": "status", "message": "go"}),
            json!({"type": "mystery"}),
        ]);
        let v = NegotiationView::project(&s);
        assert_eq!(v.log_lines[0], "[  0] status: go");
        assert_eq!(v.log_lines[1], "[  1] unrecognised event `mystery`");
    }

    #[test]
    fn test_render_includes_final_summary() {
        let s = session_with(&[json!({
            "type": "final_proposal",
            "total_cost": 12000,
            "modifications": [{"description": "mask mandate indoors"}],
            "compensation": {"Small businesses": 5000}
        })]);
        let out = NegotiationView::project(&s).render();
        assert!(out.contains("$12,000"));
        assert!(out.contains("mask mandate indoors"));
        assert!(out.contains("Small businesses"));
    }

    #[test]
    fn test_banner_for_failure() {
        let s = session_with(&[json!({"type": "failed", "message": "no consensus"})]);
        let v = NegotiationView::project(&s);
        assert_eq!(v.banner, Some(Banner::Failed("no consensus".into())));
    }
}
