//! Replay relay.
//!
//! A small WebSocket server that speaks the negotiation protocol from a
//! recorded script: it accepts a connection on `/ws/negotiate`, reads the
//! initiating preference bundle, announces it, replays the scripted events
//! with a fixed delay between frames and closes. Used for demos and for
//! end-to-end tests of the channel.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::error::{Result, SwipeError};
use crate::preferences::PreferenceBundle;

pub const NEGOTIATE_PATH: &str = "/ws/negotiate";
pub const RECEIVED_STATUS: &str = "Received preferences, starting negotiation...";

/// Events to replay, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayScript {
    events: Vec<Value>,
}

impl ReplayScript {
    pub fn new(events: Vec<Value>) -> Self {
        Self { events }
    }

    /// One JSON object per line; blank lines and `#` comments are skipped.
    pub fn from_jsonl(text: &str) -> Result<Self> {
        let mut events = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let value: Value = serde_json::from_str(line)
                .map_err(|e| SwipeError::Config(format!("replay script line {}: {e}", n + 1)))?;
            events.push(value);
        }
        Ok(Self { events })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_jsonl(&text)
    }

    pub fn events(&self) -> &[Value] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Accept connections forever, one task per connection.
pub async fn serve(listener: TcpListener, script: Arc<ReplayScript>, delay: Duration) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), events = script.len(), "replay relay listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let script = Arc::clone(&script);
        tokio::spawn(async move {
            handle_connection(stream, peer, script, delay).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, script: Arc<ReplayScript>, delay: Duration) {
    let check_path = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        if req.uri().path() == NEGOTIATE_PATH {
            Ok(resp)
        } else {
            let mut err = ErrorResponse::new(Some(format!("no endpoint at {}", req.uri().path())));
            *err.status_mut() = StatusCode::NOT_FOUND;
            Err(err)
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "handshake rejected");
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    let bundle = loop {
        match source.next().await {
            Some(Ok(WsMessage::Text(text))) => break serde_json::from_str::<PreferenceBundle>(&text),
            Some(Ok(WsMessage::Close(_))) | None => {
                debug!(%peer, "client left before sending preferences");
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(%peer, error = %e, "read failed");
                return;
            }
        }
    };

    let bundle = match bundle {
        Ok(b) => b,
        Err(e) => {
            warn!(%peer, error = %e, "invalid preference bundle");
            let frame = json!({"type": "error", "error": format!("Invalid preferences: {e}")});
            let _ = sink.send(WsMessage::Text(frame.to_string())).await;
            let _ = sink.close().await;
            return;
        }
    };
    info!(%peer, participant = %bundle.participant_name, keys = bundle.preferences.len(), "preferences received");

    let status = json!({"type": "status", "message": RECEIVED_STATUS});
    if sink.send(WsMessage::Text(status.to_string())).await.is_err() {
        return;
    }

    for event in script.events() {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Err(e) = sink.send(WsMessage::Text(event.to_string())).await {
            warn!(%peer, error = %e, "client went away mid-replay");
            return;
        }
    }

    let _ = sink.close().await;
    info!(%peer, "replay finished");
}
