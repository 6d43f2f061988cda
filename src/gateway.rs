//! Gateway (WebSocket) transport for the Discord API.
//!
//! This module owns the WebSocket connection lifecycle:
//!   - connect → receive HELLO → send IDENTIFY (or RESUME)
//!   - background heartbeat task
//!   - sequence number + session_id tracking
//!   - automatic reconnect + RESUME on disconnect
//!   - gateway send rate limiting (120 events / 60s)
//!
//! The bot session consumes a stream of [`GatewayEvent`] values without
//! ever touching `tokio_tungstenite` directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::events::{FatalClose, GatewayEvent};
use crate::types::GatewayPayload;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Discord allows at most 120 gateway sends per 60 seconds.
const SEND_BUDGET_MAX: u32 = 120;
const SEND_BUDGET_WINDOW: Duration = Duration::from_secs(60);

/// Backoff stops growing after this many consecutive failures.
const BACKOFF_MAX_EXPONENT: u32 = 6;

// ---------------------------------------------------------------------------
// Gateway send rate limiter
// ---------------------------------------------------------------------------

/// Sliding-window rate limiter for outbound gateway messages.
struct SendRateLimiter {
    timestamps: Vec<Instant>,
    budget: u32,
    window: Duration,
}

impl SendRateLimiter {
    fn new(budget: u32, window: Duration) -> Self {
        Self {
            timestamps: Vec::with_capacity(budget as usize),
            budget,
            window,
        }
    }

    /// How long the caller should wait before sending, or `None` if it can
    /// send immediately. Does **not** record the send.
    fn delay_at(&self, now: Instant) -> Option<Duration> {
        let in_window: Vec<Instant> = self
            .timestamps
            .iter()
            .copied()
            .filter(|&t| now.duration_since(t) < self.window)
            .collect();

        if (in_window.len() as u32) < self.budget {
            return None;
        }

        let oldest = in_window.into_iter().min()?;
        let expires_at = oldest + self.window;
        (expires_at > now).then(|| expires_at - now)
    }

    /// Record a send at `now` and prune old entries.
    fn record_at(&mut self, now: Instant) {
        self.timestamps
            .retain(|&t| now.duration_since(t) < self.window);
        self.timestamps.push(now);
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Options for connecting to the Discord gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,
    /// Gateway intents bitmask.
    pub intents: u32,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Internal session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct SessionState {
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    sequence: Option<u64>,
}

impl SessionState {
    /// Session id and sequence, when both are known.
    fn resumable(&self) -> Option<(String, u64)> {
        Some((self.session_id.clone()?, self.sequence?))
    }
}

// ---------------------------------------------------------------------------
// WebSocket halves
// ---------------------------------------------------------------------------

type WsConnection =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsConnection, WsMessage>;
type WsStream = futures_util::stream::SplitStream<WsConnection>;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// A running gateway connection.
///
/// Background tasks keep running until the event receiver is dropped or a
/// fatal close code arrives.
pub struct GatewayHandle {
    /// Receive typed events.
    pub events: mpsc::Receiver<GatewayEvent>,
    /// Handle to the background driver task so callers can abort it.
    pub driver_handle: tokio::task::JoinHandle<()>,
}

/// Connect to the Discord gateway, returning a [`GatewayHandle`].
///
/// This spawns a driver task that reads events, heartbeats, and reconnects
/// with backoff on transient failures.
pub fn connect(config: GatewayConfig) -> GatewayHandle {
    let (event_tx, event_rx) = mpsc::channel::<GatewayEvent>(256);
    let driver_handle = tokio::spawn(gateway_driver(config, event_tx));

    GatewayHandle {
        events: event_rx,
        driver_handle,
    }
}

// ---------------------------------------------------------------------------
// The main driver loop (runs in a spawned task)
// ---------------------------------------------------------------------------

async fn gateway_driver(config: GatewayConfig, event_tx: mpsc::Sender<GatewayEvent>) {
    let session = Arc::new(Mutex::new(SessionState::default()));
    let mut failures: u32 = 0;

    loop {
        let url = {
            let s = session.lock().await;
            gateway_url(s.resume_gateway_url.as_deref())
        };

        info!(url = %url, "connecting to Discord gateway");

        let (ws_stream, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to connect to gateway");
                failures += 1;
                back_off(failures).await;
                continue;
            }
        };

        info!("WebSocket connected");

        let (ws_write, mut ws_read) = ws_stream.split();
        let ws_write = Arc::new(Mutex::new(ws_write));
        let rate_limiter = Arc::new(Mutex::new(SendRateLimiter::new(
            SEND_BUDGET_MAX,
            SEND_BUDGET_WINDOW,
        )));

        // ------------------------------------------------------------------
        // 1.  Read HELLO and extract heartbeat_interval
        // ------------------------------------------------------------------
        let heartbeat_interval = match read_hello_from_stream(&mut ws_read).await {
            Ok(interval) => interval,
            Err(e) => {
                error!(error = %e, "failed to read HELLO from gateway");
                failures += 1;
                back_off(failures).await;
                continue;
            }
        };

        info!(interval_ms = heartbeat_interval, "received HELLO");

        // ------------------------------------------------------------------
        // 2.  Send IDENTIFY or RESUME
        // ------------------------------------------------------------------
        let resumable = session.lock().await.resumable();
        let (hello_reply, kind) = match resumable {
            Some((session_id, seq)) => (resume_payload(&config.token, &session_id, seq), "RESUME"),
            None => (identify_payload(&config), "IDENTIFY"),
        };

        if let Err(e) = rate_limited_send(&ws_write, &rate_limiter, &hello_reply).await {
            error!(error = %e, kind, "failed to send handshake");
            failures += 1;
            back_off(failures).await;
            continue;
        }
        info!(kind, "sent handshake");

        // ------------------------------------------------------------------
        // 3.  Spawn heartbeat task
        // ------------------------------------------------------------------
        let hb_write = Arc::clone(&ws_write);
        let hb_session = Arc::clone(&session);
        let hb_rate_limiter = Arc::clone(&rate_limiter);
        let (hb_cancel_tx, mut hb_cancel_rx) = mpsc::channel::<()>(1);

        let heartbeat_handle = tokio::spawn(async move {
            // First heartbeat after `heartbeat_interval * jitter`, jitter ∈ [0, 1).
            let jitter = rand::random::<f64>();
            let first_delay = Duration::from_millis((heartbeat_interval as f64 * jitter) as u64);
            tokio::select! {
                _ = tokio::time::sleep(first_delay) => {}
                _ = hb_cancel_rx.recv() => { return; }
            }

            let mut interval = tokio::time::interval(Duration::from_millis(heartbeat_interval));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let seq = hb_session.lock().await.sequence;
                        let heartbeat = json!({"op": 1, "d": seq});

                        if let Err(e) = rate_limited_send(&hb_write, &hb_rate_limiter, &heartbeat).await {
                            warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
                            return;
                        }
                        debug!("sent heartbeat (seq={:?})", seq);
                    }
                    _ = hb_cancel_rx.recv() => {
                        debug!("heartbeat task cancelled");
                        return;
                    }
                }
            }
        });

        // ------------------------------------------------------------------
        // 4.  Main read loop
        // ------------------------------------------------------------------
        let disconnect_reason =
            read_loop(&mut ws_read, &ws_write, &rate_limiter, &event_tx, &session).await;

        // ------------------------------------------------------------------
        // 5.  Cleanup: cancel heartbeat and decide whether to reconnect
        // ------------------------------------------------------------------
        let _ = hb_cancel_tx.send(()).await;
        heartbeat_handle.abort();

        {
            let mut w = ws_write.lock().await;
            let _ = w.send(WsMessage::Close(None)).await;
        }

        match disconnect_reason {
            DisconnectReason::ShouldResume => {
                info!("will attempt RESUME");
                failures = 0;
            }
            DisconnectReason::ShouldReidentify => {
                info!("session invalidated, will re-IDENTIFY");
                let mut s = session.lock().await;
                s.session_id = None;
                s.sequence = None;
                failures = 0;
            }
            DisconnectReason::Fatal(code) => {
                error!(%code, "fatal gateway close, shutting down");
                let _ = event_tx.send(GatewayEvent::Fatal(code)).await;
                return;
            }
            DisconnectReason::EventChannelClosed => {
                info!("event channel closed, shutting down gateway driver");
                return;
            }
        }

        back_off(failures + 1).await;
    }
}

// ---------------------------------------------------------------------------
// Disconnect reason
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum DisconnectReason {
    ShouldResume,
    ShouldReidentify,
    Fatal(FatalClose),
    EventChannelClosed,
}

/// How to react to a close frame carrying `code`.
fn classify_close(code: u16) -> DisconnectReason {
    if let Some(fatal) = FatalClose::from_code(code) {
        return DisconnectReason::Fatal(fatal);
    }
    match code {
        // Invalid seq or session timed out.
        4007 | 4009 => DisconnectReason::ShouldReidentify,
        _ => DisconnectReason::ShouldResume,
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

async fn read_loop(
    ws_read: &mut WsStream,
    ws_write: &Arc<Mutex<WsSink>>,
    rate_limiter: &Arc<Mutex<SendRateLimiter>>,
    event_tx: &mpsc::Sender<GatewayEvent>,
    session: &Arc<Mutex<SessionState>>,
) -> DisconnectReason {
    loop {
        let msg = match ws_read.next().await {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket read error");
                return DisconnectReason::ShouldResume;
            }
            None => {
                info!("WebSocket stream ended");
                return DisconnectReason::ShouldResume;
            }
        };

        match msg {
            WsMessage::Text(text) => {
                let payload: GatewayPayload = match serde_json::from_str(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "failed to parse gateway payload");
                        continue;
                    }
                };

                if let Some(s) = payload.s {
                    session.lock().await.sequence = Some(s);
                }

                let event = GatewayEvent::from_payload(payload);

                // Session-relevant events are handled here before forwarding.
                match &event {
                    GatewayEvent::Ready(ready) => {
                        let mut sess = session.lock().await;
                        sess.session_id = Some(ready.session_id.clone());
                        sess.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                        info!(
                            session_id = %ready.session_id,
                            user = %ready.user.username,
                            "gateway READY"
                        );
                    }

                    GatewayEvent::HeartbeatRequest => {
                        let seq = session.lock().await.sequence;
                        let heartbeat = json!({"op": 1, "d": seq});
                        if let Err(e) = rate_limited_send(ws_write, rate_limiter, &heartbeat).await {
                            warn!(error = %e, "failed to send requested heartbeat");
                        }
                        debug!("sent requested heartbeat");
                        continue;
                    }

                    GatewayEvent::HeartbeatAck => {
                        debug!("heartbeat acknowledged");
                        continue;
                    }

                    GatewayEvent::Reconnect => {
                        info!("gateway requested reconnect (op 7)");
                        return DisconnectReason::ShouldResume;
                    }

                    GatewayEvent::InvalidSession(resumable) => {
                        warn!(resumable, "session invalidated (op 9)");
                        if *resumable {
                            tokio::time::sleep(Duration::from_secs(2)).await;
                            return DisconnectReason::ShouldResume;
                        } else {
                            tokio::time::sleep(Duration::from_secs(3)).await;
                            return DisconnectReason::ShouldReidentify;
                        }
                    }

                    _ => {}
                }

                if event_tx.send(event).await.is_err() {
                    info!("event channel closed by consumer");
                    return DisconnectReason::EventChannelClosed;
                }
            }

            WsMessage::Close(frame) => {
                let Some(frame) = frame else {
                    warn!("WebSocket closed by server without a code");
                    return DisconnectReason::ShouldResume;
                };
                let raw: u16 = frame.code.into();
                warn!(close_code = raw, reason = %frame.reason, "WebSocket closed by server");
                return classify_close(raw);
            }

            // Ping/Pong/Binary are ignored.
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Gateway URL with the version/encoding query appended when missing.
fn gateway_url(resume_url: Option<&str>) -> String {
    let url = resume_url.unwrap_or(DEFAULT_GATEWAY_URL);
    if url.contains("v=10") {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&v=10&encoding=json", url)
    } else {
        format!("{}/?v=10&encoding=json", url.trim_end_matches('/'))
    }
}

fn identify_payload(config: &GatewayConfig) -> serde_json::Value {
    json!({
        "op": 2,
        "d": {
            "token": config.token,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "daily-poll-bot",
                "device": "daily-poll-bot"
            },
            "intents": config.intents,
        }
    })
}

fn resume_payload(token: &str, session_id: &str, seq: u64) -> serde_json::Value {
    json!({
        "op": 6,
        "d": {
            "token": token,
            "session_id": session_id,
            "seq": seq,
        }
    })
}

/// Read the HELLO payload from an already-split stream reference.
async fn read_hello_from_stream(stream: &mut WsStream) -> Result<u64, String> {
    let msg = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .map_err(|_| "timed out waiting for HELLO".to_string())?
        .ok_or_else(|| "stream ended before HELLO".to_string())?
        .map_err(|e| format!("WS error reading HELLO: {}", e))?;

    let text = match msg {
        WsMessage::Text(t) => t,
        other => return Err(format!("expected text message for HELLO, got {:?}", other)),
    };

    parse_hello(&text)
}

/// Extract `heartbeat_interval` from a HELLO (op 10) payload.
fn parse_hello(text: &str) -> Result<u64, String> {
    let payload: GatewayPayload =
        serde_json::from_str(text).map_err(|e| format!("failed to parse HELLO: {}", e))?;

    if payload.op != 10 {
        return Err(format!("expected op 10 (HELLO), got op {}", payload.op));
    }

    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| "HELLO missing heartbeat_interval".to_string())
}

/// Send a JSON payload on the WebSocket, respecting the send rate limiter.
async fn rate_limited_send(
    ws_write: &Arc<Mutex<WsSink>>,
    rate_limiter: &Arc<Mutex<SendRateLimiter>>,
    payload: &serde_json::Value,
) -> Result<(), String> {
    loop {
        let delay = rate_limiter.lock().await.delay_at(Instant::now());
        match delay {
            Some(d) => {
                debug!(
                    delay_ms = d.as_millis() as u64,
                    "gateway send rate-limited, waiting"
                );
                tokio::time::sleep(d).await;
            }
            None => break,
        }
    }

    rate_limiter.lock().await.record_at(Instant::now());

    let text = serde_json::to_string(payload).map_err(|e| e.to_string())?;

    let mut w = ws_write.lock().await;
    w.send(WsMessage::Text(text))
        .await
        .map_err(|e| format!("WS send error: {}", e))
}

/// Sleep for [`backoff_delay`] and log it.
async fn back_off(attempt: u32) {
    let delay = backoff_delay(attempt);
    warn!(
        delay_ms = delay.as_millis() as u64,
        attempt, "backing off before reconnect"
    );
    tokio::time::sleep(delay).await;
}

/// Exponential backoff with jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(BACKOFF_MAX_EXPONENT));
    let jitter = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jitter.min(60_000.0) as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
