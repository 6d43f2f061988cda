//! Bot session: shared state, gateway bridge, and the async event loop.
//!
//! This module owns the "engine" of the bot: checking the credential,
//! connecting to Discord's gateway, and dispatching typed events to the
//! handler functions in [`crate::handlers`]. Shared state lives in one
//! [`BotState`] behind an `Arc`, so the scheduler task and the event loop
//! see the same REST client and the same [`SchedulerGuard`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, trace, warn};

use crate::config::BotConfig;
use crate::error::{BotError, HttpError};
use crate::events::{FatalClose, GatewayEvent};
use crate::gateway::{self, GatewayConfig};
use crate::handlers;
use crate::http::DiscordHttpClient;
use crate::types::User;

// ---------------------------------------------------------------------------
// Scheduler guard
// ---------------------------------------------------------------------------

/// Start-once flag for the daily scheduler.
///
/// READY is delivered again after every re-identify; only the first caller
/// of [`SchedulerGuard::try_start`] wins.
#[derive(Debug, Default)]
pub struct SchedulerGuard {
    started: AtomicBool,
}

impl SchedulerGuard {
    pub const fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
        }
    }

    /// Atomically flip the flag. Returns `true` exactly once.
    pub fn try_start(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything the event handlers and the scheduler task share.
#[derive(Debug)]
pub struct BotState {
    pub config: BotConfig,
    pub http: DiscordHttpClient,
    pub scheduler: SchedulerGuard,
    /// Timestamp of when the bot started.
    pub start_time: Instant,
}

impl BotState {
    pub fn new(config: BotConfig, http: DiscordHttpClient) -> Self {
        Self {
            config,
            http,
            scheduler: SchedulerGuard::new(),
            start_time: Instant::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Bot entry point
// ---------------------------------------------------------------------------

/// Run the bot until a fatal error.
///
/// Checks the token against `GET /users/@me`, connects to the gateway and
/// runs the main event loop, dispatching each event to the matching
/// handler in [`crate::handlers`]. Only returns on failure; the caller
/// races it against Ctrl+C.
pub async fn run(config: BotConfig) -> Result<(), BotError> {
    let http = DiscordHttpClient::new(&config.token);

    let me = authenticate(&http).await?;
    info!(user = %me.tag(), id = %me.id, "token accepted");

    let gateway_config = GatewayConfig {
        token: config.token.clone(),
        intents: config.intents,
    };
    let state = Arc::new(BotState::new(config, http));

    let mut gw = gateway::connect(gateway_config);
    info!("gateway connecting, entering event loop");

    // ----- Main event loop -----
    while let Some(event) = gw.events.recv().await {
        match event {
            GatewayEvent::Ready(ready) => {
                handlers::on_ready(&state, ready);
            }

            GatewayEvent::Resumed => {
                info!("gateway session resumed");
            }

            GatewayEvent::GuildCreate(guild) => {
                handlers::on_guild_create(&state, guild);
            }

            GatewayEvent::GuildDelete(guild) => {
                handlers::on_guild_delete(guild);
            }

            GatewayEvent::Fatal(code) => {
                error!(%code, "gateway refused the session");
                gw.driver_handle.abort();
                return Err(fatal_error(code));
            }

            // Session control is handled inside the gateway driver.
            GatewayEvent::HeartbeatAck
            | GatewayEvent::HeartbeatRequest
            | GatewayEvent::Reconnect
            | GatewayEvent::InvalidSession(_) => {}

            GatewayEvent::Unknown {
                event_name: Some(ref name),
                ..
            } => {
                trace!(event = %name, "unhandled gateway event");
            }

            GatewayEvent::Unknown { .. } => {}
        }
    }

    warn!("event stream ended, bot shutting down");
    Err(BotError::Gateway("gateway event stream ended".to_string()))
}

/// Race the bot against the Ctrl+C listener.
///
/// `Ok(())` means the user stopped the bot. A listener that fails to
/// install is an error, never a clean stop.
pub async fn supervise<B, S>(bot: B, ctrl_c: S) -> Result<(), BotError>
where
    B: Future<Output = Result<(), BotError>>,
    S: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = bot => result,
        signal = ctrl_c => match signal {
            Ok(()) => {
                info!("bot stopped by user");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to install the Ctrl+C handler");
                Err(BotError::Signal(e))
            }
        },
    }
}

/// Identity check before touching the gateway.
async fn authenticate(http: &DiscordHttpClient) -> Result<User, BotError> {
    match http.get_current_user().await {
        Ok(user) => Ok(user),
        Err(HttpError::Api { status: 401, .. }) => Err(BotError::Authentication(
            "Discord rejected the token (401 Unauthorized)".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

fn fatal_error(code: FatalClose) -> BotError {
    match code {
        FatalClose::AuthenticationFailed => BotError::Authentication(code.to_string()),
        other => BotError::Gateway(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
