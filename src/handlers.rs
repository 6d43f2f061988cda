//! Event handlers for the bot session.
//!
//! Each public function in this module handles one category of gateway event.
//! Handlers receive the shared [`BotState`] for the configuration and the
//! scheduler flag; the scheduler task uses its REST client.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bot::BotState;
use crate::community::{matching_channels, Community};
use crate::dispatch::run_once;
use crate::schedule;
use crate::types::*;

// ---------------------------------------------------------------------------
// READY handler
// ---------------------------------------------------------------------------

/// Called when the bot receives the READY event from the gateway.
///
/// The first READY logs the banner and starts the daily scheduler. Later
/// ones (after a re-identify) only note the new session. Per-server channel
/// counts follow from the GUILD_CREATE events Discord sends after READY.
pub fn on_ready(state: &Arc<BotState>, ready: ReadyEvent) {
    if !start_once(state, spawn_scheduler) {
        info!(
            user = %ready.user.tag(),
            guilds = ready.guilds.len(),
            "session re-established, daily scheduler already running"
        );
        return;
    }

    info!(
        user = %ready.user.tag(),
        id = %ready.user.id,
        guilds = ready.guilds.len(),
        startup_ms = state.start_time.elapsed().as_millis() as u64,
        "bot is ready!"
    );
    info!(
        "{}",
        task_description(&state.config.marker, &state.config.timezone.to_string())
    );
    info!("daily scheduler started");
}

/// Hand the scheduler to `spawn` unless it is already running.
fn start_once<F>(state: &Arc<BotState>, spawn: F) -> bool
where
    F: FnOnce(Arc<BotState>),
{
    if !state.scheduler.try_start() {
        debug!("daily scheduler already running, not starting another");
        return false;
    }
    spawn(Arc::clone(state));
    true
}

fn spawn_scheduler(state: Arc<BotState>) {
    tokio::spawn(async move {
        let tz = state.config.timezone;
        schedule::run_daily(tz, move |_| {
            let state = Arc::clone(&state);
            async move {
                run_once(&state.http, &state.config).await;
            }
        })
        .await;
    });
}

// ---------------------------------------------------------------------------
// GUILD_CREATE / GUILD_DELETE handlers
// ---------------------------------------------------------------------------

/// Called when we receive a full guild object after READY or on join.
pub fn on_guild_create(state: &BotState, guild: Guild) {
    let community = Community::from(guild);
    log_community(&community, &state.config.marker);
}

/// Called when the bot leaves a guild or the guild goes offline.
pub fn on_guild_delete(guild: UnavailableGuild) {
    if guild.unavailable {
        warn!(guild_id = %guild.id, "server became unavailable");
    } else {
        info!(guild_id = %guild.id, "removed from server");
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn log_community(community: &Community, marker: &str) {
    let found = matching_channels(community, marker).len();
    info!(
        server = %community.name,
        channels = found,
        "{}",
        marker_summary(&community.name, marker, found)
    );
}

fn marker_summary(server: &str, marker: &str, found: usize) -> String {
    format!("{server}: {found} '{marker}' channel(s)")
}

fn task_description(marker: &str, timezone: &str) -> String {
    format!(
        "daily survey: every day at 00:00 ({timezone}) in every channel containing '{marker}'"
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::BotConfig;
    use crate::http::DiscordHttpClient;

    fn state() -> Arc<BotState> {
        let token = "t".repeat(40);
        Arc::new(BotState::new(
            BotConfig::with_token(&token),
            DiscordHttpClient::with_base_url(token, "http://127.0.0.1:9"),
        ))
    }

    fn ready() -> ReadyEvent {
        serde_json::from_str(
            r#"{
                "v":10,
                "user":{"id":"99","username":"pollster","discriminator":"0","bot":true},
                "session_id":"s",
                "resume_gateway_url":"wss://r",
                "guilds":[],
                "application":{"id":"77"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn task_description_names_marker_and_zone() {
        let text = task_description("votazioni", "Europe/Rome");
        assert!(text.contains("00:00"));
        assert!(text.contains("Europe/Rome"));
        assert!(text.contains("'votazioni'"));
    }

    #[test]
    fn marker_summary_counts_channels() {
        assert_eq!(
            marker_summary("Lega", "votazioni", 2),
            "Lega: 2 'votazioni' channel(s)"
        );
    }

    #[test]
    fn scheduler_is_spawned_for_the_first_ready_only() {
        let state = state();
        let spawned = AtomicUsize::new(0);
        let spawn = |_: Arc<BotState>| {
            spawned.fetch_add(1, Ordering::SeqCst);
        };

        assert!(start_once(&state, spawn));
        assert!(!start_once(&state, spawn));
        assert!(!start_once(&state, spawn));
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_ready_leaves_the_running_scheduler_alone() {
        let state = state();
        on_ready(&state, ready());
        assert!(state.scheduler.is_started());

        // A later READY returns without trying to start anything.
        on_ready(&state, ready());
        assert!(state.scheduler.is_started());
    }

    #[test]
    fn guild_events_are_tolerated() {
        let state = state();
        let guild: Guild = serde_json::from_str(
            r#"{"id":"1","name":"Lega","channels":[
                {"id":"10","type":0,"name":"votazioni"},
                {"id":"11","type":2,"name":"votazioni-vocale"}
            ]}"#,
        )
        .unwrap();
        on_guild_create(&state, guild);
        on_guild_delete(UnavailableGuild {
            id: "1".into(),
            unavailable: true,
        });
    }
}
