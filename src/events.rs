//! Typed gateway events.
//!
//! The gateway module deserialises dispatch payloads into this enum so the
//! bot session can pattern-match on typed data instead of raw
//! `(op, t, serde_json::Value)` tuples.

use tracing::warn;

use crate::types::*;

// ---------------------------------------------------------------------------
// Fatal close codes
// ---------------------------------------------------------------------------

/// Gateway close codes that no amount of reconnecting can fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalClose {
    AuthenticationFailed,
    InvalidShard,
    ShardingRequired,
    InvalidApiVersion,
    InvalidIntents,
    DisallowedIntents,
}

impl FatalClose {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            4004 => Some(FatalClose::AuthenticationFailed),
            4010 => Some(FatalClose::InvalidShard),
            4011 => Some(FatalClose::ShardingRequired),
            4012 => Some(FatalClose::InvalidApiVersion),
            4013 => Some(FatalClose::InvalidIntents),
            4014 => Some(FatalClose::DisallowedIntents),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            FatalClose::AuthenticationFailed => 4004,
            FatalClose::InvalidShard => 4010,
            FatalClose::ShardingRequired => 4011,
            FatalClose::InvalidApiVersion => 4012,
            FatalClose::InvalidIntents => 4013,
            FatalClose::DisallowedIntents => 4014,
        }
    }
}

impl std::fmt::Display for FatalClose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self {
            FatalClose::AuthenticationFailed => "authentication failed",
            FatalClose::InvalidShard => "invalid shard",
            FatalClose::ShardingRequired => "sharding required",
            FatalClose::InvalidApiVersion => "invalid API version",
            FatalClose::InvalidIntents => "invalid intents",
            FatalClose::DisallowedIntents => "disallowed intents",
        };
        write!(f, "{} (close {})", what, self.code())
    }
}

// ---------------------------------------------------------------------------
// The top-level event enum
// ---------------------------------------------------------------------------

/// A fully-parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// We've successfully identified and the bot is ready.
    Ready(ReadyEvent),

    /// A session was resumed after a reconnect.
    Resumed,

    /// Full guild object lazily sent after READY or on join.
    GuildCreate(Guild),

    /// The bot left a guild or it became unavailable.
    GuildDelete(UnavailableGuild),

    /// Heartbeat ACK from the gateway (op 11).
    HeartbeatAck,

    /// The gateway is asking us to heartbeat immediately (op 1).
    HeartbeatRequest,

    /// Gateway told us to reconnect (op 7).
    Reconnect,

    /// Session has been invalidated (op 9). The inner bool indicates whether
    /// the session is resumable.
    InvalidSession(bool),

    /// The gateway closed the connection for good. Emitted by the driver,
    /// never parsed from a payload.
    Fatal(FatalClose),

    /// An event we received but don't have a typed variant for.
    Unknown {
        event_name: Option<String>,
        op: u8,
    },
}

// ---------------------------------------------------------------------------
// Parsing from a raw GatewayPayload
// ---------------------------------------------------------------------------

impl GatewayEvent {
    /// Convert a raw [`GatewayPayload`] into a typed event.
    ///
    /// This never fails; unrecognised events become [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::parse_dispatch(payload.t.as_deref(), payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => {
                let resumable = payload
                    .d
                    .as_ref()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            11 => GatewayEvent::HeartbeatAck,
            _ => GatewayEvent::Unknown {
                event_name: payload.t,
                op: payload.op,
            },
        }
    }

    /// Parse an op-0 DISPATCH event by its `t` name.
    fn parse_dispatch(event_name: Option<&str>, data: Option<serde_json::Value>) -> Self {
        let unknown = || GatewayEvent::Unknown {
            event_name: event_name.map(str::to_string),
            op: 0,
        };

        let Some(name) = event_name else {
            return unknown();
        };

        if name == "RESUMED" {
            return GatewayEvent::Resumed;
        }

        let Some(d) = data else {
            return unknown();
        };

        match name {
            "READY" => parse_or_unknown(name, d, GatewayEvent::Ready),
            "GUILD_CREATE" => parse_or_unknown(name, d, GatewayEvent::GuildCreate),
            "GUILD_DELETE" => parse_or_unknown(name, d, GatewayEvent::GuildDelete),
            _ => unknown(),
        }
    }
}

fn parse_or_unknown<T, F>(name: &str, data: serde_json::Value, wrap: F) -> GatewayEvent
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(T) -> GatewayEvent,
{
    match serde_json::from_value::<T>(data) {
        Ok(parsed) => wrap(parsed),
        Err(e) => {
            warn!(event = name, error = %e, "failed to parse dispatch payload");
            GatewayEvent::Unknown {
                event_name: Some(name.to_string()),
                op: 0,
            }
        }
    }
}
