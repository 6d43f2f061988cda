//! Bot configuration.
//!
//! Only the credential comes from the environment. Everything else is a
//! compile-time constant exposed through [`BotConfig`] so tests can swap it.

use std::time::Duration;

use chrono_tz::Tz;

use crate::error::ConfigError;

/// Environment variable holding the bot token.
pub const TOKEN_ENV_VAR: &str = "DISCORD_BOT_TOKEN";

/// Value shipped in the example `.env`.
pub const PLACEHOLDER_TOKEN: &str = "your_bot_token_here";

/// Real bot tokens are far longer; anything below this is a typo.
pub const MIN_TOKEN_LEN: usize = 20;

/// Polls are dated and scheduled in Italian local time.
pub const TIMEZONE: Tz = chrono_tz::Europe::Rome;

/// Case-insensitive substring that marks a channel as a poll target.
pub const CHANNEL_MARKER: &str = "votazioni";

/// Pause between two poll requests within one run.
pub const REQUEST_PAUSE: Duration = Duration::from_secs(1);

/// GUILDS(1): enough to receive READY and guild availability.
pub const GATEWAY_INTENTS: u32 = 1;

#[derive(Clone)]
pub struct BotConfig {
    pub token: String,
    pub timezone: Tz,
    pub marker: String,
    pub request_pause: Duration,
    pub intents: u32,
}

impl BotConfig {
    /// Config with the given token and production defaults for the rest.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            timezone: TIMEZONE,
            marker: CHANNEL_MARKER.to_string(),
            request_pause: REQUEST_PAUSE,
            intents: GATEWAY_INTENTS,
        }
    }

    /// Load the credential from the process environment (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        #[cfg(feature = "io")]
        dotenv::dotenv().ok();

        let token = validate_token(std::env::var(TOKEN_ENV_VAR).ok())?;
        Ok(Self::with_token(token))
    }
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &"<redacted>")
            .field("timezone", &self.timezone)
            .field("marker", &self.marker)
            .field("request_pause", &self.request_pause)
            .field("intents", &self.intents)
            .finish()
    }
}

/// Check that a raw credential is present and plausible.
///
/// Surrounding whitespace (a common `.env` mistake) is stripped.
pub fn validate_token(raw: Option<String>) -> Result<String, ConfigError> {
    let token = raw.as_deref().map(str::trim).unwrap_or_default();

    if token.is_empty() {
        return Err(ConfigError::MissingToken);
    }
    if token == PLACEHOLDER_TOKEN {
        return Err(ConfigError::PlaceholderToken);
    }
    let len = token.chars().count();
    if len < MIN_TOKEN_LEN {
        return Err(ConfigError::TokenTooShort { len });
    }

    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "MTIzNDU2Nzg5MDEyMzQ1Njc4OQ.ABCDEF.xyz123";

    #[test]
    fn missing_token_is_rejected() {
        assert_eq!(validate_token(None), Err(ConfigError::MissingToken));
        assert_eq!(
            validate_token(Some(String::new())),
            Err(ConfigError::MissingToken)
        );
        assert_eq!(
            validate_token(Some("   ".into())),
            Err(ConfigError::MissingToken)
        );
    }

    #[test]
    fn placeholder_token_is_rejected() {
        assert_eq!(
            validate_token(Some(PLACEHOLDER_TOKEN.into())),
            Err(ConfigError::PlaceholderToken)
        );
    }

    #[test]
    fn short_token_is_rejected() {
        assert_eq!(
            validate_token(Some("abc123".into())),
            Err(ConfigError::TokenTooShort { len: 6 })
        );
    }

    #[test]
    fn plausible_token_is_trimmed_and_accepted() {
        let token = validate_token(Some(format!("  {GOOD}\n"))).unwrap();
        assert_eq!(token, GOOD);
    }

    #[test]
    fn defaults_match_the_daily_poll() {
        let config = BotConfig::with_token(GOOD);
        assert_eq!(config.timezone, chrono_tz::Europe::Rome);
        assert_eq!(config.marker, "votazioni");
        assert_eq!(config.request_pause, Duration::from_secs(1));
        assert_ne!(config.intents & 1, 0, "missing GUILDS");
    }

    #[test]
    fn debug_output_redacts_token() {
        let config = BotConfig::with_token(GOOD);
        let dbg = format!("{config:?}");
        assert!(!dbg.contains(GOOD));
        assert!(dbg.contains("<redacted>"));
    }
}
