//! Error types shared by the REST client, the dispatcher, and bootstrap.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Per-request errors
// ---------------------------------------------------------------------------

/// A failed call against the Discord REST API.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// Non-success status from Discord.
    #[error("Discord API error {status} on {route}: {body}")]
    Api {
        status: u16,
        body: String,
        route: String,
    },
    /// Transport / network error.
    #[error("HTTP transport error: {0}")]
    Transport(String),
    /// Serialisation error.
    #[error("Serialisation error: {0}")]
    Serde(String),
}

impl HttpError {
    /// HTTP status of an API error, if Discord answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The bot credential is absent or obviously wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("DISCORD_BOT_TOKEN not found")]
    MissingToken,
    #[error("DISCORD_BOT_TOKEN is still the placeholder value")]
    PlaceholderToken,
    #[error("DISCORD_BOT_TOKEN is too short ({len} characters)")]
    TokenTooShort { len: usize },
}

// ---------------------------------------------------------------------------
// Process-fatal errors
// ---------------------------------------------------------------------------

/// Everything that stops the bot process.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Discord rejected the credential.
    #[error("bot login failed: {0}")]
    Authentication(String),
    /// The gateway closed with a code that reconnecting cannot fix.
    #[error("gateway error: {0}")]
    Gateway(String),
    #[error(transparent)]
    Http(#[from] HttpError),
    /// The Ctrl+C handler could not be installed.
    #[error("could not listen for Ctrl+C: {0}")]
    Signal(#[source] std::io::Error),
}

impl BotError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Multi-line remediation text printed before exiting.
    pub fn guidance(&self) -> String {
        let banner = "=".repeat(60);
        let body = match self {
            BotError::Config(ConfigError::MissingToken) => "\
ERROR: DISCORD_BOT_TOKEN not found!

Please check:
1. .env file exists in the project folder
2. .env file contains: DISCORD_BOT_TOKEN=your_actual_token
3. Token is correct (no extra spaces)

Steps to fix:
1. Open .env file
2. Replace 'your_bot_token_here' with your actual bot token
3. Save the file
4. Run the bot again"
                .to_string(),
            BotError::Config(_) => "\
ERROR: Invalid Bot Token!

Your token appears to be invalid or still a placeholder.

Please:
1. Go to: https://discord.com/developers/applications
2. Select your application
3. Go to 'Bot' section
4. Click 'Reset Token' or 'Copy' to get your token
5. Update .env file with the correct token

Token should look like: MTIzNDU2Nzg5MDEyMzQ1Njc4OQ.ABCDEF.xyz123...
(Long string with dots)"
                .to_string(),
            BotError::Authentication(reason) => format!(
                "\
ERROR: Bot Login Failed!

Error: {reason}

Possible reasons:
1. Bot token is incorrect or expired
2. Token has extra spaces (check .env file)
3. Token was reset in Discord Developer Portal

Solution:
1. Go to: https://discord.com/developers/applications
2. Select your application -> Bot section
3. Click 'Reset Token' to get a new token
4. Update .env file: DISCORD_BOT_TOKEN=new_token_here
5. Make sure there are NO spaces around the = sign
6. Save and run again"
            ),
            BotError::Gateway(reason) => format!(
                "\
ERROR: Discord gateway refused the session!

Error: {reason}

Check that the bot application is allowed the GUILDS intent and
that the token belongs to a bot user."
            ),
            BotError::Http(e) => format!("Unexpected error: {e}"),
            BotError::Signal(e) => format!(
                "\
ERROR: Could not listen for Ctrl+C!

Error: {e}

The bot refuses to run without a way to stop it cleanly.
Run it from a regular terminal or service manager and try again."
            ),
        };
        format!("\n{banner}\n{body}\n{banner}\n")
    }
}
