//! Daily survey bot entry point.
//!
//! Loads the credential, runs the bot session, and turns its outcome into a
//! process exit status. Everything else lives in the library.

use tracing::info;

use daily_poll_bot::{bot, BotConfig, BotError};

#[tokio::main]
async fn main() {
    // Initialise tracing (respects RUST_LOG env, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => fail(BotError::from(e)),
    };

    info!(?config, "starting daily survey bot");

    match bot::supervise(bot::run(config), tokio::signal::ctrl_c()).await {
        Ok(()) => std::process::exit(0),
        Err(e) => fail(e),
    }
}

/// Print remediation text and exit with the error's status.
fn fail(error: BotError) -> ! {
    tracing::error!(%error, "bot cannot continue");
    eprintln!("{}", error.guidance());
    std::process::exit(error.exit_code());
}
