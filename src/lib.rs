//! Daily survey bot for Discord.
//!
//! Every day at local midnight the bot posts a multi-select poll, titled
//! with the date, to every text channel whose name contains a marker.
//!
//! Scheduling, channel selection, poll composition and dispatch are plain
//! library code behind the [`platform::Platform`] seam. The gateway, REST
//! client and bot session live behind the `io` feature; the binary delegates
//! to [`bot::run`].

pub mod community;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod platform;
pub mod poll;
pub mod schedule;
pub mod types;

#[cfg(feature = "io")]
pub mod bot;
#[cfg(feature = "io")]
pub mod gateway;
#[cfg(feature = "io")]
pub mod handlers;
#[cfg(feature = "io")]
pub mod http;

pub use config::BotConfig;
pub use dispatch::{run_once, Outcome, RunResult};
pub use error::{BotError, ConfigError, HttpError};
