//! Posting the daily poll to every target channel.
//!
//! Requests go out one at a time with a fixed pause in between. Each
//! channel's attempt is classified on its own; nothing that happens in one
//! channel stops the run.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tracing::{error, info, warn};

use crate::community::{matching_channels, select_targets, Target};
use crate::config::BotConfig;
use crate::error::HttpError;
use crate::platform::Platform;
use crate::poll;
use crate::types::{PollRequest, Snowflake};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened when posting to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Discord answered 403.
    PermissionDenied,
    /// Discord answered with any other non-success status.
    HttpError(u16),
    /// Network, decoding, or a panic inside the attempt.
    Unexpected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    PermissionDenied,
    HttpError,
    Unexpected,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success => OutcomeKind::Success,
            Outcome::PermissionDenied => OutcomeKind::PermissionDenied,
            Outcome::HttpError(_) => OutcomeKind::HttpError,
            Outcome::Unexpected(_) => OutcomeKind::Unexpected,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Map the result of a poll request onto an [`Outcome`].
pub fn classify(result: Result<(), HttpError>) -> Outcome {
    match result {
        Ok(()) => Outcome::Success,
        Err(HttpError::Api { status: 403, .. }) => Outcome::PermissionDenied,
        Err(HttpError::Api { status, .. }) => Outcome::HttpError(status),
        Err(e) => Outcome::Unexpected(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub community: String,
    pub channel: String,
    pub channel_id: Snowflake,
    pub outcome: Outcome,
}

/// Everything one daily run did.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub started_at: DateTime<Utc>,
    pub reports: Vec<ChannelReport>,
}

impl RunResult {
    pub fn total(&self) -> usize {
        self.reports.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(OutcomeKind::Success)
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome.kind() == kind)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Post `poll` to each target in order, sleeping `pause` after every attempt.
pub async fn dispatch<P>(
    platform: &P,
    poll: &PollRequest,
    targets: &[Target],
    pause: Duration,
) -> RunResult
where
    P: Platform + ?Sized,
{
    let started_at = Utc::now();
    let mut reports = Vec::with_capacity(targets.len());

    for target in targets {
        let attempt = AssertUnwindSafe(platform.create_poll(&target.channel.id, poll))
            .catch_unwind()
            .await;

        let outcome = match attempt {
            Ok(result) => classify(result),
            Err(panic) => Outcome::Unexpected(panic_message(panic.as_ref())),
        };

        log_outcome(target, &poll.question.text, &outcome);

        reports.push(ChannelReport {
            community: target.community.clone(),
            channel: target.channel.name.clone(),
            channel_id: target.channel.id.clone(),
            outcome,
        });

        tokio::time::sleep(pause).await;
    }

    let result = RunResult {
        started_at,
        reports,
    };

    info!(
        succeeded = result.succeeded(),
        failed = result.failed(),
        total = result.total(),
        "daily survey summary"
    );

    result
}

/// One full daily run: list communities, pick targets, compose, dispatch.
pub async fn run_once<P>(platform: &P, config: &BotConfig) -> RunResult
where
    P: Platform + ?Sized,
{
    let local_now = Utc::now().with_timezone(&config.timezone);
    info!(at = %local_now.format("%Y-%m-%d %H:%M:%S %Z"), "daily survey task");

    let communities = match platform.communities().await {
        Ok(list) => list,
        Err(e) => {
            error!(error = %e, "failed to list servers, nothing to post");
            Vec::new()
        }
    };

    let mut listed = Vec::with_capacity(communities.len());
    for community in &communities {
        let full = match platform.channels(community).await {
            Ok(full) => full,
            Err(e) => {
                warn!(server = %community.name, error = %e, "failed to list channels, skipping server");
                continue;
            }
        };

        let matched = matching_channels(&full, &config.marker).len();
        if matched == 0 {
            info!(server = %full.name, marker = %config.marker, "no marker channels found in server");
        } else {
            info!(server = %full.name, channels = matched, "creating surveys");
        }
        listed.push(full);
    }

    let targets = select_targets(&listed, &config.marker);
    let poll = poll::compose_now(config.timezone);
    dispatch(platform, &poll, &targets, config.request_pause).await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn log_outcome(target: &Target, date: &str, outcome: &Outcome) {
    let channel = target.channel.name.as_str();
    let server = target.community.as_str();

    match outcome {
        Outcome::Success => {
            info!(channel, server, date, "survey created");
        }
        Outcome::PermissionDenied => {
            error!(
                channel,
                server, "permission denied, bot needs 'Send Messages' permission"
            );
        }
        Outcome::HttpError(status) => {
            let status = *status;
            error!(channel, server, status, "HTTP error creating survey");
            match status {
                400 => info!(
                    status,
                    "the poll was rejected; check the Discord API version and poll format, \
                     or whether the server supports polls"
                ),
                404 => info!(status, "channel not found or bot not in server"),
                429 => info!(status, "rate-limited by Discord"),
                _ => {}
            }
        }
        Outcome::Unexpected(message) => {
            error!(channel, server, error = %message, "unexpected error creating survey");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
