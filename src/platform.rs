//! The chat platform as seen by a daily run.
//!
//! A run only needs two primitives: list the joined communities with their
//! text channels, and create a poll in one channel. [`Platform`] is the seam
//! that lets the dispatcher run against Discord or a test double.

use async_trait::async_trait;

use crate::community::Community;
use crate::error::HttpError;
use crate::types::{PollRequest, Snowflake};

#[async_trait]
pub trait Platform: Send + Sync {
    /// Joined communities in connection order. Channels are not filled in.
    async fn communities(&self) -> Result<Vec<Community>, HttpError>;

    /// Text channels of one community, in platform order.
    async fn channels(&self, community: &Community) -> Result<Community, HttpError>;

    /// Create `poll` in `channel_id`.
    async fn create_poll(&self, channel_id: &Snowflake, poll: &PollRequest) -> Result<(), HttpError>;
}
