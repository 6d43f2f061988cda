//! Communities (guilds), their text channels, and poll target selection.

use crate::types::{Channel, Guild, Snowflake};

/// A text channel inside a community.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChannel {
    pub id: Snowflake,
    pub name: String,
}

/// A joined guild and its text channels, in platform order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Community {
    pub id: Snowflake,
    pub name: String,
    pub channels: Vec<TextChannel>,
}

impl Community {
    /// Build a community from raw channel objects, keeping only named
    /// text and announcement channels.
    pub fn from_channels(
        id: impl Into<Snowflake>,
        name: impl Into<String>,
        channels: impl IntoIterator<Item = Channel>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            channels: channels.into_iter().filter_map(text_channel).collect(),
        }
    }
}

impl From<Guild> for Community {
    fn from(guild: Guild) -> Self {
        Community::from_channels(guild.id, guild.name, guild.channels)
    }
}

fn text_channel(channel: Channel) -> Option<TextChannel> {
    if !channel.kind.is_guild_text() {
        return None;
    }
    Some(TextChannel {
        id: channel.id,
        name: channel.name?,
    })
}

/// A channel chosen to receive the daily poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub community: String,
    pub channel: TextChannel,
}

/// Whether `name` contains `marker`, ignoring case.
pub fn is_marked(name: &str, marker: &str) -> bool {
    name.to_lowercase().contains(&marker.to_lowercase())
}

/// Channels of one community whose name contains `marker`.
pub fn matching_channels<'a>(community: &'a Community, marker: &str) -> Vec<&'a TextChannel> {
    community
        .channels
        .iter()
        .filter(|c| is_marked(&c.name, marker))
        .collect()
}

/// All marked channels across `communities`, in community then channel order.
pub fn select_targets(communities: &[Community], marker: &str) -> Vec<Target> {
    communities
        .iter()
        .flat_map(|community| {
            matching_channels(community, marker)
                .into_iter()
                .map(move |channel| Target {
                    community: community.name.clone(),
                    channel: channel.clone(),
                })
        })
        .collect()
}
