use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External chat platform a default user's channel lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Twitch,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Twitch => "twitch",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "youtube" => Some(Platform::Youtube),
            "twitch" => Some(Platform::Twitch),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One chat identity, bound to exactly one external channel on one platform.
///
/// Created the first time a channel is observed in chat and never deleted.
/// The `aggregate_user_id` edge is the only durable state mutated by the
/// link/unlink protocols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultUser {
    pub id: i64,
    pub platform: String,
    pub external_id: String,
    pub display_name: Option<String>,
    pub aggregate_user_id: Option<i64>,
    pub linked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DefaultUser {
    pub fn platform_enum(&self) -> Option<Platform> {
        Platform::from_str(&self.platform)
    }
}

/// The platform-independent identity a person links their channels into.
/// 1:1 with a registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateUser {
    pub id: i64,
    pub registered_username: String,
    pub created_at: DateTime<Utc>,
}

/// The full connected set for a requested chat user id.
///
/// `connected_ids` always contains the queried id itself. For a linked user
/// it also contains the aggregate user and every default user attached to it.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedUserIds {
    pub id: i64,
    pub connected_ids: Vec<i64>,
}

/// A streamer and their primary channels, one per platform at most.
///
/// A primary channel is the default user the streamer broadcasts from; it is
/// load-bearing for the streamer's own identity and must never be unlinked.
#[derive(Debug, Clone, Serialize)]
pub struct Streamer {
    pub id: i64,
    pub aggregate_user_id: i64,
    pub name: String,
    pub youtube_primary_channel_id: Option<i64>,
    pub twitch_primary_channel_id: Option<i64>,
}

impl Streamer {
    /// Check whether the given default user is one of this streamer's
    /// primary channels.
    pub fn is_primary_channel(&self, default_user_id: i64) -> bool {
        self.youtube_primary_channel_id == Some(default_user_id)
            || self.twitch_primary_channel_id == Some(default_user_id)
    }
}
