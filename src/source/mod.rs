//! Message source capability
//!
//! The harvester never talks to a chat protocol directly. Everything it needs
//! from the remote side goes through [`MessageSource`]; connection handling,
//! authentication and wire formats live in the implementation.
//!
//! [`RawMessage`] is the complete set of fields the classifier reads. A source
//! fills in what it knows and leaves the rest as `None`.

pub mod memory;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::SourceError;
use crate::types::MessageId;

pub use memory::MemorySource;

/// The channel being harvested
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIdentity {
    /// Numeric channel id
    pub id: i64,
    /// Public handle, used to build message links
    pub username: String,
    /// Human-readable title
    #[serde(default)]
    pub title: Option<String>,
}

impl ChannelIdentity {
    /// Public link to a message in this channel
    pub fn message_url(&self, id: MessageId) -> String {
        format!("https://t.me/{}/{}", self.username, id)
    }
}

/// A resolved user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Numeric user id
    pub id: i64,
    /// Handle without the leading `@`
    #[serde(default)]
    pub username: Option<String>,
    /// First name
    #[serde(default)]
    pub first_name: Option<String>,
    /// Last name
    #[serde(default)]
    pub last_name: Option<String>,
}

impl UserIdentity {
    /// Most readable name available: full name, then handle, then numeric id
    pub fn display_name(&self) -> String {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let full = full.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        match self.username.as_deref() {
            Some(handle) if !handle.is_empty() => handle.to_string(),
            _ => self.id.to_string(),
        }
    }
}

/// How a user filter was written in the configuration
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UserQuery {
    /// Numeric id
    Id(i64),
    /// Handle, without the leading `@`
    Username(String),
}

impl UserQuery {
    /// Parse a filter value: digits are ids, anything else is a handle
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<i64>() {
            Ok(id) => UserQuery::Id(id),
            Err(_) => UserQuery::Username(trimmed.trim_start_matches('@').to_string()),
        }
    }
}

impl std::fmt::Display for UserQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserQuery::Id(id) => write!(f, "{id}"),
            UserQuery::Username(name) => write!(f, "@{name}"),
        }
    }
}

/// Kind of media attached to a message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// A compressed photo
    Photo,
    /// A file attachment
    Document {
        /// MIME type, when known
        mime_type: Option<String>,
    },
    /// Anything else (polls, stickers, web previews, ...)
    Other,
}

impl MediaKind {
    /// File extension for kinds the harvester downloads
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            MediaKind::Photo => Some("jpg"),
            MediaKind::Document { .. } | MediaKind::Other => None,
        }
    }
}

/// Media attached to a message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    /// What kind of media
    pub kind: MediaKind,
    /// Size of the largest rendition in bytes, when advertised
    #[serde(default)]
    pub size: Option<u64>,
}

/// One reaction bucket as reported by the source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionCount {
    /// Emoji or custom reaction label
    pub emoji: String,
    /// Number of users
    pub count: u32,
}

/// A recent individual reaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentReaction {
    /// Who reacted, when visible
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Whether the authenticated account placed it
    #[serde(default)]
    pub mine: bool,
}

/// Reaction summary of a message
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactions {
    /// Aggregated counts per emoji, in display order
    #[serde(default)]
    pub results: Vec<ReactionCount>,
    /// Recent individual reactions
    #[serde(default)]
    pub recent: Vec<RecentReaction>,
}

/// The message a message replies to
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContext {
    /// Text of the replied-to message
    #[serde(default)]
    pub text: Option<String>,
    /// Sender of the replied-to message
    #[serde(default)]
    pub sender: Option<UserIdentity>,
}

/// A message as delivered by the source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Message id
    pub id: MessageId,
    /// Creation time
    pub date: DateTime<Utc>,
    /// Sender id, when visible
    #[serde(default)]
    pub sender_id: Option<i64>,
    /// Forum topic, when the channel has topics
    #[serde(default)]
    pub topic_id: Option<i64>,
    /// Attached media
    #[serde(default)]
    pub media: Option<Media>,
    /// Reaction summary
    #[serde(default)]
    pub reactions: Option<Reactions>,
    /// Resolved reply target
    #[serde(default)]
    pub reply: Option<ReplyContext>,
}

/// Everything the harvester needs from a chat backend
///
/// Implementations must be safe to call concurrently; the download
/// orchestrator issues several [`fetch_media`](Self::fetch_media) calls at once.
#[async_trait::async_trait]
pub trait MessageSource: Send + Sync {
    /// Resolve the channel being harvested
    async fn channel(&self) -> Result<ChannelIdentity, SourceError>;

    /// Total number of messages, when cheaply available (used for progress)
    async fn message_count(&self) -> Result<Option<u64>, SourceError> {
        Ok(None)
    }

    /// Messages with an id strictly greater than `min_id`, oldest first
    ///
    /// `None` lists the whole channel. The stream is lazy and can be
    /// re-created with a different `min_id`.
    fn list_messages_since(
        &self,
        min_id: Option<MessageId>,
    ) -> BoxStream<'_, Result<RawMessage, SourceError>>;

    /// Look up messages by id; ids that no longer exist are absent from the map
    async fn get_messages_by_id(
        &self,
        ids: &[MessageId],
    ) -> Result<HashMap<MessageId, RawMessage>, SourceError>;

    /// Write the message's media to `destination`, returning the bytes written
    async fn fetch_media(
        &self,
        message: &RawMessage,
        destination: &Path,
    ) -> Result<u64, SourceError>;

    /// Resolve a user filter
    async fn resolve_user(&self, query: &UserQuery) -> Result<UserIdentity, SourceError>;
}
