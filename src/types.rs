//! Core types for media-harvest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::PathBuf;

use crate::error::FailureReason;

/// Identifier of a message, assigned by the source and never reused
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    /// Create a new MessageId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<MessageId> for i64 {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for MessageId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Classification bucket a qualifying message can be filed under
///
/// A message can belong to several categories at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Any reaction at all
    Engagement,
    /// A reply to, or from, the tracked user
    UserReply,
    /// Reacted to by the tracked user
    UserReaction,
}

impl Category {
    /// All categories in processing order
    pub const ALL: [Category; 3] = [
        Category::Engagement,
        Category::UserReply,
        Category::UserReaction,
    ];

    /// Directory name under the output root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Engagement => "all_reactions",
            Category::UserReply => "user_replies",
            Category::UserReaction => "my_reactions",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::Engagement => "engagement",
            Category::UserReply => "user_reply",
            Category::UserReaction => "user_reaction",
        };
        f.write_str(name)
    }
}

/// One emoji and how many times it was used
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// The emoji (or custom reaction label)
    pub emoji: String,
    /// Number of users who reacted with it
    pub count: u32,
}

/// Everything the log knows about one qualifying message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Message id
    pub id: MessageId,
    /// Creation time as `yymmdd_HHMM`
    pub timestamp: String,
    /// Creation time as RFC 3339
    pub date_iso: String,
    /// Public link to the message
    pub url: String,

    /// Whether this message replies to another one
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_reply: bool,
    /// Text of the message this one replies to
    #[serde(default)]
    pub reply_text: Option<String>,
    /// Sender id of the message this one replies to
    #[serde(default)]
    pub reply_user_id: Option<i64>,
    /// Sender handle of the message this one replies to
    #[serde(default)]
    pub reply_username: Option<String>,
    /// Display name of the sender of the message this one replies to
    #[serde(default)]
    pub reply_name: Option<String>,

    /// Whether any reaction is present
    pub has_reactions: bool,
    /// Whether the authenticated account reacted
    #[serde(default)]
    pub my_reaction: bool,
    /// Sum of all reaction counts
    pub total_reactions: u64,
    /// Reactions in source order
    #[serde(default)]
    pub reactions: Vec<Reaction>,

    /// Sender of this message, when the source exposes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    /// Users listed among the recent reactors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactor_ids: Vec<i64>,
    /// Forum topic the message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<i64>,

    /// Deterministic on-disk stem
    pub base_filename: String,
    /// File extension for the media kind
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Whether the file was downloaded and verified
    #[serde(default)]
    pub downloaded: bool,
    /// Size of the verified file in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

fn default_extension() -> String {
    "jpg".to_string()
}

impl MessageRecord {
    /// File name (stem plus extension) used in every category directory
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.base_filename, self.extension)
    }
}

/// The persisted download log
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogState {
    /// When the last scan finished
    #[serde(default)]
    pub last_scan_time: Option<DateTime<Utc>>,
    /// Highest id among records with `downloaded == true`
    #[serde(default)]
    pub last_successful_id: Option<MessageId>,
    /// Records keyed by message id
    #[serde(default)]
    pub messages: BTreeMap<MessageId, MessageRecord>,
}

impl LogState {
    /// Number of records marked as downloaded
    pub fn downloaded_count(&self) -> usize {
        self.messages.values().filter(|r| r.downloaded).count()
    }

    /// Highest id among downloaded records
    pub fn max_downloaded_id(&self) -> Option<MessageId> {
        self.messages
            .values()
            .filter(|r| r.downloaded)
            .map(|r| r.id)
            .max()
    }

    /// Re-derive `last_successful_id` from the records
    pub fn refresh_last_successful_id(&mut self) {
        self.last_successful_id = self.max_downloaded_id();
    }

    /// Insert or replace a freshly classified record
    ///
    /// A record already marked downloaded is kept as-is, so its file name stays
    /// stable, unless `replace_downloaded` is set, which only a forced
    /// re-download does. Returns whether the new record was stored.
    pub fn upsert(&mut self, record: MessageRecord, replace_downloaded: bool) -> bool {
        let stored = match self.messages.entry(record.id) {
            Entry::Occupied(mut entry) => {
                if entry.get().downloaded && !replace_downloaded {
                    false
                } else {
                    entry.insert(record);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
                true
            }
        };
        if stored && replace_downloaded {
            self.refresh_last_successful_id();
        }
        stored
    }

    /// Mark a record as verified and advance `last_successful_id`
    ///
    /// Returns false when the id is unknown.
    pub fn mark_downloaded(&mut self, id: MessageId, file_size: u64) -> bool {
        let Some(record) = self.messages.get_mut(&id) else {
            return false;
        };
        record.downloaded = true;
        record.file_size = Some(file_size);
        if self.last_successful_id.is_none_or(|last| id > last) {
            self.last_successful_id = Some(id);
        }
        true
    }
}

/// Scan output: qualifying records per category, in scan order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QualifiedMessages {
    by_category: BTreeMap<Category, Vec<MessageRecord>>,
}

impl QualifiedMessages {
    /// Append `record` to `category`
    pub fn push(&mut self, category: Category, record: MessageRecord) {
        self.by_category.entry(category).or_default().push(record);
    }

    /// Records assigned to `category`
    pub fn get(&self, category: Category) -> &[MessageRecord] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of records assigned to `category`
    pub fn count(&self, category: Category) -> usize {
        self.get(category).len()
    }

    /// Sum of all category counts
    pub fn total(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }

    /// Whether no category received anything
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Every (category, record) assignment, category by category
    pub fn iter(&self) -> impl Iterator<Item = (Category, &MessageRecord)> {
        self.by_category
            .iter()
            .flat_map(|(category, records)| records.iter().map(move |r| (*category, r)))
    }
}

/// A fetched file waiting for verification; never persisted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadAttempt {
    /// The record the file belongs to
    pub record: MessageRecord,
    /// Category directory the file was written to
    pub category: Category,
    /// Where the file was written
    pub target_path: PathBuf,
    /// Size reported when the write finished
    pub expected_size: u64,
}

/// A message that could not be harvested, with the reason
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDownload {
    /// Message id
    pub id: MessageId,
    /// Category being served when the failure happened
    pub category: Category,
    /// Public link to the message
    pub url: String,
    /// Why it failed
    pub reason: FailureReason,
}

impl FailedDownload {
    /// Build a failure entry for `record`
    pub fn new(record: &MessageRecord, category: Category, reason: FailureReason) -> Self {
        Self {
            id: record.id,
            category,
            url: record.url.clone(),
            reason,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64) -> MessageRecord {
        MessageRecord {
            id: MessageId(id),
            timestamp: "240101_1200".into(),
            date_iso: "2024-01-01T12:00:00+00:00".into(),
            url: format!("https://t.me/photos/{id}"),
            is_reply: false,
            reply_text: None,
            reply_user_id: None,
            reply_username: None,
            reply_name: None,
            has_reactions: true,
            my_reaction: false,
            total_reactions: 1,
            reactions: vec![Reaction {
                emoji: "👍".into(),
                count: 1,
            }],
            sender_id: None,
            reactor_ids: vec![],
            topic_id: None,
            base_filename: format!("240101_1200_unnamed_r1_no_reply_text_{id}"),
            extension: "jpg".into(),
            downloaded: false,
            file_size: None,
        }
    }

    #[test]
    fn message_ids_serialize_as_string_keys() {
        let mut state = LogState::default();
        state.upsert(record(42), false);

        let json = serde_json::to_value(&state).unwrap();
        assert!(json["messages"]["42"].is_object());
        assert!(json["last_successful_id"].is_null());

        let restored: LogState = serde_json::from_value(json).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn mark_downloaded_advances_last_successful_id_monotonically() {
        let mut state = LogState::default();
        for id in [3, 9, 5] {
            state.upsert(record(id), false);
        }

        assert!(state.mark_downloaded(MessageId(9), 100));
        assert!(state.mark_downloaded(MessageId(3), 100));
        assert_eq!(state.last_successful_id, Some(MessageId(9)));
        assert_eq!(state.last_successful_id, state.max_downloaded_id());
        assert_eq!(state.downloaded_count(), 2);
    }

    #[test]
    fn mark_downloaded_ignores_unknown_ids() {
        let mut state = LogState::default();
        assert!(!state.mark_downloaded(MessageId(1), 10));
        assert_eq!(state.last_successful_id, None);
    }

    #[test]
    fn upsert_keeps_downloaded_record_without_force() {
        let mut state = LogState::default();
        state.upsert(record(7), false);
        state.mark_downloaded(MessageId(7), 2048);

        let mut fresh = record(7);
        fresh.total_reactions = 5;
        fresh.base_filename = "renamed".into();
        assert!(!state.upsert(fresh, false));

        let stored = &state.messages[&MessageId(7)];
        assert!(stored.downloaded, "downloaded must never be reset");
        assert_eq!(stored.file_size, Some(2048));
        assert_ne!(stored.base_filename, "renamed", "file name must stay stable");
    }

    #[test]
    fn upsert_refreshes_records_not_yet_downloaded() {
        let mut state = LogState::default();
        state.upsert(record(7), false);

        let mut fresh = record(7);
        fresh.total_reactions = 5;
        assert!(state.upsert(fresh, false));
        assert_eq!(state.messages[&MessageId(7)].total_reactions, 5);
    }

    #[test]
    fn forced_upsert_replaces_downloaded_record() {
        let mut state = LogState::default();
        state.upsert(record(7), false);
        state.mark_downloaded(MessageId(7), 2048);

        assert!(state.upsert(record(7), true));
        assert!(!state.messages[&MessageId(7)].downloaded);
        assert_eq!(state.last_successful_id, None);
    }

    #[test]
    fn records_load_without_optional_fields() {
        let json = r#"{
            "id": 5,
            "timestamp": "240101_1200",
            "date_iso": "2024-01-01T12:00:00+00:00",
            "url": "https://t.me/photos/5",
            "has_reactions": true,
            "total_reactions": 2,
            "base_filename": "x",
            "my_reaction": false
        }"#;
        let record: MessageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.extension, "jpg");
        assert!(!record.downloaded);
        assert_eq!(record.file_name(), "x.jpg");
    }

    #[test]
    fn qualified_messages_count_across_categories() {
        let mut qualified = QualifiedMessages::default();
        assert!(qualified.is_empty());
        assert!(qualified.get(Category::UserReply).is_empty());

        qualified.push(Category::UserReaction, record(2));
        qualified.push(Category::Engagement, record(1));
        qualified.push(Category::Engagement, record(2));

        assert_eq!(qualified.total(), 3);
        assert_eq!(qualified.count(Category::Engagement), 2);
        let order: Vec<_> = qualified.iter().map(|(c, r)| (c, r.id.0)).collect();
        assert_eq!(
            order,
            vec![
                (Category::Engagement, 1),
                (Category::Engagement, 2),
                (Category::UserReaction, 2)
            ]
        );
    }

    #[test]
    fn category_display_and_dirs_are_distinct() {
        let dirs: std::collections::HashSet<_> =
            Category::ALL.iter().map(|c| c.dir_name()).collect();
        assert_eq!(dirs.len(), 3);
        assert_eq!(Category::UserReply.to_string(), "user_reply");
    }
}
