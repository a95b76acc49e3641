//! Fixtures: channels, messages and configs rooted in a temp dir

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use media_harvest::source::{
    ChannelIdentity, Media, MediaKind, RawMessage, ReactionCount, Reactions, RecentReaction,
    ReplyContext, UserIdentity,
};
use media_harvest::{HarvestConfig, Harvester, MemorySource, MessageId, MessageSource};
use tempfile::TempDir;

pub const CHANNEL: &str = "photos";

pub fn channel() -> ChannelIdentity {
    ChannelIdentity {
        id: 1001,
        username: CHANNEL.to_string(),
        title: Some("Photos".to_string()),
    }
}

/// Photo posted `id` minutes after 2024-03-07 00:00 UTC, no engagement
pub fn bare_photo(id: i64) -> RawMessage {
    RawMessage {
        id: MessageId(id),
        date: Utc.with_ymd_and_hms(2024, 3, 7, 0, 0, 0).unwrap() + chrono::Duration::minutes(id),
        sender_id: None,
        topic_id: None,
        media: Some(Media {
            kind: MediaKind::Photo,
            size: None,
        }),
        reactions: None,
        reply: None,
    }
}

/// Photo with `count` 👍 reactions
pub fn reacted_photo(id: i64, count: u32) -> RawMessage {
    let mut message = bare_photo(id);
    message.reactions = Some(Reactions {
        results: vec![ReactionCount {
            emoji: "👍".to_string(),
            count,
        }],
        recent: vec![],
    });
    message
}

/// Photo replying to `to`
pub fn reply_photo(id: i64, to: UserIdentity, text: &str) -> RawMessage {
    let mut message = bare_photo(id);
    message.reply = Some(ReplyContext {
        text: Some(text.to_string()),
        sender: Some(to),
    });
    message
}

/// Add a visible reaction from `user_id`
pub fn reacted_by(mut message: RawMessage, user_id: i64) -> RawMessage {
    let reactions = message.reactions.get_or_insert_with(Reactions::default);
    if reactions.results.is_empty() {
        reactions.results.push(ReactionCount {
            emoji: "❤".to_string(),
            count: 1,
        });
    }
    reactions.recent.push(RecentReaction {
        user_id: Some(user_id),
        mine: false,
    });
    message
}

pub fn user(id: i64, handle: &str, first: &str) -> UserIdentity {
    UserIdentity {
        id,
        username: Some(handle.to_string()),
        first_name: Some(first.to_string()),
        last_name: None,
    }
}

/// Source holding a reacted photo for every id
pub fn source_with_reacted(ids: impl IntoIterator<Item = i64>) -> MemorySource {
    let source = MemorySource::new(channel());
    for id in ids {
        source.insert_message(reacted_photo(id, 1));
    }
    source
}

/// Config rooted in `dir` with no settle delay and short retry delays
pub fn config_in(dir: &Path) -> HarvestConfig {
    let mut config = HarvestConfig::for_channel(CHANNEL);
    config.download.output_dir = dir.join("downloads");
    config.download.settle_delay = Duration::ZERO;
    config.persistence.log_file = dir.join("download_log.json");
    config.retry.transient_delay = Duration::from_millis(5);
    config
}

/// A workspace directory plus its config
pub struct Workspace {
    pub dir: TempDir,
    pub config: HarvestConfig,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        Self { dir, config }
    }

    pub fn harvester(&self, source: &MemorySource) -> Harvester {
        let source: Arc<dyn MessageSource> = Arc::new(source.clone());
        Harvester::new(self.config.clone(), source).unwrap()
    }

    pub fn log_json(&self) -> serde_json::Value {
        let text = std::fs::read_to_string(&self.config.persistence.log_file).unwrap();
        serde_json::from_str(&text).unwrap()
    }
}

/// File name the classifier derives for `reacted_photo(id, count)`
pub fn reacted_file_name(id: i64, count: u32) -> String {
    format!(
        "240307_{:02}{:02}_unnamed_r{count}_no_reply_text_{id}.jpg",
        id / 60,
        id % 60
    )
}

/// Bytes `MemorySource` writes for a message without a configured payload
pub fn default_payload(id: i64) -> Vec<u8> {
    format!("media-{id}").into_bytes()
}
