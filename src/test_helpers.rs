//! Shared fixtures for unit tests

use std::path::Path;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use crate::classifier::Classifier;
use crate::config::HarvestConfig;
use crate::source::{
    ChannelIdentity, Media, MediaKind, MemorySource, RawMessage, ReactionCount, Reactions,
};
use crate::types::{MessageId, MessageRecord};

pub(crate) fn channel() -> ChannelIdentity {
    ChannelIdentity {
        id: 1001,
        username: "photos".into(),
        title: Some("Photos".into()),
    }
}

/// Photo with one 👍 reaction, posted `id` minutes after a fixed epoch
pub(crate) fn photo(id: i64) -> RawMessage {
    RawMessage {
        id: MessageId(id),
        date: Utc.with_ymd_and_hms(2024, 3, 7, 0, 0, 0).unwrap() + chrono::Duration::minutes(id),
        sender_id: None,
        topic_id: None,
        media: Some(Media {
            kind: MediaKind::Photo,
            size: None,
        }),
        reactions: Some(Reactions {
            results: vec![ReactionCount {
                emoji: "👍".into(),
                count: 1,
            }],
            recent: vec![],
        }),
        reply: None,
    }
}

pub(crate) fn record_for(raw: &RawMessage) -> MessageRecord {
    Classifier::new(channel(), None, 50)
        .unwrap()
        .classify(raw)
        .expect("fixture message must qualify")
}

/// Source pre-loaded with `photo(id)` for every id
pub(crate) fn source_with(ids: impl IntoIterator<Item = i64>) -> MemorySource {
    let source = MemorySource::new(channel());
    for id in ids {
        source.insert_message(photo(id));
    }
    source
}

/// Config rooted in `dir` with short delays
pub(crate) fn config_in(dir: &Path) -> HarvestConfig {
    let mut config = HarvestConfig::for_channel("photos");
    config.download.output_dir = dir.join("downloads");
    config.download.settle_delay = Duration::ZERO;
    config.persistence.log_file = dir.join("download_log.json");
    config.retry.transient_delay = Duration::from_millis(10);
    config
}
