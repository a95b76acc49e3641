//! Message classification
//!
//! Turns a [`RawMessage`] into a [`MessageRecord`], or rejects it. The
//! classifier only reads fields declared on the raw message schema and does
//! no I/O, so the same message always yields the same record.

use regex::Regex;

use crate::error::{Error, Result};
use crate::source::{ChannelIdentity, RawMessage};
use crate::types::{MessageRecord, Reaction};

/// Stem part used when a message is not a reply
const UNNAMED: &str = "unnamed";
/// Stem part used when the replied-to message has no text
const NO_REPLY_TEXT: &str = "no_reply_text";
/// Result of sanitizing text that has nothing usable left
const UNTITLED: &str = "untitled";

/// Makes free text safe to embed in a file name
#[derive(Clone, Debug)]
pub struct FilenameSanitizer {
    hostile: Regex,
    separators: Regex,
    underscores: Regex,
    max_length: usize,
}

impl FilenameSanitizer {
    /// Create a sanitizer truncating to `max_length` characters
    pub fn new(max_length: usize) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Other(format!("invalid pattern {pattern}: {e}")))
        };
        Ok(Self {
            hostile: compile(r#"[<>:"/\\|?*\x00-\x1f]"#)?,
            separators: compile(r"[\s,]")?,
            underscores: compile(r"_+")?,
            max_length,
        })
    }

    /// Sanitize `text`
    ///
    /// `None` becomes `unnamed`; text with nothing left after cleaning becomes
    /// `untitled`. The result never contains path separators or whitespace.
    pub fn sanitize(&self, text: Option<&str>) -> String {
        let Some(text) = text else {
            return UNNAMED.to_string();
        };
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let cleaned = self.hostile.replace_all(&collapsed, "");
        let joined = self.separators.replace_all(&cleaned, "_");
        let squeezed = self.underscores.replace_all(&joined, "_");
        if squeezed.is_empty() {
            return UNTITLED.to_string();
        }
        squeezed.chars().take(self.max_length).collect()
    }
}

/// Classifies messages of one channel
#[derive(Clone, Debug)]
pub struct Classifier {
    channel: ChannelIdentity,
    topic_filter: Option<i64>,
    sanitizer: FilenameSanitizer,
}

impl Classifier {
    /// Create a classifier for `channel`, optionally limited to one forum topic
    pub fn new(
        channel: ChannelIdentity,
        topic_filter: Option<i64>,
        name_max_length: usize,
    ) -> Result<Self> {
        Ok(Self {
            channel,
            topic_filter,
            sanitizer: FilenameSanitizer::new(name_max_length)?,
        })
    }

    /// The channel messages are classified for
    pub fn channel(&self) -> &ChannelIdentity {
        &self.channel
    }

    /// Build the record for `raw`, or `None` when it does not qualify
    ///
    /// A message qualifies when it carries a photo, lies inside the topic
    /// filter, and has at least one reaction or is a reply.
    pub fn classify(&self, raw: &RawMessage) -> Option<MessageRecord> {
        let extension = raw.media.as_ref()?.kind.extension()?;
        if let Some(topic) = self.topic_filter
            && raw.topic_id != Some(topic)
        {
            return None;
        }

        let reactions: Vec<Reaction> = raw
            .reactions
            .iter()
            .flat_map(|r| r.results.iter())
            .map(|r| Reaction {
                emoji: r.emoji.clone(),
                count: r.count,
            })
            .collect();
        let recent = raw.reactions.iter().flat_map(|r| r.recent.iter());
        let my_reaction = recent.clone().any(|r| r.mine);
        let mut reactor_ids: Vec<i64> = Vec::new();
        for user_id in recent.filter_map(|r| r.user_id) {
            if !reactor_ids.contains(&user_id) {
                reactor_ids.push(user_id);
            }
        }

        let has_reactions = !reactions.is_empty();
        if !has_reactions && !my_reaction && raw.reply.is_none() {
            return None;
        }
        let total_reactions: u64 = reactions.iter().map(|r| u64::from(r.count)).sum();

        let reply_text = raw
            .reply
            .as_ref()
            .and_then(|reply| reply.text.clone())
            .filter(|text| !text.trim().is_empty());
        let reply_sender = raw.reply.as_ref().and_then(|reply| reply.sender.as_ref());
        let reply_name = reply_sender.map(|sender| sender.display_name());

        let timestamp = raw.date.format("%y%m%d_%H%M").to_string();
        let base_filename = format!(
            "{}_{}_r{}_{}_{}",
            timestamp,
            self.sanitizer
                .sanitize(Some(reply_name.as_deref().unwrap_or(UNNAMED))),
            total_reactions,
            self.sanitizer
                .sanitize(Some(reply_text.as_deref().unwrap_or(NO_REPLY_TEXT))),
            raw.id,
        );

        Some(MessageRecord {
            id: raw.id,
            timestamp,
            date_iso: raw.date.to_rfc3339(),
            url: self.channel.message_url(raw.id),
            is_reply: raw.reply.is_some(),
            reply_text,
            reply_user_id: reply_sender.map(|sender| sender.id),
            reply_username: reply_sender.and_then(|sender| sender.username.clone()),
            reply_name,
            has_reactions,
            my_reaction,
            total_reactions,
            reactions,
            sender_id: raw.sender_id,
            reactor_ids,
            topic_id: raw.topic_id,
            base_filename,
            extension: extension.to_string(),
            downloaded: false,
            file_size: None,
        })
    }
}
