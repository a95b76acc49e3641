//! In-memory [`MessageSource`]
//!
//! Holds a fixed set of messages, users and media payloads. Failures can be
//! scripted per message, and fetch activity is counted, which makes it the
//! source of choice for tests and for replaying exported channel data.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};

use super::{ChannelIdentity, MessageSource, RawMessage, UserIdentity, UserQuery};
use crate::error::SourceError;
use crate::types::MessageId;

#[derive(Default)]
struct Inner {
    messages: BTreeMap<MessageId, RawMessage>,
    users: Vec<UserIdentity>,
    payloads: HashMap<MessageId, Vec<u8>>,
    scripted_failures: HashMap<MessageId, VecDeque<SourceError>>,
    misreported_sizes: HashMap<MessageId, u64>,
    fetches_per_message: HashMap<MessageId, usize>,
    list_requests: Vec<Option<MessageId>>,
    lookup_requests: Vec<Vec<MessageId>>,
}

/// A message source backed by memory
#[derive(Clone)]
pub struct MemorySource {
    channel: Option<ChannelIdentity>,
    fetch_delay: Option<Duration>,
    inner: Arc<Mutex<Inner>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MemorySource {
    /// Create an empty source for `channel`
    pub fn new(channel: ChannelIdentity) -> Self {
        Self {
            channel: Some(channel),
            fetch_delay: None,
            inner: Arc::new(Mutex::new(Inner::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A source whose channel cannot be resolved
    pub fn unavailable() -> Self {
        Self {
            channel: None,
            ..Self::new(ChannelIdentity {
                id: 0,
                username: String::new(),
                title: None,
            })
        }
    }

    /// Hold every media fetch for `delay` before writing
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add or replace a message
    pub fn insert_message(&self, message: RawMessage) {
        self.lock().messages.insert(message.id, message);
    }

    /// Remove a message, as if it was deleted remotely
    pub fn remove_message(&self, id: MessageId) {
        self.lock().messages.remove(&id);
    }

    /// Register a user that filters can resolve to
    pub fn insert_user(&self, user: UserIdentity) {
        self.lock().users.push(user);
    }

    /// Set the bytes written for a message's media
    ///
    /// Without a payload, a short deterministic placeholder is written.
    pub fn set_payload(&self, id: MessageId, bytes: impl Into<Vec<u8>>) {
        self.lock().payloads.insert(id, bytes.into());
    }

    /// Fail the next fetches of `id` with these errors, in order
    pub fn script_failures(&self, id: MessageId, errors: impl IntoIterator<Item = SourceError>) {
        self.lock()
            .scripted_failures
            .entry(id)
            .or_default()
            .extend(errors);
    }

    /// Report `size` bytes written for `id` regardless of what was written
    pub fn misreport_size(&self, id: MessageId, size: u64) {
        self.lock().misreported_sizes.insert(id, size);
    }

    /// Number of `fetch_media` calls across all messages
    pub fn fetch_count(&self) -> usize {
        self.lock().fetches_per_message.values().sum()
    }

    /// Number of `fetch_media` calls for one message
    pub fn fetch_count_for(&self, id: MessageId) -> usize {
        self.lock()
            .fetches_per_message
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of simultaneous `fetch_media` calls observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// The `min_id` of every `list_messages_since` call, in call order
    pub fn list_requests(&self) -> Vec<Option<MessageId>> {
        self.lock().list_requests.clone()
    }

    /// The ids of every `get_messages_by_id` call, in call order
    pub fn lookup_requests(&self) -> Vec<Vec<MessageId>> {
        self.lock().lookup_requests.clone()
    }

    fn payload_for(inner: &Inner, message: &RawMessage) -> Vec<u8> {
        if let Some(bytes) = inner.payloads.get(&message.id) {
            return bytes.clone();
        }
        let size = message
            .media
            .as_ref()
            .and_then(|media| media.size)
            .unwrap_or(0) as usize;
        let mut bytes = format!("media-{}", message.id).into_bytes();
        if size > bytes.len() {
            bytes.resize(size, b'.');
        }
        bytes
    }
}

/// Keeps the in-flight counter accurate even if a fetch future is dropped
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl MessageSource for MemorySource {
    async fn channel(&self) -> Result<ChannelIdentity, SourceError> {
        self.channel
            .clone()
            .ok_or_else(|| SourceError::NotFound("channel".to_string()))
    }

    async fn message_count(&self) -> Result<Option<u64>, SourceError> {
        Ok(Some(self.lock().messages.len() as u64))
    }

    fn list_messages_since(
        &self,
        min_id: Option<MessageId>,
    ) -> BoxStream<'_, Result<RawMessage, SourceError>> {
        let messages: Vec<_> = {
            let mut inner = self.lock();
            inner.list_requests.push(min_id);
            inner
                .messages
                .values()
                .filter(|m| min_id.is_none_or(|min| m.id > min))
                .cloned()
                .collect()
        };
        stream::iter(messages.into_iter().map(Ok)).boxed()
    }

    async fn get_messages_by_id(
        &self,
        ids: &[MessageId],
    ) -> Result<HashMap<MessageId, RawMessage>, SourceError> {
        let mut inner = self.lock();
        inner.lookup_requests.push(ids.to_vec());
        Ok(ids
            .iter()
            .filter_map(|id| inner.messages.get(id).map(|m| (*id, m.clone())))
            .collect())
    }

    async fn fetch_media(
        &self,
        message: &RawMessage,
        destination: &Path,
    ) -> Result<u64, SourceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let (scripted, payload, reported) = {
            let mut inner = self.lock();
            *inner.fetches_per_message.entry(message.id).or_default() += 1;
            let scripted = inner
                .scripted_failures
                .get_mut(&message.id)
                .and_then(VecDeque::pop_front);
            let payload = Self::payload_for(&inner, message);
            let reported = inner.misreported_sizes.get(&message.id).copied();
            (scripted, payload, reported)
        };

        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = scripted {
            return Err(error);
        }
        if message.media.is_none() {
            return Err(SourceError::NotFound(format!(
                "message {} has no media",
                message.id
            )));
        }

        tokio::fs::write(destination, &payload)
            .await
            .map_err(|e| SourceError::Transport(format!("write failed: {e}")))?;
        Ok(reported.unwrap_or(payload.len() as u64))
    }

    async fn resolve_user(&self, query: &UserQuery) -> Result<UserIdentity, SourceError> {
        let inner = self.lock();
        inner
            .users
            .iter()
            .find(|user| match query {
                UserQuery::Id(id) => user.id == *id,
                UserQuery::Username(name) => user
                    .username
                    .as_deref()
                    .is_some_and(|u| u.eq_ignore_ascii_case(name)),
            })
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("user {query}")))
    }
}
