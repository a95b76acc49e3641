//! Resumable channel scan
//!
//! [`Scanner::scan`] walks the channel oldest-first from the resume point,
//! classifies each message, records qualifying ones in the log and assigns
//! them to categories. The listing is re-created from the last seen id when
//! the source fails transiently mid-stream.

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::config::{FilterConfig, HarvestConfig};
use crate::error::{FailureReason, Result};
use crate::progress::ProgressTracker;
use crate::retry::{RetryDecision, RetryState};
use crate::source::{ChannelIdentity, MessageSource, UserQuery};
use crate::state::{CheckpointMode, StateStore};
use crate::types::{Category, LogState, MessageId, MessageRecord, QualifiedMessages};

/// Scan progress is logged every this many messages
const PROGRESS_EVERY: usize = 100;

/// User filters resolved to numeric ids
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserFilters {
    /// The tracked user (`user_id` or `username`)
    pub tracked: Option<i64>,
    /// Replies to this user count (`replied_to`, else the tracked user)
    pub reply_target: Option<i64>,
    /// Reactions from this user count (`reacted_by`, else the tracked user)
    pub reactor: Option<i64>,
    /// Whether any user filter was configured, resolved or not
    pub configured: bool,
    /// Filters that could not be resolved
    pub unresolved: Vec<String>,
}

impl UserFilters {
    /// Resolve every configured user filter through `source`
    ///
    /// A filter that cannot be resolved is logged and left unset, so the
    /// categories depending on it qualify nothing; the scan itself goes on.
    pub async fn resolve(source: &dyn MessageSource, filters: &FilterConfig) -> Self {
        let tracked_query = filters
            .user_id
            .map(UserQuery::Id)
            .or_else(|| filters.username.as_deref().map(UserQuery::parse));
        let reply_query = filters.replied_to.as_deref().map(UserQuery::parse);
        let reactor_query = filters.reacted_by.as_deref().map(UserQuery::parse);

        let mut resolved = UserFilters {
            configured: tracked_query.is_some()
                || reply_query.is_some()
                || reactor_query.is_some(),
            ..Default::default()
        };

        resolved.tracked = resolved.lookup(source, tracked_query.as_ref()).await;
        resolved.reply_target = match reply_query {
            Some(query) => resolved.lookup(source, Some(&query)).await,
            None => resolved.tracked,
        };
        resolved.reactor = match reactor_query {
            Some(query) => resolved.lookup(source, Some(&query)).await,
            None => resolved.tracked,
        };
        resolved
    }

    async fn lookup(&mut self, source: &dyn MessageSource, query: Option<&UserQuery>) -> Option<i64> {
        let query = query?;
        match source.resolve_user(query).await {
            Ok(user) => {
                debug!(filter = %query, user_id = user.id, "resolved user filter");
                Some(user.id)
            }
            Err(e) => {
                warn!(
                    filter = %query,
                    error = %e,
                    "could not resolve user filter, user categories will match nothing for it"
                );
                self.unresolved.push(query.to_string());
                None
            }
        }
    }

    /// Whether `record` belongs in `category`
    pub fn matches(&self, category: Category, record: &MessageRecord) -> bool {
        match category {
            Category::Engagement => record.has_reactions,
            Category::UserReply => {
                let replied_to_target = self
                    .reply_target
                    .is_some_and(|target| record.reply_user_id == Some(target));
                let reply_from_tracked = record.is_reply
                    && self
                        .tracked
                        .is_some_and(|user| record.sender_id == Some(user));
                replied_to_target || reply_from_tracked
            }
            Category::UserReaction => match self.reactor {
                Some(reactor) => record.reactor_ids.contains(&reactor),
                None => !self.configured && record.my_reaction,
            },
        }
    }
}

/// Result of a scan
#[derive(Clone, Debug, Default)]
pub struct ScanOutcome {
    /// Category assignments, in scan order
    pub qualified: QualifiedMessages,
    /// Messages received from the source
    pub processed: usize,
    /// Messages that passed classification
    pub classified: usize,
    /// Id the scan started after
    pub resume_point: Option<MessageId>,
    /// Whether the item limit ended the scan
    pub limit_reached: bool,
    /// Whether cancellation ended the scan
    pub cancelled: bool,
    /// Why listing stopped early, when the source kept failing
    pub interrupted: Option<FailureReason>,
    /// Resolved user filters
    pub filters: UserFilters,
}

/// Walks the channel and qualifies messages
pub struct Scanner<'a> {
    source: &'a dyn MessageSource,
    config: &'a HarvestConfig,
    classifier: Classifier,
    cancel: CancellationToken,
}

impl<'a> Scanner<'a> {
    /// Create a scanner for the resolved `channel`
    pub fn new(
        source: &'a dyn MessageSource,
        config: &'a HarvestConfig,
        channel: ChannelIdentity,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            source,
            config,
            classifier: Classifier::new(
                channel,
                config.filters.topic_id,
                config.download.name_max_length,
            )?,
            cancel,
        })
    }

    /// Id the scan starts after
    ///
    /// An explicit `resume_from_id` wins over the highest downloaded id;
    /// forced re-downloads start from the beginning.
    pub fn resume_point(&self, state: &LogState) -> Option<MessageId> {
        if self.config.download.force_redownload {
            return None;
        }
        self.config
            .filters
            .resume_from_id
            .map(MessageId)
            .or_else(|| state.max_downloaded_id())
    }

    /// Scan the channel, updating `state` and checkpointing at the end
    pub async fn scan(&self, state: &mut LogState, store: &mut StateStore) -> Result<ScanOutcome> {
        let filters = UserFilters::resolve(self.source, &self.config.filters).await;
        let categories = self.config.enabled_categories();
        let force = self.config.download.force_redownload;
        let limit = self.config.download.item_limit;

        let mut outcome = ScanOutcome {
            resume_point: self.resume_point(state),
            ..Default::default()
        };
        match outcome.resume_point {
            Some(id) => info!(resume_from = id.0, "resuming scan"),
            None => info!("scanning from the beginning of the channel"),
        }

        let total = self.source.message_count().await.ok().flatten();
        let mut progress = ProgressTracker::new("scanned", total);
        let mut cursor = outcome.resume_point;
        let mut retry = RetryState::new(self.config.retry.max_retries);

        'listing: loop {
            let mut stream = self.source.list_messages_since(cursor);
            while let Some(item) = stream.next().await {
                let raw = match item {
                    Ok(raw) => raw,
                    Err(e) => match retry.record_failure(&e, &self.config.retry) {
                        RetryDecision::Retry(delay) => {
                            warn!(
                                error = %e,
                                after = ?cursor.map(|id| id.0),
                                delay = ?delay,
                                "listing failed, restarting"
                            );
                            drop(stream);
                            tokio::time::sleep(delay).await;
                            continue 'listing;
                        }
                        RetryDecision::GiveUp(reason) => {
                            warn!(error = %reason, "listing failed, ending scan early");
                            outcome.interrupted = Some(reason);
                            break 'listing;
                        }
                    },
                };
                if retry.attempts_made() > 0 {
                    retry = RetryState::new(self.config.retry.max_retries);
                }
                if self.cancel.is_cancelled() {
                    info!("shutdown requested, ending scan");
                    outcome.cancelled = true;
                    break 'listing;
                }
                if cursor.is_some_and(|seen| raw.id <= seen) {
                    debug!(message_id = raw.id.0, "out-of-order message skipped");
                    continue;
                }
                cursor = Some(raw.id);

                outcome.processed += 1;
                progress.tick();
                if outcome.processed % PROGRESS_EVERY == 0 {
                    info!("{}", progress.format_progress());
                }

                let Some(fresh) = self.classifier.classify(&raw) else {
                    continue;
                };
                outcome.classified += 1;
                let id = fresh.id;
                state.upsert(fresh, force);
                let Some(record) = state.messages.get(&id) else {
                    continue;
                };

                let mut assigned = Vec::new();
                for category in &categories {
                    if filters.matches(*category, record) {
                        outcome.qualified.push(*category, record.clone());
                        assigned.push(category.to_string());
                    }
                }
                if !assigned.is_empty() {
                    debug!(
                        message_id = id.0,
                        categories = %assigned.join(","),
                        total_reactions = record.total_reactions,
                        url = %record.url,
                        "qualifying message"
                    );
                }

                if let Some(limit) = limit
                    && outcome.qualified.total() >= limit
                {
                    info!(limit, "item limit reached, ending scan");
                    outcome.limit_reached = true;
                    break 'listing;
                }
            }
            break;
        }

        state.last_scan_time = Some(Utc::now());
        store.checkpoint(state, CheckpointMode::Regular).await?;

        info!(
            processed = outcome.processed,
            classified = outcome.classified,
            engagement = outcome.qualified.count(Category::Engagement),
            user_reply = outcome.qualified.count(Category::UserReply),
            user_reaction = outcome.qualified.count(Category::UserReaction),
            "scan complete"
        );
        outcome.filters = filters;
        Ok(outcome)
    }
}
