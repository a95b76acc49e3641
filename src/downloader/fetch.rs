//! Network side of a batch: metadata lookup and bounded concurrent fetches

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::plan::Job;
use crate::config::HarvestConfig;
use crate::error::FailureReason;
use crate::retry::fetch_with_retry;
use crate::source::{MessageSource, RawMessage};
use crate::types::MessageId;

/// Result of one fetch job: bytes written, or why it failed
pub(super) type FetchResult = (Job, Result<u64, FailureReason>);

/// Fetch media for `jobs`, at most `concurrency` at a time
///
/// Metadata for the whole batch is requested in a single lookup. Results come
/// back in completion order; the caller merges them one at a time.
pub(super) async fn fetch_batch(
    source: &dyn MessageSource,
    jobs: Vec<Job>,
    config: &HarvestConfig,
) -> Vec<FetchResult> {
    if jobs.is_empty() {
        return Vec::new();
    }

    let ids: Vec<MessageId> = jobs.iter().map(Job::id).collect();
    let mut messages: HashMap<MessageId, RawMessage> =
        match fetch_with_retry(&config.retry, || source.get_messages_by_id(&ids)).await {
            Ok(messages) => messages,
            Err(reason) => {
                warn!(batch = ids.len(), error = %reason, "metadata lookup failed for batch");
                return jobs
                    .into_iter()
                    .map(|job| (job, Err(reason.clone())))
                    .collect();
            }
        };

    let mut results = Vec::with_capacity(jobs.len());
    let mut ready = Vec::with_capacity(jobs.len());
    for job in jobs {
        let Some(raw) = messages.remove(&job.id()) else {
            debug!(message_id = job.id().0, "message no longer exists");
            results.push((job, Err(FailureReason::MessageNotFound)));
            continue;
        };
        let downloadable = raw
            .media
            .as_ref()
            .is_some_and(|media| media.kind.extension().is_some());
        if !downloadable {
            debug!(message_id = job.id().0, "message has no downloadable media");
            results.push((job, Err(FailureReason::NoMedia)));
            continue;
        }
        ready.push((job, raw));
    }

    let retry = &config.retry;
    let fetched: Vec<FetchResult> = stream::iter(ready)
        .map(|(job, raw)| async move {
            let partial = partial_path(&job.target);
            let result =
                match fetch_with_retry(retry, || source.fetch_media(&raw, &partial)).await {
                    Ok(bytes) => promote(&job, &partial).await.map(|()| bytes),
                    Err(reason) => Err(reason),
                };
            if result.is_err() {
                discard_partial(&job, &partial).await;
            }
            (job, result)
        })
        .buffer_unordered(config.download.concurrency)
        .collect()
        .await;

    results.extend(fetched);
    results
}

/// Sibling path media is written to before it replaces the target
pub(super) fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

async fn promote(job: &Job, partial: &Path) -> Result<(), FailureReason> {
    tokio::fs::rename(partial, &job.target)
        .await
        .map_err(|e| FailureReason::Fetch(format!("moving partial file into place: {e}")))
}

/// Remove the partial file of a failed fetch; the target is left alone
async fn discard_partial(job: &Job, partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => debug!(
            message_id = job.id().0,
            path = %partial.display(),
            "removed partial file after failed fetch"
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            message_id = job.id().0,
            path = %partial.display(),
            error = %e,
            "failed to remove partial file"
        ),
    }
}
