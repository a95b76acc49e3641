//! Download orchestration
//!
//! [`DownloadOrchestrator`] turns qualified records into files on disk:
//! - [`plan`] - satisfy-from-cache planning (existing files, cross-category copies)
//! - [`fetch`] - metadata lookup and bounded concurrent fetches with retry
//!
//! Work is processed in fixed-size batches. Fetches inside a batch run
//! concurrently, but their results are merged into the report and the log one
//! at a time by the calling task.

mod fetch;
mod plan;


use std::collections::{BTreeMap, HashMap};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::error::{FailureReason, Result};
use crate::progress::ProgressTracker;
use crate::source::MessageSource;
use crate::types::{
    Category, DownloadAttempt, FailedDownload, LogState, MessageId, QualifiedMessages,
};

use plan::{CopySource, Job, Produced, plan_batch};

/// Outcome of a download pass
#[derive(Clone, Debug, Default)]
pub struct DownloadReport {
    /// Files ready for verification, one per satisfied category assignment
    pub succeeded: Vec<DownloadAttempt>,
    /// Assignments that could not be satisfied
    pub failed: Vec<FailedDownload>,
    /// Message ids satisfied per category
    pub media: BTreeMap<Category, Vec<MessageId>>,
    /// Assignments whose target file already existed
    pub skipped_existing: usize,
    /// Media fetched from the source
    pub fetched: usize,
    /// Assignments satisfied by copying a file from another category
    pub copied: usize,
    /// Whether cancellation stopped the pass before every batch ran
    pub cancelled: bool,
}

impl DownloadReport {
    fn succeed(&mut self, job: Job, expected_size: u64) {
        self.media.entry(job.category).or_default().push(job.id());
        self.succeeded.push(DownloadAttempt {
            record: job.record,
            category: job.category,
            target_path: job.target,
            expected_size,
        });
    }

    fn fail(&mut self, job: &Job, reason: FailureReason) {
        warn!(
            message_id = job.id().0,
            category = %job.category,
            url = %job.record.url,
            error = %reason,
            "download failed"
        );
        self.failed
            .push(FailedDownload::new(&job.record, job.category, reason));
    }
}

/// Fetches media for qualified records
pub struct DownloadOrchestrator<'a> {
    source: &'a dyn MessageSource,
    config: &'a HarvestConfig,
    cancel: CancellationToken,
}

impl<'a> DownloadOrchestrator<'a> {
    /// Create an orchestrator reading from `source`
    pub fn new(
        source: &'a dyn MessageSource,
        config: &'a HarvestConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            config,
            cancel,
        }
    }

    /// Satisfy every category assignment in `qualified`
    ///
    /// Per-item problems end up in [`DownloadReport::failed`]; only failing to
    /// create a category directory is returned as an error. Records are put
    /// back into `state` as they are satisfied, still with `downloaded` unset.
    pub async fn run(
        &self,
        qualified: &QualifiedMessages,
        state: &mut LogState,
    ) -> Result<DownloadReport> {
        let mut report = DownloadReport::default();
        let jobs: Vec<Job> = qualified
            .iter()
            .map(|(category, record)| Job::new(self.config, category, record.clone()))
            .collect();
        if jobs.is_empty() {
            debug!("nothing to download");
            return Ok(report);
        }

        for category in Category::ALL {
            if qualified.count(category) > 0 {
                tokio::fs::create_dir_all(self.config.category_dir(category)).await?;
            }
        }

        let batch_size = self.config.download.batch_size;
        let batch_count = jobs.len().div_ceil(batch_size);
        let mut progress = ProgressTracker::new("downloads", Some(jobs.len() as u64));
        let mut known: HashMap<MessageId, Produced> = HashMap::new();
        let mut pending = jobs.into_iter().peekable();
        let mut batch_index = 0;

        info!(
            assignments = progress.total(),
            batches = batch_count,
            concurrency = self.config.download.concurrency,
            "starting downloads"
        );

        while pending.peek().is_some() {
            if self.cancel.is_cancelled() {
                info!(
                    remaining = pending.len(),
                    "shutdown requested, not scheduling further batches"
                );
                report.cancelled = true;
                break;
            }
            batch_index += 1;
            let batch: Vec<Job> = pending.by_ref().take(batch_size).collect();
            debug!(batch = batch_index, of = batch_count, size = batch.len(), "processing batch");

            self.run_batch(batch, &mut known, state, &mut report, &mut progress)
                .await;
            info!(batch = batch_index, of = batch_count, "{}", progress.format_progress());
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            fetched = report.fetched,
            copied = report.copied,
            skipped_existing = report.skipped_existing,
            "downloads finished"
        );
        Ok(report)
    }

    async fn run_batch(
        &self,
        batch: Vec<Job>,
        known: &mut HashMap<MessageId, Produced>,
        state: &mut LogState,
        report: &mut DownloadReport,
        progress: &mut ProgressTracker,
    ) {
        let plan = plan_batch(batch, known, self.config).await;

        for (job, size) in plan.existing {
            debug!(
                message_id = job.id().0,
                path = %job.target.display(),
                "file already exists, skipping fetch"
            );
            report.skipped_existing += 1;
            self.merge(job, Ok(size), known, state, report, progress);
        }

        for (job, source) in plan.copies {
            let result = copy_file(&source, &job).await;
            if result.is_ok() {
                report.copied += 1;
            }
            self.merge(job, result, known, state, report, progress);
        }

        let mut fetch_failures: HashMap<MessageId, FailureReason> = HashMap::new();
        for (job, result) in fetch::fetch_batch(self.source, plan.fetches, self.config).await {
            match &result {
                Ok(bytes) => {
                    debug!(message_id = job.id().0, bytes, "fetched media");
                    report.fetched += 1;
                    known.insert(
                        job.id(),
                        Produced {
                            path: job.target.clone(),
                            expected_size: *bytes,
                        },
                    );
                }
                Err(reason) => {
                    fetch_failures.insert(job.id(), reason.clone());
                }
            }
            self.merge(job, result, known, state, report, progress);
        }

        for job in plan.dependents {
            let result = match (known.get(&job.id()), fetch_failures.get(&job.id())) {
                (Some(produced), _) => {
                    let source = CopySource::from(produced);
                    copy_file(&source, &job).await
                }
                (None, Some(reason)) => Err(reason.clone()),
                (None, None) => Err(FailureReason::MessageNotFound),
            };
            if result.is_ok() {
                report.copied += 1;
            }
            self.merge(job, result, known, state, report, progress);
        }
    }

    /// Fold one job result into the report and the log
    fn merge(
        &self,
        job: Job,
        result: std::result::Result<u64, FailureReason>,
        known: &mut HashMap<MessageId, Produced>,
        state: &mut LogState,
        report: &mut DownloadReport,
        progress: &mut ProgressTracker,
    ) {
        progress.tick();
        match result {
            Ok(size) => {
                known.entry(job.id()).or_insert_with(|| Produced {
                    path: job.target.clone(),
                    expected_size: size,
                });
                state
                    .messages
                    .entry(job.id())
                    .or_insert_with(|| job.record.clone());
                report.succeed(job, size);
            }
            Err(reason) => report.fail(&job, reason),
        }
        debug!("{}", progress.format_progress());
    }
}

/// Copy `source` to the job's target, returning the size to verify against
async fn copy_file(
    source: &CopySource,
    job: &Job,
) -> std::result::Result<u64, FailureReason> {
    match tokio::fs::copy(&source.path, &job.target).await {
        Ok(bytes) => {
            debug!(
                message_id = job.id().0,
                from = %source.path.display(),
                to = %job.target.display(),
                bytes,
                "copied media from another category"
            );
            Ok(source.expected_size.unwrap_or(bytes))
        }
        Err(e) => Err(FailureReason::Copy(e.to_string())),
    }
}
