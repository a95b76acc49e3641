//! Satisfy-from-cache planning
//!
//! Before anything touches the network, every job of a batch is sorted into
//! one of four buckets: already on disk, copyable from another category,
//! fetched, or waiting on a fetch of the same message in this batch.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::config::HarvestConfig;
use crate::types::{Category, MessageId, MessageRecord};

/// One category assignment to satisfy
#[derive(Clone, Debug)]
pub(super) struct Job {
    pub(super) category: Category,
    pub(super) record: MessageRecord,
    pub(super) target: PathBuf,
}

impl Job {
    pub(super) fn new(config: &HarvestConfig, category: Category, record: MessageRecord) -> Self {
        let target = config.category_dir(category).join(record.file_name());
        Self {
            category,
            record,
            target,
        }
    }

    pub(super) fn id(&self) -> MessageId {
        self.record.id
    }
}

/// A file produced earlier in this run and the size its fetch reported
#[derive(Clone, Debug)]
pub(super) struct Produced {
    pub(super) path: PathBuf,
    pub(super) expected_size: u64,
}

/// Where a copy comes from
#[derive(Clone, Debug)]
pub(super) struct CopySource {
    pub(super) path: PathBuf,
    /// Size the copy must verify against; `None` trusts the copied byte count
    pub(super) expected_size: Option<u64>,
}

impl From<&Produced> for CopySource {
    fn from(produced: &Produced) -> Self {
        Self {
            path: produced.path.clone(),
            expected_size: Some(produced.expected_size),
        }
    }
}

/// How each job of a batch will be satisfied
#[derive(Debug, Default)]
pub(super) struct BatchPlan {
    /// Target already present; carries the on-disk size
    pub(super) existing: Vec<(Job, u64)>,
    /// Copy from a file of the same message in another category
    pub(super) copies: Vec<(Job, CopySource)>,
    /// First job of its message in this batch; fetched from the source
    pub(super) fetches: Vec<Job>,
    /// Same message as a job in `fetches`; copied once that fetch lands
    pub(super) dependents: Vec<Job>,
}

/// Size of `path` when it is an existing regular file
pub(super) async fn file_len(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Sort `jobs` into a [`BatchPlan`]
///
/// `known` maps message ids to files produced earlier in this run; copies of
/// those inherit the size reported when the file was fetched. Files left by
/// previous runs are only trusted when `force_redownload` is off.
pub(super) async fn plan_batch(
    jobs: Vec<Job>,
    known: &HashMap<MessageId, Produced>,
    config: &HarvestConfig,
) -> BatchPlan {
    let force = config.download.force_redownload;
    let mut plan = BatchPlan::default();
    let mut scheduled: HashSet<MessageId> = HashSet::new();

    for job in jobs {
        if !force && let Some(size) = file_len(&job.target).await {
            plan.existing.push((job, size));
            continue;
        }

        if let Some(produced) = known.get(&job.id()).filter(|p| p.path != job.target) {
            plan.copies.push((job, produced.into()));
            continue;
        }

        if !force && let Some(path) = find_in_other_categories(&job, config).await {
            plan.copies.push((
                job,
                CopySource {
                    path,
                    expected_size: None,
                },
            ));
            continue;
        }

        if scheduled.insert(job.id()) {
            plan.fetches.push(job);
        } else {
            plan.dependents.push(job);
        }
    }

    plan
}

async fn find_in_other_categories(job: &Job, config: &HarvestConfig) -> Option<PathBuf> {
    for category in Category::ALL {
        if category == job.category {
            continue;
        }
        let candidate = config
            .category_dir(category)
            .join(job.record.file_name());
        if file_len(&candidate).await.is_some() {
            return Some(candidate);
        }
    }
    None
}
