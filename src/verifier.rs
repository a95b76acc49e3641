//! Post-download integrity checks
//!
//! [`verify`] is the only place a record becomes `downloaded`. [`audit`]
//! re-checks records already marked downloaded without changing anything.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::error::{FailureReason, Result};
use crate::state::{CheckpointMode, StateStore};
use crate::types::{Category, DownloadAttempt, FailedDownload, LogState, MessageId};

/// Outcome of [`verify`]
#[derive(Clone, Debug, Default)]
pub struct VerifyReport {
    /// Attempts whose file matched the expected size
    pub succeeded: Vec<DownloadAttempt>,
    /// Attempts whose file was missing or had the wrong size
    pub failed: Vec<FailedDownload>,
}

/// Confirm each attempt's file and mark matching records downloaded
///
/// Waits `settle_delay` first so that files written just before are visible
/// with their final size. A missing file fails with "not found"; a size
/// mismatch deletes the file and fails. A message is only marked downloaded
/// when none of its attempts failed, and every record marked is followed by
/// a regular checkpoint.
pub async fn verify(
    attempts: Vec<DownloadAttempt>,
    state: &mut LogState,
    store: &mut StateStore,
    settle_delay: Duration,
) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();
    if attempts.is_empty() {
        return Ok(report);
    }
    if !settle_delay.is_zero() {
        debug!(delay = ?settle_delay, "waiting for writes to settle");
        tokio::time::sleep(settle_delay).await;
    }

    let mut intact = Vec::with_capacity(attempts.len());
    for attempt in attempts {
        match check(&attempt).await {
            Ok(actual) => intact.push((attempt, actual)),
            Err(reason) => fail(&mut report, attempt, reason),
        }
    }

    let rejected: HashSet<MessageId> = report.failed.iter().map(|f| f.id).collect();
    for (attempt, actual) in intact {
        let id = attempt.record.id;
        if rejected.contains(&id) {
            debug!(
                message_id = id.0,
                category = %attempt.category,
                "file intact but another copy failed, leaving record pending"
            );
            report.succeeded.push(attempt);
            continue;
        }

        state
            .messages
            .entry(id)
            .or_insert_with(|| attempt.record.clone());
        state.mark_downloaded(id, actual);
        debug!(
            message_id = id.0,
            category = %attempt.category,
            bytes = actual,
            "verified"
        );
        report.succeeded.push(attempt);
        store.checkpoint(state, CheckpointMode::Regular).await?;
    }

    info!(
        verified = report.succeeded.len(),
        failed = report.failed.len(),
        "verification finished"
    );
    Ok(report)
}

/// Size of the attempt's file when it matches; a mismatched file is deleted
async fn check(attempt: &DownloadAttempt) -> std::result::Result<u64, FailureReason> {
    let actual = match tokio::fs::metadata(&attempt.target_path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return Err(FailureReason::FileNotFound),
    };
    if actual == attempt.expected_size {
        return Ok(actual);
    }

    if let Err(e) = tokio::fs::remove_file(&attempt.target_path).await {
        warn!(
            message_id = attempt.record.id.0,
            path = %attempt.target_path.display(),
            error = %e,
            "failed to delete corrupt file"
        );
    }
    Err(FailureReason::SizeMismatch {
        expected: attempt.expected_size,
        actual,
    })
}

fn fail(report: &mut VerifyReport, attempt: DownloadAttempt, reason: FailureReason) {
    warn!(
        message_id = attempt.record.id.0,
        category = %attempt.category,
        path = %attempt.target_path.display(),
        url = %attempt.record.url,
        error = %reason,
        "verification failed"
    );
    report
        .failed
        .push(FailedDownload::new(&attempt.record, attempt.category, reason));
}

/// A downloaded record whose files no longer check out
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditIssue {
    /// Message id
    pub id: MessageId,
    /// Public link to the message
    pub url: String,
    /// Offending file, when one was found
    pub path: Option<PathBuf>,
    /// What is wrong
    pub reason: FailureReason,
}

/// Outcome of [`audit`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    /// Records marked downloaded
    pub checked: usize,
    /// Records whose files all check out
    pub intact: usize,
    /// Problems found
    pub issues: Vec<AuditIssue>,
}

/// Check every downloaded record against the category directories
///
/// A record is intact when its file exists in at least one category directory
/// and every copy has the recorded size (when one was recorded). Nothing is
/// modified or deleted.
pub async fn audit(state: &LogState, config: &HarvestConfig) -> AuditReport {
    let mut report = AuditReport::default();

    for record in state.messages.values().filter(|r| r.downloaded) {
        report.checked += 1;
        let mut found = false;
        let mut issues = Vec::new();

        for category in Category::ALL {
            let path = config.category_dir(category).join(record.file_name());
            let Ok(meta) = tokio::fs::metadata(&path).await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            found = true;
            if let Some(expected) = record.file_size
                && meta.len() != expected
            {
                issues.push(AuditIssue {
                    id: record.id,
                    url: record.url.clone(),
                    path: Some(path),
                    reason: FailureReason::SizeMismatch {
                        expected,
                        actual: meta.len(),
                    },
                });
            }
        }

        if !found {
            issues.push(AuditIssue {
                id: record.id,
                url: record.url.clone(),
                path: None,
                reason: FailureReason::FileNotFound,
            });
        }
        if issues.is_empty() {
            report.intact += 1;
        } else {
            for issue in &issues {
                warn!(message_id = issue.id.0, url = %issue.url, error = %issue.reason, "audit issue");
            }
            report.issues.extend(issues);
        }
    }

    info!(
        checked = report.checked,
        intact = report.intact,
        issues = report.issues.len(),
        "audit finished"
    );
    report
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{config_in, photo, record_for};
    use tempfile::TempDir;

    fn store_in(dir: &TempDir, interval: usize) -> StateStore {
        StateStore::new(
            dir.path().join("download_log.json"),
            dir.path().join("download_log.json.bak"),
            interval,
        )
    }

    fn attempt(dir: &TempDir, id: i64, contents: &[u8], expected: u64) -> DownloadAttempt {
        let record = record_for(&photo(id));
        let target_path = dir.path().join(record.file_name());
        std::fs::write(&target_path, contents).unwrap();
        DownloadAttempt {
            record,
            category: Category::Engagement,
            target_path,
            expected_size: expected,
        }
    }

    #[tokio::test]
    async fn matching_file_marks_record_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir, 10);
        let mut state = LogState::default();
        let a = attempt(&dir, 3, b"12345", 5);

        let report = verify(vec![a], &mut state, &mut store, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(report.succeeded.len(), 1);
        assert!(report.failed.is_empty());
        let record = &state.messages[&MessageId(3)];
        assert!(record.downloaded);
        assert_eq!(record.file_size, Some(5));
        assert_eq!(state.last_successful_id, Some(MessageId(3)));
    }

    #[tokio::test]
    async fn size_mismatch_deletes_file_and_keeps_record_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir, 10);
        let mut state = LogState::default();
        let a = attempt(&dir, 4, b"short", 120);
        let path = a.target_path.clone();
        state.upsert(a.record.clone(), false);

        let report = verify(vec![a], &mut state, &mut store, Duration::ZERO)
            .await
            .unwrap();

        assert!(!path.exists(), "corrupt file must be deleted");
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            report.failed[0].reason.to_string(),
            "size mismatch: expected 120 got 5"
        );
        assert!(!state.messages[&MessageId(4)].downloaded);
        assert_eq!(state.last_successful_id, None);
    }

    #[tokio::test]
    async fn one_bad_copy_keeps_the_whole_message_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir, 1);
        let mut state = LogState::default();
        let good = attempt(&dir, 7, b"1234567", 7);
        let reply_dir = dir.path().join("reply");
        std::fs::create_dir(&reply_dir).unwrap();
        let bad_path = reply_dir.join(good.record.file_name());
        std::fs::write(&bad_path, b"1234567").unwrap();
        let bad = DownloadAttempt {
            category: Category::UserReply,
            target_path: bad_path.clone(),
            expected_size: 999,
            ..good.clone()
        };

        let report = verify(vec![bad, good], &mut state, &mut store, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].category, Category::UserReply);
        assert!(!bad_path.exists());
        assert!(state.messages.get(&MessageId(7)).is_none_or(|r| !r.downloaded));
        assert_eq!(state.last_successful_id, None);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn missing_file_fails_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir, 10);
        let mut state = LogState::default();
        let a = attempt(&dir, 5, b"x", 1);
        std::fs::remove_file(&a.target_path).unwrap();

        let report = verify(vec![a], &mut state, &mut store, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(report.failed[0].reason.to_string(), "not found");
        assert_eq!(state.downloaded_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_the_settle_delay_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir, 10);
        let mut state = LogState::default();
        let a = attempt(&dir, 6, b"ok", 2);

        let start = tokio::time::Instant::now();
        verify(vec![a], &mut state, &mut store, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn checkpoints_on_every_interval_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir, 2);
        let mut state = LogState::default();
        let attempts = (1..=5).map(|id| attempt(&dir, id, b"abc", 3)).collect();

        verify(attempts, &mut state, &mut store, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(state.downloaded_count(), 5);
        assert_eq!(store.write_count(), 2, "written at 2 and 4 verified records");
        let (persisted, _) = store.load().await.unwrap();
        assert_eq!(persisted.downloaded_count(), 4);
        assert_eq!(persisted.last_successful_id, Some(MessageId(4)));
    }

    #[tokio::test]
    async fn audit_reports_missing_and_resized_files_without_touching_them() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mut state = LogState::default();

        for id in [1, 2, 3] {
            let record = record_for(&photo(id));
            state.upsert(record, false);
            state.mark_downloaded(MessageId(id), 4);
        }
        state.upsert(record_for(&photo(9)), false);

        let engagement = config.category_dir(Category::Engagement);
        std::fs::create_dir_all(&engagement).unwrap();
        let name = |id| record_for(&photo(id)).file_name();
        std::fs::write(engagement.join(name(1)), b"abcd").unwrap();
        std::fs::write(engagement.join(name(2)), b"abcdefgh").unwrap();
        let before = state.clone();

        let report = audit(&state, &config).await;

        assert_eq!(report.checked, 3);
        assert_eq!(report.intact, 1);
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues.iter().any(|i| i.id == MessageId(2)
            && i.reason
                == FailureReason::SizeMismatch {
                    expected: 4,
                    actual: 8
                }));
        assert!(
            report
                .issues
                .iter()
                .any(|i| i.id == MessageId(3) && i.reason == FailureReason::FileNotFound)
        );
        assert_eq!(state, before);
        assert!(engagement.join(name(2)).exists(), "audit never deletes");
    }
}
