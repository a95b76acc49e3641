//! Run driver
//!
//! [`Harvester`] owns the configuration, the message source and the
//! cancellation token of one run. [`Harvester::run`] resolves the channel,
//! loads the log, then drives scan, download and verification before the
//! final save.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::HarvestConfig;
use crate::downloader::DownloadOrchestrator;
use crate::error::{Error, FailureReason, Result};
use crate::scanner::Scanner;
use crate::source::MessageSource;
use crate::state::{CheckpointMode, LoadStatus, StateStore};
use crate::types::{Category, FailedDownload, MessageId};
use crate::verifier::{AuditReport, audit, verify};
use crate::workspace::{clean_workspace, prepare_directories};

/// What a run did
#[derive(Clone, Debug)]
pub struct RunReport {
    /// What was found on disk when the log was loaded
    pub load_status: LoadStatus,
    /// Messages received from the source
    pub processed: usize,
    /// Category assignments made by the scan
    pub qualified: BTreeMap<Category, usize>,
    /// Assignments satisfied by a file already in place
    pub skipped_existing: usize,
    /// Media fetched from the source
    pub fetched: usize,
    /// Assignments satisfied by copying between categories
    pub copied: usize,
    /// Files that passed verification
    pub verified: usize,
    /// Everything that could not be harvested
    pub failed: Vec<FailedDownload>,
    /// User filters that could not be resolved
    pub unresolved_filters: Vec<String>,
    /// Why the scan stopped early, when the source kept failing
    pub scan_interrupted: Option<FailureReason>,
    /// Highest verified message id after the run
    pub last_successful_id: Option<MessageId>,
    /// Audit result of a verify-only run
    pub audit: Option<AuditReport>,
    /// Whether shutdown was requested during the run
    pub cancelled: bool,
    /// Whether this was a dry run
    pub dry_run: bool,
}

impl RunReport {
    fn new(load_status: LoadStatus, dry_run: bool) -> Self {
        Self {
            load_status,
            processed: 0,
            qualified: BTreeMap::new(),
            skipped_existing: 0,
            fetched: 0,
            copied: 0,
            verified: 0,
            failed: Vec::new(),
            unresolved_filters: Vec::new(),
            scan_interrupted: None,
            last_successful_id: None,
            audit: None,
            cancelled: false,
            dry_run,
        }
    }

    /// Assignments made for `category`
    pub fn qualified_in(&self, category: Category) -> usize {
        self.qualified.get(&category).copied().unwrap_or(0)
    }

    /// Total assignments across categories
    pub fn total_qualified(&self) -> usize {
        self.qualified.values().sum()
    }

    fn log_summary(&self) {
        info!(
            processed = self.processed,
            engagement = self.qualified_in(Category::Engagement),
            user_reply = self.qualified_in(Category::UserReply),
            user_reaction = self.qualified_in(Category::UserReaction),
            skipped_existing = self.skipped_existing,
            fetched = self.fetched,
            copied = self.copied,
            verified = self.verified,
            failed = self.failed.len(),
            cancelled = self.cancelled,
            dry_run = self.dry_run,
            "harvest finished"
        );
        for failure in &self.failed {
            info!(
                message_id = failure.id.0,
                category = %failure.category,
                url = %failure.url,
                reason = %failure.reason,
                "not harvested"
            );
        }
    }
}

/// Harvests one channel
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use media_harvest::{Harvester, HarvestConfig, MemorySource};
/// use media_harvest::source::ChannelIdentity;
///
/// # async fn example() -> media_harvest::Result<()> {
/// let source = MemorySource::new(ChannelIdentity {
///     id: 1,
///     username: "photos".into(),
///     title: None,
/// });
/// let harvester = Harvester::new(HarvestConfig::for_channel("photos"), Arc::new(source))?;
/// let report = harvester.run().await?;
/// println!("verified {} files", report.verified);
/// # Ok(())
/// # }
/// ```
pub struct Harvester {
    config: HarvestConfig,
    source: Arc<dyn MessageSource>,
    cancel: CancellationToken,
}

impl Harvester {
    /// Create a harvester after validating `config`
    pub fn new(config: HarvestConfig, source: Arc<dyn MessageSource>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            cancel: CancellationToken::new(),
        })
    }

    /// The active configuration
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Token that requests a graceful stop
    ///
    /// Cancelling it ends the scan, stops new download batches from being
    /// started, then verifies and saves what was already fetched.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the whole pipeline once
    pub async fn run(&self) -> Result<RunReport> {
        if self.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        let config = &self.config;
        let source = self.source.as_ref();
        let dry_run = config.download.dry_run;
        let verify_only = config.download.verify_only;

        let channel = match source.channel().await {
            Ok(channel) => channel,
            Err(e) => {
                error!(channel = %config.channel, error = %e, "could not resolve channel");
                return Err(Error::ChannelUnavailable(format!("{}: {e}", config.channel)));
            }
        };
        info!(
            channel_id = channel.id,
            username = %channel.username,
            dry_run,
            verify_only,
            "harvesting channel"
        );

        if config.download.clean_workspace {
            if dry_run || verify_only {
                warn!("clean_workspace ignored: this run does not modify the workspace");
            } else {
                clean_workspace(config).await?;
            }
        }
        if !dry_run && !verify_only {
            prepare_directories(config).await?;
        }

        let mut store = StateStore::from_config(config);
        let (mut state, load_status) = store.load().await?;
        let mut report = RunReport::new(load_status, dry_run);

        if verify_only {
            let audit = audit(&state, config).await;
            report.last_successful_id = state.last_successful_id;
            report.audit = Some(audit);
            return Ok(report);
        }

        let scanner = Scanner::new(source, config, channel, self.cancel.clone())?;
        let outcome = scanner.scan(&mut state, &mut store).await?;
        report.processed = outcome.processed;
        report.cancelled = outcome.cancelled;
        report.scan_interrupted = outcome.interrupted.clone();
        report.unresolved_filters = outcome.filters.unresolved.clone();
        for category in Category::ALL {
            let count = outcome.qualified.count(category);
            if count > 0 {
                report.qualified.insert(category, count);
            }
        }

        if dry_run {
            for (category, record) in outcome.qualified.iter() {
                info!(
                    message_id = record.id.0,
                    category = %category,
                    file = %record.file_name(),
                    url = %record.url,
                    "would download"
                );
            }
            report.last_successful_id = state.last_successful_id;
            report.log_summary();
            return Ok(report);
        }

        let downloads = DownloadOrchestrator::new(source, config, self.cancel.clone())
            .run(&outcome.qualified, &mut state)
            .await?;
        report.skipped_existing = downloads.skipped_existing;
        report.fetched = downloads.fetched;
        report.copied = downloads.copied;
        report.cancelled |= downloads.cancelled;
        report.failed.extend(downloads.failed);

        let verified = verify(
            downloads.succeeded,
            &mut state,
            &mut store,
            config.download.settle_delay,
        )
        .await?;
        report.verified = verified.succeeded.len();
        report.failed.extend(verified.failed);

        store.checkpoint(&mut state, CheckpointMode::Final).await?;
        report.last_successful_id = state.last_successful_id;
        report.log_summary();
        Ok(report)
    }
}
