//! # media-harvest
//!
//! Incremental, resumable harvesting of photo attachments from a chat channel.
//!
//! ## Design Philosophy
//!
//! media-harvest is designed to be:
//! - **Resumable** - a JSON download log records every qualifying message and
//!   the highest verified id, so a rerun continues where the last one stopped
//! - **Idempotent** - file names are derived from message metadata, so files
//!   already on disk are recognized and never fetched twice
//! - **Library-first** - no CLI, and the chat backend is a [`MessageSource`]
//!   supplied by the embedding application
//!
//! A run goes scan → classify → fetch → verify → save:
//! - [`scanner`] walks the channel from the resume point and assigns
//!   qualifying messages to categories
//! - [`downloader`] fetches media with bounded concurrency and retries
//! - [`verifier`] confirms file sizes and marks records downloaded
//! - [`state`] persists the log with periodic atomic checkpoints
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use media_harvest::{HarvestConfig, Harvester, MemorySource};
//! use media_harvest::source::ChannelIdentity;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = HarvestConfig::for_channel("photos");
//!     config.filters.username = Some("@someone".to_string());
//!
//!     let source = MemorySource::new(ChannelIdentity {
//!         id: 1,
//!         username: "photos".to_string(),
//!         title: None,
//!     });
//!     let harvester = Harvester::new(config, Arc::new(source))?;
//!
//!     let report = media_harvest::run_until_signal(harvester).await?;
//!     println!("{} verified, {} failed", report.verified, report.failed.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Message classification and filename sanitization
pub mod classifier;
/// Configuration types
pub mod config;
/// Download orchestration (planning, bounded concurrent fetch)
pub mod downloader;
/// Error types
pub mod error;
/// Run driver
pub mod harvester;
/// Rate and ETA reporting
pub mod progress;
/// Retry policy for media fetches
pub mod retry;
/// Resumable channel scan
pub mod scanner;
/// Message source capability and in-memory implementation
pub mod source;
/// Download log persistence
pub mod state;
/// Core data model
pub mod types;
/// Post-download integrity checks
pub mod verifier;
/// Output directory bootstrap and cleanup
pub mod workspace;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::HarvestConfig;
pub use error::{Error, FailureReason, Result, SourceError};
pub use harvester::{Harvester, RunReport};
pub use source::{MemorySource, MessageSource};
pub use state::{CheckpointMode, LoadStatus, StateStore};
pub use types::{Category, FailedDownload, LogState, MessageId, MessageRecord};

/// Run the harvester, stopping gracefully on SIGTERM or Ctrl+C
///
/// The first signal cancels the harvester's token; the run is still awaited
/// so fetched files get verified and the log is saved. SIGTERM is only
/// watched on unix.
pub async fn run_until_signal(harvester: Harvester) -> Result<RunReport> {
    let cancel = harvester.cancel_token();
    let run = harvester.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result,
        signal = shutdown_signal() => {
            tracing::info!(signal, "shutdown requested, finishing in-flight work");
            cancel.cancel();
        }
    }
    run.await
}

/// Name of the first shutdown signal received
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                name = ctrl_c() => name,
            },
            Err(e) => {
                tracing::warn!(error = %e, "cannot watch SIGTERM, relying on Ctrl+C");
                ctrl_c().await
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

/// Resolves on Ctrl+C; never resolves when the handler cannot be installed
async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot watch Ctrl+C");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
