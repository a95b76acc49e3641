//! Configuration types for media-harvest

use crate::error::{Error, Result};
use crate::types::Category;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download behavior configuration (directories, concurrency, run modes)
///
/// Used as a nested sub-config within [`HarvestConfig`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory holding one sub-directory per category (default: "./downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum simultaneous media fetches (default: 5)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of records whose metadata is requested together (default: 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Re-classify history and re-fetch files that already exist
    #[serde(default)]
    pub force_redownload: bool,

    /// Stop scanning once this many category assignments were collected
    #[serde(default)]
    pub item_limit: Option<usize>,

    /// Scan and report only; nothing is downloaded or persisted
    #[serde(default)]
    pub dry_run: bool,

    /// Audit files of already-downloaded records instead of harvesting
    #[serde(default)]
    pub verify_only: bool,

    /// Remove the log file, its backup and all category directories first
    #[serde(default)]
    pub clean_workspace: bool,

    /// Pause between the last write and verification (default: 1 second)
    #[serde(default = "default_settle_delay", with = "duration_serde")]
    pub settle_delay: Duration,

    /// Maximum length, in characters, of each free-text filename part (default: 50)
    #[serde(default = "default_name_max_length")]
    pub name_max_length: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            force_redownload: false,
            item_limit: None,
            dry_run: false,
            verify_only: false,
            clean_workspace: false,
            settle_delay: default_settle_delay(),
            name_max_length: default_name_max_length(),
        }
    }
}

/// Message selection filters
///
/// User filters are handles or numeric ids; they are resolved through the
/// message source at the start of a scan.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Do not collect the engagement (any reaction) category
    #[serde(default)]
    pub skip_engagement_category: bool,

    /// Do not collect the user-reply and user-reaction categories
    #[serde(default)]
    pub skip_self_category: bool,

    /// Tracked user, by numeric id
    #[serde(default)]
    pub user_id: Option<i64>,

    /// Tracked user, by handle (used when `user_id` is not set)
    #[serde(default)]
    pub username: Option<String>,

    /// Only count reactions from this user (defaults to the tracked user)
    #[serde(default)]
    pub reacted_by: Option<String>,

    /// Only count replies to this user (defaults to the tracked user)
    #[serde(default)]
    pub replied_to: Option<String>,

    /// Restrict the scan to a single forum topic
    #[serde(default)]
    pub topic_id: Option<i64>,

    /// Resume from this message id instead of the last verified download
    #[serde(default)]
    pub resume_from_id: Option<i64>,
}

/// Persistence of the download log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Log file path (default: "./download_log.json")
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Save the log every time this many records are verified (default: 10)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

/// Retry configuration for media fetches
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per media fetch, including the first (default: 5)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay after a transient transport error (default: 1 second)
    #[serde(default = "default_transient_delay", with = "duration_serde")]
    pub transient_delay: Duration,

    /// Upper bound on a server-requested rate-limit wait (None = honor as given)
    #[serde(default, with = "optional_duration_serde")]
    pub max_rate_limit_wait: Option<Duration>,

    /// Stretch transient delays by a random 0-100% (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            transient_delay: default_transient_delay(),
            max_rate_limit_wait: None,
            jitter: false,
        }
    }
}

/// Main configuration for [`Harvester`](crate::Harvester)
///
/// Sub-configs are flattened for serialization, so the JSON form is a single
/// flat object:
///
/// ```
/// let config: media_harvest::HarvestConfig = serde_json::from_str(
///     r#"{ "channel": "photos", "concurrency": 3, "checkpoint_interval": 20 }"#,
/// ).unwrap();
/// assert_eq!(config.download.concurrency, 3);
/// assert_eq!(config.persistence.checkpoint_interval, 20);
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Channel handle, resolved through the message source
    #[serde(default)]
    pub channel: String,

    /// Directories, concurrency and run modes
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Category and user filters
    #[serde(flatten)]
    pub filters: FilterConfig,

    /// Download log persistence
    #[serde(flatten)]
    pub persistence: PersistenceConfig,

    /// Fetch retry policy
    #[serde(flatten)]
    pub retry: RetryConfig,
}

impl HarvestConfig {
    /// Create a config for the given channel with default settings
    pub fn for_channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Default::default()
        }
    }

    /// Directory that receives files for `category`
    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.download.output_dir.join(category.dir_name())
    }

    /// Sibling path holding the pre-run snapshot of the log
    pub fn backup_file(&self) -> PathBuf {
        let mut name = self.persistence.log_file.clone().into_os_string();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Categories that are collected with the current filter settings
    pub fn enabled_categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|category| match category {
                Category::Engagement => !self.filters.skip_engagement_category,
                Category::UserReply | Category::UserReaction => !self.filters.skip_self_category,
            })
            .collect()
    }

    /// Reject settings that would make the pipeline stall or misbehave
    pub fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            return Err(Error::config("channel", "channel must not be empty"));
        }
        if self.download.concurrency == 0 {
            return Err(Error::config("concurrency", "must be at least 1"));
        }
        if self.download.batch_size == 0 {
            return Err(Error::config("batch_size", "must be at least 1"));
        }
        if self.download.name_max_length == 0 {
            return Err(Error::config("name_max_length", "must be at least 1"));
        }
        if self.persistence.checkpoint_interval == 0 {
            return Err(Error::config("checkpoint_interval", "must be at least 1"));
        }
        if self.retry.max_retries == 0 {
            return Err(Error::config("max_retries", "must allow at least one attempt"));
        }
        Ok(())
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("download_log.json")
}

fn default_concurrency() -> usize {
    5
}

fn default_batch_size() -> usize {
    100
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_name_max_length() -> usize {
    50
}

fn default_checkpoint_interval() -> usize {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_transient_delay() -> Duration {
    Duration::from_secs(1)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = HarvestConfig::default();
        assert_eq!(config.download.concurrency, 5);
        assert_eq!(config.download.batch_size, 100);
        assert_eq!(config.download.name_max_length, 50);
        assert_eq!(config.persistence.checkpoint_interval, 10);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.download.output_dir, PathBuf::from("downloads"));
        assert!(!config.download.force_redownload);
    }

    #[test]
    fn empty_json_object_yields_defaults() {
        let config: HarvestConfig = serde_json::from_str("{}").expect("deserialize failed");
        assert_eq!(config.download.concurrency, 5);
        assert_eq!(config.download.settle_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_rate_limit_wait, None);
        assert_eq!(config.persistence.log_file, PathBuf::from("download_log.json"));
    }

    #[test]
    fn flattened_fields_round_trip() {
        let mut original = HarvestConfig::for_channel("photos");
        original.download.item_limit = Some(7);
        original.filters.reacted_by = Some("@alice".into());
        original.retry.max_rate_limit_wait = Some(Duration::from_secs(600));

        let json = serde_json::to_value(&original).expect("serialize failed");
        assert_eq!(json["item_limit"], 7, "sub-config fields must be flattened");
        assert_eq!(json["max_rate_limit_wait"], 600);

        let restored: HarvestConfig = serde_json::from_value(json).expect("deserialize failed");
        assert_eq!(restored.channel, "photos");
        assert_eq!(restored.download.item_limit, Some(7));
        assert_eq!(restored.filters.reacted_by.as_deref(), Some("@alice"));
        assert_eq!(
            restored.retry.max_rate_limit_wait,
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn duration_serde_rejects_string_instead_of_integer() {
        let json = r#"{"transient_delay": "soon"}"#;
        let result = serde_json::from_str::<RetryConfig>(json);
        assert!(
            result.is_err(),
            "string value for a Duration field must produce a serde error"
        );
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut config = HarvestConfig::for_channel("photos");
        assert!(config.validate().is_ok());

        config.download.concurrency = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("concurrency")),
            other => panic!("expected config error, got {other:?}"),
        }

        let mut config = HarvestConfig::for_channel("photos");
        config.persistence.checkpoint_interval = 0;
        assert!(config.validate().is_err());

        let mut config = HarvestConfig::for_channel("photos");
        config.retry.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_channel() {
        let config = HarvestConfig::for_channel("   ");
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn backup_file_is_a_sibling_with_bak_suffix() {
        let mut config = HarvestConfig::default();
        config.persistence.log_file = PathBuf::from("/var/lib/harvest/log.json");
        assert_eq!(
            config.backup_file(),
            PathBuf::from("/var/lib/harvest/log.json.bak")
        );
    }

    #[test]
    fn category_dirs_live_under_output_dir() {
        let mut config = HarvestConfig::default();
        config.download.output_dir = PathBuf::from("/data");
        assert_eq!(
            config.category_dir(Category::Engagement),
            PathBuf::from("/data/all_reactions")
        );
        assert_eq!(
            config.category_dir(Category::UserReaction),
            PathBuf::from("/data/my_reactions")
        );
    }

    #[test]
    fn skip_flags_disable_categories() {
        let mut config = HarvestConfig::default();
        assert_eq!(config.enabled_categories().len(), 3);

        config.filters.skip_self_category = true;
        assert_eq!(config.enabled_categories(), vec![Category::Engagement]);

        config.filters.skip_engagement_category = true;
        assert!(config.enabled_categories().is_empty());
    }
}
