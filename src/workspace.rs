//! Output directory bootstrap and cleanup

use std::path::Path;

use tracing::{debug, info};

use crate::config::HarvestConfig;
use crate::error::Result;

/// Create the directory of every enabled category
pub async fn prepare_directories(config: &HarvestConfig) -> Result<()> {
    for category in config.enabled_categories() {
        let dir = config.category_dir(category);
        tokio::fs::create_dir_all(&dir).await?;
        debug!(category = %category, path = %dir.display(), "category directory ready");
    }
    Ok(())
}

/// Delete the log, its backup and all category directories, then recreate
/// the directories of enabled categories
pub async fn clean_workspace(config: &HarvestConfig) -> Result<()> {
    remove_file_if_present(&config.persistence.log_file).await?;
    remove_file_if_present(&config.backup_file()).await?;

    for category in crate::types::Category::ALL {
        let dir = config.category_dir(category);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(path = %dir.display(), "removed category directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    prepare_directories(config).await?;
    info!(output_dir = %config.download.output_dir.display(), "workspace cleaned");
    Ok(())
}

async fn remove_file_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "removed file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::config_in;
    use crate::types::Category;

    #[tokio::test]
    async fn prepares_only_enabled_category_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.filters.skip_self_category = true;

        prepare_directories(&config).await.unwrap();

        assert!(config.category_dir(Category::Engagement).is_dir());
        assert!(!config.category_dir(Category::UserReply).exists());
        assert!(!config.category_dir(Category::UserReaction).exists());
    }

    #[tokio::test]
    async fn clean_removes_state_and_files_then_recreates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        prepare_directories(&config).await.unwrap();
        std::fs::write(&config.persistence.log_file, "{}").unwrap();
        std::fs::write(config.backup_file(), "{}").unwrap();
        let stale = config.category_dir(Category::UserReply).join("old.jpg");
        std::fs::write(&stale, b"old").unwrap();

        clean_workspace(&config).await.unwrap();

        assert!(!config.persistence.log_file.exists());
        assert!(!config.backup_file().exists());
        assert!(!stale.exists());
        for category in Category::ALL {
            let dir = config.category_dir(category);
            assert!(dir.is_dir());
            assert_eq!(std::fs::read_dir(dir).unwrap().count(), 0);
        }
    }

    #[tokio::test]
    async fn clean_on_empty_workspace_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        clean_workspace(&config).await.unwrap();
        assert!(config.category_dir(Category::Engagement).is_dir());
    }
}
