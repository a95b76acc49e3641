//! Filesystem assertions for harvest outputs

use std::path::{Path, PathBuf};

use media_harvest::{Category, HarvestConfig};
use walkdir::WalkDir;

/// Every regular file below `root`, sorted
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// File names inside a category directory, sorted
pub fn category_files(config: &HarvestConfig, category: Category) -> Vec<String> {
    files_under(&config.category_dir(category))
        .into_iter()
        .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect()
}

/// Assert no temp files or partial downloads remain below `root`
pub fn assert_no_stray_files(root: &Path, allowed: &[&str]) {
    for path in files_under(root) {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let in_category = path
            .parent()
            .and_then(|p| p.file_name())
            .is_some_and(|dir| Category::ALL.iter().any(|c| dir == c.dir_name()));
        assert!(
            !name.ends_with(".part"),
            "partial download left behind: {}",
            path.display()
        );
        assert!(
            in_category || allowed.contains(&name.as_str()),
            "unexpected file {}",
            path.display()
        );
    }
}
