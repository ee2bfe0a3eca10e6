//! Pipeline configuration resolved from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `REELHOUSE_HOME` | `~/.reelhouse` |
//! | `REELHOUSE_DB_PATH` | `<home>/warehouse.duckdb` |
//! | `REELHOUSE_DATASET_URL` | MovieLens 32M archive |

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use reelhouse_warehouse::WarehouseConfig;

pub const DEFAULT_DATASET_URL: &str = "https://files.grouplens.org/datasets/movielens/ml-32m.zip";
pub const DEFAULT_ARCHIVE_ROOT: &str = "ml-32m";

/// Where the dataset archive comes from and how it is laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetConfig {
    pub url: String,
    /// Directory inside the archive that holds the CSV files.
    pub archive_root: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            url: String::from(DEFAULT_DATASET_URL),
            archive_root: String::from(DEFAULT_ARCHIVE_ROOT),
        }
    }
}

impl DatasetConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("REELHOUSE_DATASET_URL") {
            let url = url.trim();
            if !url.is_empty() {
                config.url = url.to_string();
            }
        }
        config
    }

    /// Local file name of the archive, taken from the last URL segment.
    pub fn archive_file_name(&self) -> String {
        self.url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .map_or_else(|| String::from("dataset.zip"), str::to_string)
    }
}

/// Everything a pipeline run needs to know about paths and sources.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub warehouse: WarehouseConfig,
    pub dataset: DatasetConfig,
    pub raw_dir: PathBuf,
    pub results_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl PipelineConfig {
    /// Resolve the home directory from `REELHOUSE_HOME`, falling back to
    /// `~/.reelhouse`.
    pub fn from_env() -> Self {
        Self::from_parts(WarehouseConfig::default())
    }

    /// Use `home` instead of `REELHOUSE_HOME`.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self::from_parts(WarehouseConfig::for_home(home))
    }

    fn from_parts(warehouse: WarehouseConfig) -> Self {
        let home = warehouse.reelhouse_home.clone();
        Self {
            warehouse,
            dataset: DatasetConfig::from_env(),
            raw_dir: home.join("data").join("raw"),
            results_dir: home.join("data").join("results"),
            log_dir: home.join("logs"),
        }
    }

    pub fn home(&self) -> &Path {
        self.warehouse.reelhouse_home.as_path()
    }

    pub fn archive_path(&self) -> PathBuf {
        self.raw_dir.join(self.dataset.archive_file_name())
    }

    /// Create the data and log directories.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [&self.raw_dir, &self.results_dir, &self.log_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn derives_layout_from_home() {
        let config = PipelineConfig::with_home("/srv/reelhouse");

        assert_eq!(config.home(), Path::new("/srv/reelhouse"));
        assert_eq!(config.raw_dir, Path::new("/srv/reelhouse/data/raw"));
        assert_eq!(config.results_dir, Path::new("/srv/reelhouse/data/results"));
        assert_eq!(config.log_dir, Path::new("/srv/reelhouse/logs"));
    }

    #[test]
    fn archive_name_comes_from_url() {
        let dataset = DatasetConfig {
            url: String::from("https://example.test/datasets/ml-latest-small.zip?download=1"),
            archive_root: String::from("ml-latest-small"),
        };
        assert_eq!(dataset.archive_file_name(), "ml-latest-small.zip");

        let bare = DatasetConfig {
            url: String::from("https://example.test/"),
            archive_root: String::new(),
        };
        assert_eq!(bare.archive_file_name(), "dataset.zip");
    }

    #[test]
    fn creates_directories() {
        let temp = tempdir().expect("tempdir");
        let config = PipelineConfig::with_home(temp.path().join("home"));
        config.ensure_dirs().expect("dirs");

        assert!(config.raw_dir.is_dir());
        assert!(config.results_dir.is_dir());
        assert!(config.log_dir.is_dir());
    }
}
