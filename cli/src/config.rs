use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Overrides the platform data directory (handy for tests and containers).
pub const DATA_DIR_ENV: &str = "LARDER_DATA_DIR";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => ProjectDirs::from("", "", "larder")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        Self::from_data_dir(&data_dir)
    }

    pub fn from_data_dir(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Config {
            db_path: data_dir.join("larder.db"),
            data_dir: data_dir.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_data_dir_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");

        let config = Config::from_data_dir(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(config.data_dir, nested);
        assert_eq!(config.db_path, nested.join("larder.db"));
    }

    #[test]
    fn test_database_opens_in_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::from_data_dir(tmp.path()).unwrap();
        let svc = larder_core::service::LarderService::open(&config.db_path).unwrap();
        assert!(!svc.db().list_units().unwrap().is_empty());
        assert!(config.db_path.exists());
    }
}
