//! Workspace configuration.
//!
//! A JSON file in the hidden sync directory recording which remote
//! repository the local issue store tracks.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub repository: RepoConfig,
}

/// Remote repository coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepoConfig {
    pub owner: String,
    pub repo: String,
}

impl Config {
    /// Default config for a repository.
    #[must_use]
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            repository: RepoConfig {
                owner: owner.into(),
                repo: repo.into(),
            },
        }
    }

    /// `owner/repo` slug passed to the remote client.
    #[must_use]
    pub fn repo_slug(&self) -> String {
        format!("{}/{}", self.repository.owner, self.repository.repo)
    }
}

/// Load configuration from `path`.
///
/// # Errors
///
/// Returns `NotInitialized` when the file is missing, `Config` when it does
/// not parse.
pub fn load(path: &Path) -> Result<Config> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SyncError::NotInitialized);
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&data)
        .map_err(|e| SyncError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Save configuration to `path`.
///
/// # Errors
///
/// Returns `Io` on write failure.
pub fn save(path: &Path, config: &Config) -> Result<()> {
    let mut data = serde_json::to_string_pretty(config)?;
    data.push('\n');
    fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = Config::new("octo", "widgets");
        save(&path, &config).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.repo_slug(), "octo/widgets");
    }

    #[test]
    fn test_missing_file_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        let err = load(&dir.path().join("config.json")).unwrap_err();
        assert!(matches!(err, SyncError::NotInitialized));
    }

    #[test]
    fn test_garbage_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "nope").unwrap();
        assert!(matches!(load(&path).unwrap_err(), SyncError::Config(_)));
    }
}
