// ABOUTME: Shared CLI/environment configuration for the pipeline commands
// ABOUTME: Connection strings and paths come from flags or the environment

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::registry::ModelRegistry;
use crate::selection::Selection;
use crate::snapshot::SnapshotStore;

pub const DEFAULT_SNAPSHOTS_DIR: &str = "snapshots";
pub const DEFAULT_MODELS_FILE: &str = "models.toml";
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 3600;

/// Arguments shared by every pipeline command.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Directory holding per-model snapshot folders
    #[arg(long, env = "SNAPSHOTS_DIR", default_value = DEFAULT_SNAPSHOTS_DIR)]
    pub snapshots_dir: PathBuf,
    /// Generated model metadata file
    #[arg(long, env = "MODELS_FILE", default_value = DEFAULT_MODELS_FILE)]
    pub models_file: PathBuf,
    /// Replicate only these models (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub include_tables: Option<Vec<String>>,
    /// Skip these models (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude_tables: Option<Vec<String>>,
}

impl CommonArgs {
    /// Environment-only construction for the interactive menu path.
    pub fn from_env() -> Self {
        Self {
            snapshots_dir: std::env::var_os("SNAPSHOTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOTS_DIR)),
            models_file: std::env::var_os("MODELS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODELS_FILE)),
            include_tables: None,
            exclude_tables: None,
        }
    }

    pub fn registry(&self) -> Result<ModelRegistry> {
        ModelRegistry::load(&self.models_file)
    }

    pub fn snapshot_store(&self) -> SnapshotStore {
        SnapshotStore::new(&self.snapshots_dir)
    }

    pub fn selection(&self) -> Selection {
        Selection::new(self.include_tables.clone(), self.exclude_tables.clone())
    }
}

/// Read a required connection string from the environment.
pub fn require_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{} is not set", name))
}

/// Sync interval from `SYNC_INTERVAL_SECS`, defaulting to one hour.
pub fn sync_interval_from_env() -> Duration {
    std::env::var("SYNC_INTERVAL_SECS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_from_args() {
        let args = CommonArgs {
            snapshots_dir: PathBuf::from("snapshots"),
            models_file: PathBuf::from("models.toml"),
            include_tables: Some(vec!["orders".to_string(), "users".to_string()]),
            exclude_tables: Some(vec!["users".to_string()]),
        };
        let selection = args.selection();
        assert!(selection.allows("orders"));
        assert!(!selection.allows("users"));
        assert!(!selection.allows("tags"));
    }
}
