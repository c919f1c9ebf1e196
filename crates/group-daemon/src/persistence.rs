//! Persistence for node identity and local groups.
//!
//! The settings snapshot is stored as pretty JSON so a restarted daemon
//! keeps its node id, key pair, sequence counters and groups.

use anyhow::{Context, Result};
use group_core::NodeSettings;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name used when no state path is given.
pub const DEFAULT_STATE_FILE: &str = "group-state.json";

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// State file next to the config file, or in the working directory.
    pub fn beside(config: Option<&Path>) -> Self {
        let dir = config
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::new(dir.join(DEFAULT_STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, `None` if nothing was saved yet.
    pub fn load(&self) -> Result<Option<NodeSettings>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {:?}", self.path))?;
        let settings = NodeSettings::from_json(&contents)
            .with_context(|| format!("parsing {:?}", self.path))?;
        Ok(Some(settings))
    }

    pub fn save(&self, settings: &NodeSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, settings.to_json()?)?;
        debug!("Saved node state to {:?}", self.path);
        Ok(())
    }
}
