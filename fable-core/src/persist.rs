//! Project persistence for save/load functionality.
//!
//! A save holds the configuration the project was opened with plus the full
//! story state: characters, relationships with their transition histories,
//! and the ordered scene log. Loading re-checks referential integrity, so a
//! save that names a character or relationship it does not contain is
//! rejected instead of resumed.

use crate::config::{Catalog, ConfigError, ProjectConfig};
use crate::state::{IntegrityError, StoryState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::info;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Saved config is invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("Saved state is inconsistent: {0}")]
    Integrity(#[from] IntegrityError),
}

/// Current save file version.
pub const SAVE_VERSION: u32 = 1;

/// A saved project with all state needed to resume it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedProject {
    /// Save format version for compatibility checking.
    pub version: u32,

    pub saved_at: DateTime<Utc>,

    pub config: ProjectConfig,

    pub state: StoryState,

    pub metadata: SaveMetadata,
}

/// Summary of a save, readable without loading the full state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub project: String,
    pub characters: usize,
    pub relationships: usize,
    pub scenes: usize,
    pub saved_at: DateTime<Utc>,
}

impl SavedProject {
    pub fn new(config: ProjectConfig, state: StoryState) -> Self {
        let saved_at = Utc::now();
        let metadata = SaveMetadata {
            project: config.name.clone(),
            characters: state.snapshot().characters().len(),
            relationships: state.snapshot().relationships().count(),
            scenes: state.history().len(),
            saved_at,
        };
        Self {
            version: SAVE_VERSION,
            saved_at,
            config,
            state,
            metadata,
        }
    }

    /// Save to a JSON file. The file is replaced in one rename.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path).await?;
        info!(
            path = %path.display(),
            project = %self.metadata.project,
            scenes = self.metadata.scenes,
            "project saved"
        );
        Ok(())
    }

    /// Load from a JSON file and check it can be resumed.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        saved.catalog()?;
        Ok(saved)
    }

    /// Rebuild the catalog and check the state against it.
    pub fn catalog(&self) -> Result<Catalog, PersistError> {
        let catalog = self.config.catalog()?;
        self.state.check_integrity(&catalog)?;
        Ok(catalog)
    }

    /// Check if a save file exists and get its metadata without loading the full state.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<SaveMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: SaveMetadata,
        }

        let partial: Partial = serde_json::from_str(&content)?;

        if partial.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: partial.version,
            });
        }

        Ok(partial.metadata)
    }
}

/// Information about a save file.
#[derive(Debug, Clone)]
pub struct SaveInfo {
    pub path: PathBuf,
    pub metadata: SaveMetadata,
}

/// List all readable saves in a directory, most recent first.
pub async fn list_saves(dir: impl AsRef<Path>) -> Result<Vec<SaveInfo>, PersistError> {
    let mut saves = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "json") {
            if let Ok(metadata) = SavedProject::peek_metadata(&path).await {
                saves.push(SaveInfo { path, metadata });
            }
        }
    }

    saves.sort_by(|a, b| {
        b.metadata
            .saved_at
            .cmp(&a.metadata.saved_at)
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(saves)
}

/// The save file for a project.
pub fn project_save_path(base_dir: impl AsRef<Path>, project: &str) -> PathBuf {
    let sanitized = project
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    base_dir.as_ref().join(format!("{sanitized}.json"))
}
