//! Project session management.
//!
//! A [`Project`] is one open story. It owns the validated catalog and the
//! current [`StoryState`], and is the single serialization point for every
//! mutation:
//! - writers (`validate_and_commit`, `apply_unlock_event`,
//!   `advance_relationship`) hold the project's writer lock for the whole
//!   read-validate-commit cycle
//! - the committed state is published as an `Arc<StoryState>`; readers clone
//!   the `Arc` and see either the state before a commit or after it
//! - generation runs with no lock held
//!
//! Projects share nothing, so any number of them can run side by side.

use crate::character::CharacterId;
use crate::codec::{CodecError, CompressedScene, DescriptiveScene, ExpandedScene, SceneCodec};
use crate::config::{Catalog, ConfigError, ProjectConfig};
use crate::generation::{
    run_generation, AbortRegistration, Draft, GenerationBackend, GenerationOutcome,
    GenerationRequest,
};
use crate::history::StoryHistory;
use crate::patterns::PatternToken;
use crate::persist::{PersistError, SavedProject};
use crate::progression::UnlockNotification;
use crate::relationship::RelationshipId;
use crate::scene::Scene;
use crate::state::{IntegrityError, StoryState};
use crate::validator::{ConsistencyValidator, StoryEffect, ValidationError, ValidationReport};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Errors from project operations.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Inconsistent state: {0}")]
    Integrity(#[from] IntegrityError),
}

/// An open project.
pub struct Project {
    session_id: Uuid,
    opened_at: DateTime<Utc>,
    config: ProjectConfig,
    catalog: Arc<Catalog>,
    validator: ConsistencyValidator,
    codec: SceneCodec,
    /// Held for the whole of every mutation.
    writer: Mutex<()>,
    current: RwLock<Arc<StoryState>>,
}

impl Project {
    /// Open a new project from its configuration.
    pub fn open(config: ProjectConfig) -> Result<Self, ProjectError> {
        let (catalog, state) = config.build()?;
        Ok(Self::start(config, catalog, state))
    }

    /// Resume a project from a saved state.
    pub fn resume(config: ProjectConfig, state: StoryState) -> Result<Self, ProjectError> {
        let catalog = config.catalog()?;
        state.check_integrity(&catalog)?;
        Ok(Self::start(config, catalog, state))
    }

    /// Resume a project from a save file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let saved = SavedProject::load_json(path).await?;
        let catalog = saved.catalog()?;
        Ok(Self::start(saved.config, catalog, saved.state))
    }

    fn start(config: ProjectConfig, catalog: Catalog, state: StoryState) -> Self {
        let catalog = Arc::new(catalog);
        let session_id = Uuid::new_v4();
        info!(
            %session_id,
            project = %config.name,
            scenes = state.history().len(),
            "project opened"
        );
        Self {
            session_id,
            opened_at: Utc::now(),
            validator: ConsistencyValidator::new(Arc::clone(&catalog)),
            codec: SceneCodec::new(Arc::clone(&catalog)),
            catalog,
            config,
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(state)),
        }
    }

    /// Identifier of this session. Reopening a project starts a new session.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The latest committed state.
    pub async fn snapshot(&self) -> Arc<StoryState> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn history(&self) -> StoryHistory {
        self.snapshot().await.history().clone()
    }

    pub async fn history_len(&self) -> usize {
        self.snapshot().await.history().len()
    }

    /// The patterns a character may exhibit right now.
    pub async fn patterns_available(
        &self,
        character: &CharacterId,
    ) -> Result<BTreeSet<PatternToken>, ProjectError> {
        let state = self.snapshot().await;
        Ok(self.validator.patterns_available(&state, character)?.clone())
    }

    /// Validate a scene and commit it if it has no violations.
    pub async fn validate_and_commit(&self, scene: Scene) -> Result<ValidationReport, ProjectError> {
        let _writer = self.writer.lock().await;
        let base = self.snapshot().await;

        let evaluation = self.validator.evaluate(&base, &scene)?;
        if !evaluation.is_clean() {
            return Ok(self.validator.reject(evaluation));
        }

        let mut next = StoryState::clone(&base);
        let report = self.validator.commit(&mut next, scene, evaluation);
        self.publish(next).await;
        Ok(report)
    }

    /// Validate a scene without committing it.
    pub async fn preview(&self, scene: &Scene) -> Result<ValidationReport, ProjectError> {
        let state = self.snapshot().await;
        Ok(self.validator.validate(&state, scene)?)
    }

    /// Fire an unlock event for a character outside of any scene.
    pub async fn apply_unlock_event(
        &self,
        character: &CharacterId,
        event: &str,
    ) -> Result<UnlockNotification, ProjectError> {
        let _writer = self.writer.lock().await;
        let base = self.snapshot().await;
        let mut next = StoryState::clone(&base);
        let notification = self.validator.commit_unlock(&mut next, character, event)?;
        // A declared event is consumed even when it changes nothing else.
        if next != *base {
            info!(
                character = %character,
                event,
                unlocked = notification.unlocked.len(),
                "unlock event applied"
            );
            self.publish(next).await;
        }
        Ok(notification)
    }

    /// Fire a trigger on a relationship outside of any scene.
    pub async fn advance_relationship(
        &self,
        relationship: &RelationshipId,
        trigger: &str,
    ) -> Result<Vec<StoryEffect>, ProjectError> {
        let _writer = self.writer.lock().await;
        let mut next = StoryState::clone(&*self.snapshot().await);
        let effects = self.validator.commit_advance(&mut next, relationship, trigger)?;
        info!(relationship = %relationship, trigger, effects = effects.len(), "relationship advanced");
        self.publish(next).await;
        Ok(effects)
    }

    pub async fn expand(&self, scene: &Scene) -> Result<ExpandedScene, ProjectError> {
        let state = self.snapshot().await;
        Ok(self.codec.expand(state.snapshot(), scene)?)
    }

    pub async fn compress(&self, drafted: &DescriptiveScene) -> Result<CompressedScene, ProjectError> {
        let state = self.snapshot().await;
        Ok(self.codec.compress(state.snapshot(), drafted)?)
    }

    pub fn encode_compact(&self, scene: &Scene) -> String {
        self.codec.encode_compact(scene)
    }

    pub fn decode_compact(&self, text: &str) -> Result<Scene, ProjectError> {
        Ok(self.codec.decode_compact(text)?)
    }

    /// Ask `backend` to draft from `scene`.
    ///
    /// The scene is expanded against the current snapshot, then the backend
    /// is called with no lock held. Backend failures, timeouts and
    /// cancellation all come back as [`GenerationOutcome::NoScene`]. Nothing
    /// is committed: a proposed scene still has to go through
    /// [`Project::validate_and_commit`].
    pub async fn draft(
        &self,
        backend: &dyn GenerationBackend,
        scene: &Scene,
        abort: Option<AbortRegistration>,
    ) -> Result<GenerationOutcome, ProjectError> {
        let expanded = self.expand(scene).await?;
        let request = GenerationRequest {
            project: self.config.name.clone(),
            prompt: expanded.prompt(),
            scene: expanded,
        };

        let draft = match run_generation(backend, request, self.config.generation_timeout(), abort).await {
            Ok(draft) => draft,
            Err(err) => {
                return Ok(GenerationOutcome::NoScene {
                    reason: err.to_string(),
                })
            }
        };

        let outcome = match draft {
            Draft::Text(text) => GenerationOutcome::Text(text),
            Draft::Scene(drafted) => match self.compress(&drafted).await {
                Ok(compressed) if compressed.is_complete() => {
                    GenerationOutcome::Proposed(compressed.scene)
                }
                Ok(compressed) => GenerationOutcome::Ambiguous(compressed),
                Err(err) => GenerationOutcome::NoScene {
                    reason: err.to_string(),
                },
            },
            Draft::Compact(wire) => match self.codec.decode_compact(&wire) {
                Ok(scene) => GenerationOutcome::Proposed(scene),
                Err(err) => GenerationOutcome::NoScene {
                    reason: err.to_string(),
                },
            },
        };
        debug!(session_id = %self.session_id, ?outcome, "draft finished");
        Ok(outcome)
    }

    /// Save the latest committed state.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let state = self.snapshot().await;
        let saved = SavedProject::new(self.config.clone(), StoryState::clone(&state));
        saved.save_json(path).await?;
        Ok(())
    }

    /// End the session and hand back the final state.
    pub async fn close(self) -> StoryState {
        let _writer = self.writer.lock().await;
        let state = self.snapshot().await;
        info!(
            session_id = %self.session_id,
            project = %self.config.name,
            scenes = state.history().len(),
            "project closed"
        );
        StoryState::clone(&state)
    }

    async fn publish(&self, next: StoryState) {
        *self.current.write().await = Arc::new(next);
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("session_id", &self.session_id)
            .field("name", &self.config.name)
            .finish_non_exhaustive()
    }
}
