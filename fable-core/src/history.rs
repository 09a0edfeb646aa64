//! Append-only log of accepted scenes.

use crate::scene::{Scene, SceneId, SceneTarget};
use crate::validator::{StoryEffect, Warning};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A scene that passed validation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedScene {
    id: SceneId,
    scene: Scene,
    effects: Vec<StoryEffect>,
    #[serde(default)]
    warnings: Vec<Warning>,
}

impl AcceptedScene {
    pub(crate) fn new(
        id: SceneId,
        scene: Scene,
        effects: Vec<StoryEffect>,
        warnings: Vec<Warning>,
    ) -> Self {
        Self {
            id,
            scene,
            effects,
            warnings,
        }
    }

    pub fn id(&self) -> SceneId {
        self.id
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// State changes the scene caused, in application order.
    pub fn effects(&self) -> &[StoryEffect] {
        &self.effects
    }

    /// Advisory warnings raised when the scene was accepted.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn supersedes(&self) -> Option<SceneId> {
        self.scene.supersedes
    }
}

/// The story so far.
///
/// Scenes are shared behind `Arc` so that snapshots clone cheaply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryHistory {
    scenes: Vec<Arc<AcceptedScene>>,
}

impl StoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// The id the next accepted scene will receive.
    pub fn next_id(&self) -> SceneId {
        SceneId(self.scenes.len() as u64 + 1)
    }

    pub fn contains(&self, id: SceneId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: SceneId) -> Option<&AcceptedScene> {
        let index = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.scenes.get(index).map(Arc::as_ref)
    }

    pub fn latest(&self) -> Option<&AcceptedScene> {
        self.scenes.last().map(Arc::as_ref)
    }

    /// All accepted scenes, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AcceptedScene> {
        self.scenes.iter().map(Arc::as_ref)
    }

    /// The latest scene that supersedes `id`, if it was amended.
    pub fn superseded_by(&self, id: SceneId) -> Option<SceneId> {
        self.scenes
            .iter()
            .rev()
            .find(|s| s.supersedes() == Some(id))
            .map(|s| s.id())
    }

    /// Scenes that have not been superseded by a later amendment.
    pub fn effective(&self) -> Vec<&AcceptedScene> {
        self.iter()
            .filter(|s| self.superseded_by(s.id()).is_none())
            .collect()
    }

    /// Scenes with at least one event targeting `target`.
    pub fn involving(&self, target: &SceneTarget) -> Vec<&AcceptedScene> {
        self.iter().filter(|s| s.scene().involves(target)).collect()
    }

    pub(crate) fn append(&mut self, accepted: AcceptedScene) -> SceneId {
        debug_assert_eq!(accepted.id, self.next_id());
        let id = accepted.id;
        self.scenes.push(Arc::new(accepted));
        id
    }
}
