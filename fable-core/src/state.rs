//! Story state: the entity snapshot plus the history it was built from.

use crate::character::{CharacterError, CharacterId, CharacterState, CharacterStore};
use crate::config::Catalog;
use crate::history::StoryHistory;
use crate::relationship::{GuardContext, RelationshipId, RelationshipRecord, RelationshipType};
use crate::scene::{SceneId, SceneTarget};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Referential-integrity failures in a snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrityError {
    #[error("Relationship {relationship} references missing character {character}")]
    MissingMember {
        relationship: RelationshipId,
        character: CharacterId,
    },

    #[error("Relationship {relationship} has unknown type '{relationship_type}'")]
    UnknownRelationshipType {
        relationship: RelationshipId,
        relationship_type: RelationshipType,
    },

    #[error("Relationship {relationship} is at stage '{stage}', which its graph does not declare")]
    UndeclaredRelationshipStage {
        relationship: RelationshipId,
        stage: String,
    },

    #[error("Scene {scene} references missing {target}")]
    DanglingSceneTarget { scene: SceneId, target: SceneTarget },

    #[error("Scene {scene} supersedes {superseded}, which is not an earlier scene")]
    DanglingAmendment { scene: SceneId, superseded: SceneId },

    #[error("Scene {scene} is out of order")]
    SceneOutOfOrder { scene: SceneId },

    #[error(transparent)]
    Character(#[from] CharacterError),
}

/// All characters and relationships at one point in the story.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    characters: CharacterStore,
    relationships: BTreeMap<RelationshipId, RelationshipRecord>,
}

impl Snapshot {
    pub fn new(
        characters: CharacterStore,
        relationships: impl IntoIterator<Item = RelationshipRecord>,
    ) -> Self {
        Self {
            characters,
            relationships: relationships
                .into_iter()
                .map(|r| (r.id().clone(), r))
                .collect(),
        }
    }

    pub fn characters(&self) -> &CharacterStore {
        &self.characters
    }

    pub fn character(&self, id: &CharacterId) -> Option<&CharacterState> {
        self.characters.get(id)
    }

    pub fn relationship(&self, id: &RelationshipId) -> Option<&RelationshipRecord> {
        self.relationships.get(id)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipRecord> {
        self.relationships.values()
    }

    /// Relationships the character takes part in.
    pub fn relationships_of(&self, character: &CharacterId) -> Vec<&RelationshipRecord> {
        self.relationships
            .values()
            .filter(|r| r.involves(character))
            .collect()
    }

    /// The relationship between `a` and `b`, respecting directionality.
    pub fn relationship_between(&self, a: &CharacterId, b: &CharacterId) -> Option<&RelationshipRecord> {
        self.relationships.values().find(|r| r.pair().matches(a, b))
    }

    /// Whether a scene target exists in this snapshot.
    pub fn contains(&self, target: &SceneTarget) -> bool {
        match target {
            SceneTarget::Character(id) => self.characters.contains(id),
            SceneTarget::Relationship(id) => self.relationships.contains_key(id),
        }
    }

    /// Guard context for a relationship's pair, if both members exist.
    pub fn guard_context(&self, record: &RelationshipRecord) -> Option<GuardContext<'_>> {
        let first = self.characters.get(record.pair().first())?;
        let second = self.characters.get(record.pair().second())?;
        Some(GuardContext::new(first, second))
    }

    pub(crate) fn character_mut(&mut self, id: &CharacterId) -> Option<&mut CharacterState> {
        self.characters.get_mut(id)
    }

    pub(crate) fn relationship_mut(&mut self, id: &RelationshipId) -> Option<&mut RelationshipRecord> {
        self.relationships.get_mut(id)
    }
}

/// A project's full story state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryState {
    snapshot: Snapshot,
    history: StoryHistory,
    /// Last sequence number handed out to a relationship transition.
    sequence: u64,
}

impl StoryState {
    /// A fresh state with empty history.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            history: StoryHistory::new(),
            sequence: 0,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn history(&self) -> &StoryHistory {
        &self.history
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn character(&self, id: &CharacterId) -> Option<&CharacterState> {
        self.snapshot.character(id)
    }

    pub fn relationship(&self, id: &RelationshipId) -> Option<&RelationshipRecord> {
        self.snapshot.relationship(id)
    }

    pub(crate) fn snapshot_mut(&mut self) -> &mut Snapshot {
        &mut self.snapshot
    }

    pub(crate) fn history_mut(&mut self) -> &mut StoryHistory {
        &mut self.history
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Check that every reference in the state resolves and every entity
    /// satisfies its invariants.
    pub fn check_integrity(&self, catalog: &Catalog) -> Result<(), IntegrityError> {
        for character in self.snapshot.characters.iter() {
            character.check_invariants()?;
        }

        for record in self.snapshot.relationships.values() {
            for member in [record.pair().first(), record.pair().second()] {
                if !self.snapshot.characters.contains(member) {
                    return Err(IntegrityError::MissingMember {
                        relationship: record.id().clone(),
                        character: member.clone(),
                    });
                }
            }
            let Some(graph) = catalog.graph(record.relationship_type()) else {
                return Err(IntegrityError::UnknownRelationshipType {
                    relationship: record.id().clone(),
                    relationship_type: record.relationship_type().clone(),
                });
            };
            if !graph.has_stage(record.stage()) {
                return Err(IntegrityError::UndeclaredRelationshipStage {
                    relationship: record.id().clone(),
                    stage: record.stage().to_string(),
                });
            }
        }

        for (position, accepted) in self.history.iter().enumerate() {
            if accepted.id() != SceneId(position as u64 + 1) {
                return Err(IntegrityError::SceneOutOfOrder {
                    scene: accepted.id(),
                });
            }
            if let Some(superseded) = accepted.supersedes() {
                if superseded >= accepted.id() || !self.history.contains(superseded) {
                    return Err(IntegrityError::DanglingAmendment {
                        scene: accepted.id(),
                        superseded,
                    });
                }
            }
            for event in &accepted.scene().events {
                if !self.snapshot.contains(&event.target) {
                    return Err(IntegrityError::DanglingSceneTarget {
                        scene: accepted.id(),
                        target: event.target.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
