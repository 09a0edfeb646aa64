//! Progression lock engine.
//!
//! Decides which patterns a character may exhibit and processes unlock
//! events. Unlocking is idempotent: an event that already fired releases
//! nothing the second time.

use crate::character::{CharacterId, CharacterState, StageId};
use crate::patterns::PatternToken;
use crate::relationship::RelationshipId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// Errors from the progression engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressionError {
    /// Only raised in strict mode.
    #[error("Unknown unlock event '{event}' for character {character}")]
    UnknownEvent { character: CharacterId, event: String },
}

/// What caused an unlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnlockSource {
    /// Applied directly through the project.
    Direct,
    /// Fired by a relationship transition.
    Relationship {
        relationship: RelationshipId,
        trigger: String,
    },
}

/// Notice that an unlock event changed a character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockNotification {
    pub character: CharacterId,
    pub event: String,
    pub unlocked: BTreeSet<PatternToken>,
    /// `(from, to)` if the event moved the character to a new stage.
    pub stage_change: Option<(StageId, StageId)>,
    pub source: UnlockSource,
}

/// The full result of applying an unlock event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlockOutcome {
    pub unlocked: BTreeSet<PatternToken>,
    pub stage_change: Option<(StageId, StageId)>,
}

impl UnlockOutcome {
    /// Whether the event changed anything.
    pub fn is_empty(&self) -> bool {
        self.unlocked.is_empty() && self.stage_change.is_none()
    }

    pub fn into_notification(
        self,
        character: CharacterId,
        event: impl Into<String>,
        source: UnlockSource,
    ) -> UnlockNotification {
        UnlockNotification {
            character,
            event: event.into(),
            unlocked: self.unlocked,
            stage_change: self.stage_change,
            source,
        }
    }
}

/// Evaluates pattern availability and applies unlock events.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressionEngine {
    strict: bool,
}

impl ProgressionEngine {
    /// Create an engine. In strict mode, unlock events a character does not
    /// declare are errors instead of no-ops.
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Exactly the character's available patterns.
    pub fn patterns_available<'a>(&self, character: &'a CharacterState) -> &'a BTreeSet<PatternToken> {
        character.progression_locks().available_patterns()
    }

    pub fn is_available(&self, character: &CharacterState, pattern: &PatternToken) -> bool {
        self.patterns_available(character).contains(pattern)
    }

    /// What `event` would do to `character`, without changing it.
    pub fn preview_unlock(
        &self,
        character: &CharacterState,
        event: &str,
    ) -> Result<UnlockOutcome, ProgressionError> {
        let locks = character.progression_locks();
        let Some(rule) = locks.unlock_conditions().get(event) else {
            return self.undeclared(character, event);
        };
        if locks.is_consumed(event) {
            return Ok(UnlockOutcome::default());
        }
        let stage_change = rule
            .advance_to
            .as_ref()
            .filter(|to| *to != character.current_stage())
            .map(|to| (character.current_stage().clone(), to.clone()));
        Ok(UnlockOutcome {
            unlocked: locks.releasable(event),
            stage_change,
        })
    }

    /// Apply `event` to `character` and return the full outcome.
    pub fn apply_unlock(
        &self,
        character: &mut CharacterState,
        event: &str,
    ) -> Result<UnlockOutcome, ProgressionError> {
        let outcome = self.preview_unlock(character, event)?;
        character.progression_locks_mut().release(event);
        if let Some((_, to)) = &outcome.stage_change {
            character.set_stage(to.clone());
        }
        if !outcome.is_empty() {
            debug!(
                character = %character.id(),
                event,
                unlocked = outcome.unlocked.len(),
                stage = %character.current_stage(),
                "unlock event applied"
            );
        }
        Ok(outcome)
    }

    /// Apply `event` to `character` and return the newly unlocked patterns.
    pub fn apply_unlock_event(
        &self,
        character: &mut CharacterState,
        event: &str,
    ) -> Result<BTreeSet<PatternToken>, ProgressionError> {
        self.apply_unlock(character, event).map(|o| o.unlocked)
    }

    fn undeclared(
        &self,
        character: &CharacterState,
        event: &str,
    ) -> Result<UnlockOutcome, ProgressionError> {
        if self.strict {
            Err(ProgressionError::UnknownEvent {
                character: character.id().clone(),
                event: event.to_string(),
            })
        } else {
            debug!(character = %character.id(), event, "ignoring undeclared unlock event");
            Ok(UnlockOutcome::default())
        }
    }
}
