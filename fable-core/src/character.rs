//! Character state store.
//!
//! Holds each character's identity, voice, current progression stage,
//! progression locks and context modifiers. Everything here is plain data
//! with checked construction; lock and stage mutation is crate-private and
//! only reached through the progression engine during a commit.

use crate::patterns::PatternToken;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Errors from constructing or checking a character.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CharacterError {
    #[error("Character {character} declares no stages")]
    EmptyStageSet { character: CharacterId },

    #[error("Character {character}: stage '{stage}' is not in its stage set")]
    UndefinedStage { character: CharacterId, stage: StageId },

    #[error("Character {character}: pattern {pattern} is both locked and available")]
    LockOverlap {
        character: CharacterId,
        pattern: PatternToken,
    },

    #[error("Character {character}: pattern {pattern} is outside its vocabulary")]
    OutsideVocabulary {
        character: CharacterId,
        pattern: PatternToken,
    },

    #[error("Character {character}: pattern {pattern} is in the vocabulary but neither locked nor available")]
    Unpartitioned {
        character: CharacterId,
        pattern: PatternToken,
    },

    #[error("Character {character}: emotion '{emotion}' has intensity {intensity} outside [0, 1]")]
    IntensityOutOfRange {
        character: CharacterId,
        emotion: String,
        intensity: f32,
    },

    #[error("Duplicate character id: {0}")]
    DuplicateId(CharacterId),
}

/// Unique, immutable identifier of a character (e.g. `rick_v1.0.0`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CharacterId(String);

impl CharacterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CharacterId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A named point in a character's or relationship's progression graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageId(String);

impl StageId {
    pub fn new(stage: impl Into<String>) -> Self {
        Self(stage.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A context modifier value. Opaque to the engine apart from guard checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Number(f64),
    Text(String),
}

impl ContextValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ContextValue::Number(n) => Some(*n),
            ContextValue::Text(_) => None,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Number(n) => write!(f, "{n}"),
            ContextValue::Text(t) => f.write_str(t),
        }
    }
}

/// Parse a composed style descriptor such as `"bitter_humor + metaphor_heavy"`
/// into its set of tags.
pub fn parse_style_tags(descriptor: &str) -> BTreeSet<String> {
    descriptor
        .split('+')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// How a character sounds, inside and out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceSignature {
    #[serde(default)]
    pub internal_monologue: BTreeSet<String>,
    #[serde(default)]
    pub external_dialogue: BTreeSet<String>,
    /// Ordered by weight: earlier phrases are used more often.
    #[serde(default)]
    pub signature_phrases: Vec<String>,
    /// Emotion name to the highest intensity the character expresses, in [0, 1].
    #[serde(default)]
    pub emotional_range: BTreeMap<String, f32>,
}

impl VoiceSignature {
    /// Create a voice from two composed descriptors.
    pub fn new(internal_monologue: &str, external_dialogue: &str) -> Self {
        Self {
            internal_monologue: parse_style_tags(internal_monologue),
            external_dialogue: parse_style_tags(external_dialogue),
            signature_phrases: Vec::new(),
            emotional_range: BTreeMap::new(),
        }
    }

    /// Append a signature phrase (lower weight than those before it).
    pub fn with_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.signature_phrases.push(phrase.into());
        self
    }

    /// Declare an emotion's intensity ceiling. Range is checked by
    /// [`VoiceSignature::check_range`].
    pub fn with_emotion(mut self, emotion: impl Into<String>, intensity: f32) -> Self {
        self.emotional_range.insert(emotion.into(), intensity);
        self
    }

    /// The declared ceiling for an emotion.
    pub fn intensity_ceiling(&self, emotion: &str) -> Option<f32> {
        self.emotional_range.get(emotion).copied()
    }

    /// Weight of a signature phrase: 1.0 for the first, decreasing with position.
    pub fn phrase_weight(&self, phrase: &str) -> Option<f32> {
        self.signature_phrases
            .iter()
            .position(|p| p == phrase)
            .map(|i| 1.0 / (i as f32 + 1.0))
    }

    /// All style tags, monologue and dialogue combined.
    pub fn style_tags(&self) -> BTreeSet<String> {
        self.internal_monologue
            .union(&self.external_dialogue)
            .cloned()
            .collect()
    }

    fn check_range(&self, character: &CharacterId) -> Result<(), CharacterError> {
        for (emotion, &intensity) in &self.emotional_range {
            if !(0.0..=1.0).contains(&intensity) {
                return Err(CharacterError::IntensityOutOfRange {
                    character: character.clone(),
                    emotion: emotion.clone(),
                    intensity,
                });
            }
        }
        Ok(())
    }
}

/// What an unlock event does for one character.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnlockRule {
    /// Patterns moved from locked to available.
    pub patterns: BTreeSet<PatternToken>,
    /// Stage the character moves to when the event fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advance_to: Option<StageId>,
}

impl UnlockRule {
    pub fn new(patterns: impl IntoIterator<Item = PatternToken>) -> Self {
        Self {
            patterns: patterns.into_iter().collect(),
            advance_to: None,
        }
    }

    pub fn advancing_to(mut self, stage: impl Into<StageId>) -> Self {
        self.advance_to = Some(stage.into());
        self
    }
}

/// Which patterns a character may exhibit right now, and what unlocks the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressionLocks {
    locked_patterns: BTreeSet<PatternToken>,
    available_patterns: BTreeSet<PatternToken>,
    unlock_conditions: BTreeMap<String, UnlockRule>,
    /// Events that already fired. Re-firing one is a no-op.
    #[serde(default)]
    consumed_events: BTreeSet<String>,
}

impl ProgressionLocks {
    /// Split `vocabulary` into locked and available, with `locked` forbidden.
    pub fn new(
        vocabulary: &BTreeSet<PatternToken>,
        locked: BTreeSet<PatternToken>,
        unlock_conditions: BTreeMap<String, UnlockRule>,
    ) -> Self {
        let available_patterns = vocabulary.difference(&locked).cloned().collect();
        Self {
            locked_patterns: locked,
            available_patterns,
            unlock_conditions,
            consumed_events: BTreeSet::new(),
        }
    }

    pub fn locked_patterns(&self) -> &BTreeSet<PatternToken> {
        &self.locked_patterns
    }

    pub fn available_patterns(&self) -> &BTreeSet<PatternToken> {
        &self.available_patterns
    }

    pub fn unlock_conditions(&self) -> &BTreeMap<String, UnlockRule> {
        &self.unlock_conditions
    }

    pub fn consumed_events(&self) -> &BTreeSet<String> {
        &self.consumed_events
    }

    pub fn is_consumed(&self, event: &str) -> bool {
        self.consumed_events.contains(event)
    }

    pub fn declares(&self, event: &str) -> bool {
        self.unlock_conditions.contains_key(event)
    }

    /// Locked patterns that `event` would release, without releasing them.
    pub fn releasable(&self, event: &str) -> BTreeSet<PatternToken> {
        if self.is_consumed(event) {
            return BTreeSet::new();
        }
        self.unlock_conditions
            .get(event)
            .map(|rule| {
                rule.patterns
                    .intersection(&self.locked_patterns)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Release the patterns mapped to `event` and mark it consumed.
    pub(crate) fn release(&mut self, event: &str) -> BTreeSet<PatternToken> {
        let released = self.releasable(event);
        if self.declares(event) {
            self.consumed_events.insert(event.to_string());
        }
        for pattern in &released {
            self.locked_patterns.remove(pattern);
            self.available_patterns.insert(pattern.clone());
        }
        released
    }
}

/// A character's full state at a point in the story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    character_id: CharacterId,
    pub name: String,
    /// Advisory descriptive tag.
    #[serde(default)]
    pub core_essence: String,
    stages: Vec<StageId>,
    current_stage: StageId,
    pub voice_signature: VoiceSignature,
    progression_locks: ProgressionLocks,
    #[serde(default)]
    pub context_modifiers: BTreeMap<String, ContextValue>,
    vocabulary: BTreeSet<PatternToken>,
}

impl CharacterState {
    /// Create a character, checking every invariant.
    pub fn new(
        character_id: CharacterId,
        name: impl Into<String>,
        stages: Vec<StageId>,
        initial_stage: StageId,
        vocabulary: BTreeSet<PatternToken>,
        locked: BTreeSet<PatternToken>,
        unlock_conditions: BTreeMap<String, UnlockRule>,
    ) -> Result<Self, CharacterError> {
        let progression_locks = ProgressionLocks::new(&vocabulary, locked, unlock_conditions);
        let character = Self {
            character_id,
            name: name.into(),
            core_essence: String::new(),
            stages,
            current_stage: initial_stage,
            voice_signature: VoiceSignature::default(),
            progression_locks,
            context_modifiers: BTreeMap::new(),
            vocabulary,
        };
        character.check_invariants()?;
        Ok(character)
    }

    pub fn with_essence(mut self, essence: impl Into<String>) -> Self {
        self.core_essence = essence.into();
        self
    }

    /// Set the voice. The emotional range must lie in [0, 1].
    pub fn with_voice(mut self, voice: VoiceSignature) -> Result<Self, CharacterError> {
        voice.check_range(&self.character_id)?;
        self.voice_signature = voice;
        Ok(self)
    }

    pub fn with_modifier(mut self, key: impl Into<String>, value: ContextValue) -> Self {
        self.context_modifiers.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> &CharacterId {
        &self.character_id
    }

    pub fn stages(&self) -> &[StageId] {
        &self.stages
    }

    pub fn current_stage(&self) -> &StageId {
        &self.current_stage
    }

    pub fn has_stage(&self, stage: &StageId) -> bool {
        self.stages.contains(stage)
    }

    pub fn progression_locks(&self) -> &ProgressionLocks {
        &self.progression_locks
    }

    pub fn vocabulary(&self) -> &BTreeSet<PatternToken> {
        &self.vocabulary
    }

    pub fn modifier(&self, key: &str) -> Option<&ContextValue> {
        self.context_modifiers.get(key)
    }

    pub(crate) fn progression_locks_mut(&mut self) -> &mut ProgressionLocks {
        &mut self.progression_locks
    }

    pub(crate) fn set_stage(&mut self, stage: StageId) {
        self.current_stage = stage;
    }

    /// Check the stage and lock-partition invariants.
    pub fn check_invariants(&self) -> Result<(), CharacterError> {
        let id = &self.character_id;
        if self.stages.is_empty() {
            return Err(CharacterError::EmptyStageSet { character: id.clone() });
        }
        if !self.has_stage(&self.current_stage) {
            return Err(CharacterError::UndefinedStage {
                character: id.clone(),
                stage: self.current_stage.clone(),
            });
        }
        for rule in self.progression_locks.unlock_conditions.values() {
            if let Some(stage) = &rule.advance_to {
                if !self.has_stage(stage) {
                    return Err(CharacterError::UndefinedStage {
                        character: id.clone(),
                        stage: stage.clone(),
                    });
                }
            }
            if let Some(pattern) = rule.patterns.iter().find(|p| !self.vocabulary.contains(*p)) {
                return Err(CharacterError::OutsideVocabulary {
                    character: id.clone(),
                    pattern: pattern.clone(),
                });
            }
        }

        let locks = &self.progression_locks;
        if let Some(pattern) = locks
            .locked_patterns
            .intersection(&locks.available_patterns)
            .next()
        {
            return Err(CharacterError::LockOverlap {
                character: id.clone(),
                pattern: pattern.clone(),
            });
        }
        if let Some(pattern) = locks
            .locked_patterns
            .union(&locks.available_patterns)
            .find(|p| !self.vocabulary.contains(*p))
        {
            return Err(CharacterError::OutsideVocabulary {
                character: id.clone(),
                pattern: pattern.clone(),
            });
        }
        if let Some(pattern) = self.vocabulary.iter().find(|p| {
            !locks.locked_patterns.contains(*p) && !locks.available_patterns.contains(*p)
        }) {
            return Err(CharacterError::Unpartitioned {
                character: id.clone(),
                pattern: pattern.clone(),
            });
        }
        self.voice_signature.check_range(id)
    }
}

/// All characters of a project, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterStore {
    characters: BTreeMap<CharacterId, CharacterState>,
}

impl CharacterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a character. Ids are unique and never reassigned.
    pub fn insert(&mut self, character: CharacterState) -> Result<(), CharacterError> {
        if self.characters.contains_key(character.id()) {
            return Err(CharacterError::DuplicateId(character.id().clone()));
        }
        self.characters.insert(character.id().clone(), character);
        Ok(())
    }

    pub fn get(&self, id: &CharacterId) -> Option<&CharacterState> {
        self.characters.get(id)
    }

    pub fn contains(&self, id: &CharacterId) -> bool {
        self.characters.contains_key(id)
    }

    /// Find a character by display name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Vec<&CharacterState> {
        let lower = name.trim().to_lowercase();
        self.characters
            .values()
            .filter(|c| c.name.to_lowercase() == lower)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CharacterState> {
        self.characters.values()
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub(crate) fn get_mut(&mut self, id: &CharacterId) -> Option<&mut CharacterState> {
        self.characters.get_mut(id)
    }
}
