//! Scenes: ordered pattern-token events proposed for the story.

use crate::character::CharacterId;
use crate::patterns::PatternToken;
use crate::relationship::RelationshipId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of an accepted scene: its 1-based position in story history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SceneId(pub u64);

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scene-{}", self.0)
    }
}

/// What a scene event is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SceneTarget {
    Character(CharacterId),
    Relationship(RelationshipId),
}

impl fmt::Display for SceneTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneTarget::Character(id) => write!(f, "character {id}"),
            SceneTarget::Relationship(id) => write!(f, "relationship {id}"),
        }
    }
}

/// A line of dialogue tagged against the speaker's voice signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogueLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// A phrase the line claims as one of the speaker's signature phrases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_phrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f32>,
}

impl DialogueLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_emotion(mut self, emotion: impl Into<String>, intensity: f32) -> Self {
        self.emotion = Some(emotion.into());
        self.intensity = Some(intensity);
        self
    }

    pub fn with_signature_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.signature_phrase = Some(phrase.into());
        self
    }
}

/// Optional parameters of a scene event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<DialogueLine>,
    /// Free-form notes passed through to generation untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub notes: BTreeMap<String, String>,
}

impl EventParams {
    pub fn is_empty(&self) -> bool {
        self.dialogue.is_none() && self.notes.is_empty()
    }
}

/// One `(target, pattern, params)` entry of a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEvent {
    pub target: SceneTarget,
    pub pattern: PatternToken,
    #[serde(default, skip_serializing_if = "EventParams::is_empty")]
    pub params: EventParams,
}

impl SceneEvent {
    pub fn new(target: SceneTarget, pattern: PatternToken) -> Self {
        Self {
            target,
            pattern,
            params: EventParams::default(),
        }
    }

    /// An event where a character exhibits a pattern.
    pub fn character(id: impl Into<CharacterId>, pattern: PatternToken) -> Self {
        Self::new(SceneTarget::Character(id.into()), pattern)
    }

    /// An event that drives a relationship.
    pub fn relationship(id: impl Into<RelationshipId>, pattern: PatternToken) -> Self {
        Self::new(SceneTarget::Relationship(id.into()), pattern)
    }

    pub fn with_dialogue(mut self, dialogue: DialogueLine) -> Self {
        self.params.dialogue = Some(dialogue);
        self
    }

    pub fn with_note(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.notes.insert(key.into(), value.into());
        self
    }
}

/// An ordered sequence of events proposed for story history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub events: Vec<SceneEvent>,
    /// An earlier accepted scene this one corrects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<SceneId>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scene that amends an earlier accepted scene.
    pub fn amending(prior: SceneId) -> Self {
        Self {
            supersedes: Some(prior),
            ..Self::default()
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_event(mut self, event: SceneEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn push(&mut self, event: SceneEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether any event targets `target`.
    pub fn involves(&self, target: &SceneTarget) -> bool {
        self.events.iter().any(|e| &e.target == target)
    }
}
