//! Relationship instances and their transition history.

use crate::character::{CharacterId, StageId};
use crate::scene::SceneId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a relationship instance (e.g. `rick-candice`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipId(String);

impl RelationshipId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RelationshipId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Name of a relationship type (e.g. `mentor-mentee`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipType(String);

impl RelationshipType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RelationshipType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Whether a relationship has one shared stage or distinct perspectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directionality {
    /// One shared stage; `(a, b)` and `(b, a)` are the same pair.
    Symmetric,
    /// Ordered `(source, target)`; the reverse perspective is a separate record.
    Directed,
}

/// The two characters in a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipPair {
    first: CharacterId,
    second: CharacterId,
    directionality: Directionality,
}

impl RelationshipPair {
    /// Create a pair. Symmetric pairs are stored in sorted order.
    pub fn new(a: CharacterId, b: CharacterId, directionality: Directionality) -> Self {
        let (first, second) = match directionality {
            Directionality::Symmetric if b < a => (b, a),
            _ => (a, b),
        };
        Self {
            first,
            second,
            directionality,
        }
    }

    pub fn first(&self) -> &CharacterId {
        &self.first
    }

    pub fn second(&self) -> &CharacterId {
        &self.second
    }

    pub fn directionality(&self) -> Directionality {
        self.directionality
    }

    /// Whether this pair is `(a, b)`, respecting directionality.
    pub fn matches(&self, a: &CharacterId, b: &CharacterId) -> bool {
        match self.directionality {
            Directionality::Directed => &self.first == a && &self.second == b,
            Directionality::Symmetric => {
                (&self.first == a && &self.second == b) || (&self.first == b && &self.second == a)
            }
        }
    }
}

/// One transition a relationship took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Project-wide sequence number.
    pub sequence: u64,
    pub from: StageId,
    pub trigger: String,
    pub to: StageId,
    /// Index of the edge taken, in the graph's declaration order.
    pub edge_index: usize,
    /// Scene that caused the transition, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<SceneId>,
}

/// A relationship instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    id: RelationshipId,
    relationship_type: RelationshipType,
    pair: RelationshipPair,
    stage: StageId,
    history: Vec<TransitionRecord>,
}

impl RelationshipRecord {
    /// Create a relationship at its type's initial stage.
    pub fn new(
        id: RelationshipId,
        relationship_type: RelationshipType,
        pair: RelationshipPair,
        initial_stage: StageId,
    ) -> Self {
        Self {
            id,
            relationship_type,
            pair,
            stage: initial_stage,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> &RelationshipId {
        &self.id
    }

    pub fn relationship_type(&self) -> &RelationshipType {
        &self.relationship_type
    }

    pub fn pair(&self) -> &RelationshipPair {
        &self.pair
    }

    pub fn stage(&self) -> &StageId {
        &self.stage
    }

    /// Past transitions, oldest first.
    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Check if this relationship involves a specific character.
    pub fn involves(&self, character: &CharacterId) -> bool {
        self.pair.first() == character || self.pair.second() == character
    }

    /// Get the other character in the relationship.
    pub fn other(&self, character: &CharacterId) -> Option<&CharacterId> {
        if self.pair.first() == character {
            Some(self.pair.second())
        } else if self.pair.second() == character {
            Some(self.pair.first())
        } else {
            None
        }
    }

    /// Append a transition and move to its target stage.
    pub(crate) fn record_transition(&mut self, transition: TransitionRecord) {
        self.stage = transition.to.clone();
        self.history.push(transition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_pair_is_normalized() {
        let a = RelationshipPair::new("zed".into(), "amy".into(), Directionality::Symmetric);
        assert_eq!(a.first().as_str(), "amy");
        assert!(a.matches(&"zed".into(), &"amy".into()));
        assert!(a.matches(&"amy".into(), &"zed".into()));
    }

    #[test]
    fn test_directed_pair_keeps_order() {
        let pair = RelationshipPair::new("zed".into(), "amy".into(), Directionality::Directed);
        assert_eq!(pair.first().as_str(), "zed");
        assert!(pair.matches(&"zed".into(), &"amy".into()));
        assert!(!pair.matches(&"amy".into(), &"zed".into()));
    }

    #[test]
    fn test_record_transition_appends() {
        let pair = RelationshipPair::new("a".into(), "b".into(), Directionality::Directed);
        let mut record =
            RelationshipRecord::new("a-b".into(), "rivals".into(), pair, "cold".into());
        assert!(record.involves(&"a".into()));
        assert_eq!(record.other(&"a".into()).map(|c| c.as_str()), Some("b"));
        assert_eq!(record.other(&"c".into()), None);

        record.record_transition(TransitionRecord {
            sequence: 1,
            from: "cold".into(),
            trigger: "thaw".into(),
            to: "warm".into(),
            edge_index: 0,
            scene: None,
        });
        assert_eq!(record.stage().as_str(), "warm");
        assert_eq!(record.history().len(), 1);
        assert_eq!(record.history()[0].from.as_str(), "cold");
    }
}
