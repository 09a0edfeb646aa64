//! Project configuration.
//!
//! A [`ProjectConfig`] declares the pattern vocabulary, relationship-type
//! graphs, characters and relationships of one project. It is validated once
//! by [`ProjectConfig::build`], which produces the immutable [`Catalog`] and
//! the initial [`StoryState`]. Nothing in the catalog changes for the rest
//! of the session.

use crate::character::{
    CharacterError, CharacterId, CharacterState, CharacterStore, ContextValue, StageId,
    UnlockRule, VoiceSignature,
};
use crate::patterns::{PatternDef, PatternError, PatternRegistry, PatternToken};
use crate::relationship::{
    GraphError, PairRole, RelationshipGraph, RelationshipId, RelationshipPair, RelationshipRecord,
    RelationshipType,
};
use crate::state::{IntegrityError, Snapshot, StoryState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default generation timeout.
pub const DEFAULT_GENERATION_TIMEOUT_MS: u64 = 30_000;

/// Errors found while loading or checking a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{context}: {source}")]
    Pattern {
        context: String,
        #[source]
        source: PatternError,
    },

    #[error("Pattern {0} is declared twice")]
    DuplicatePattern(PatternToken),

    #[error("Relationship type '{0}' is declared twice")]
    DuplicateRelationshipType(RelationshipType),

    #[error("Relationship type '{relationship_type}': {source}")]
    Graph {
        relationship_type: RelationshipType,
        #[source]
        source: GraphError,
    },

    #[error("Relationship type '{relationship_type}': no pattern fires trigger '{trigger}'")]
    UnreachableTrigger {
        relationship_type: RelationshipType,
        trigger: String,
    },

    #[error(transparent)]
    Character(#[from] CharacterError),

    #[error("Relationship {0} is declared twice")]
    DuplicateRelationship(RelationshipId),

    #[error("Relationship {relationship} references unknown character {character}")]
    UnknownCharacter {
        relationship: RelationshipId,
        character: CharacterId,
    },

    #[error("Relationship {relationship} has undeclared type '{relationship_type}'")]
    UnknownRelationshipType {
        relationship: RelationshipId,
        relationship_type: RelationshipType,
    },

    #[error("Relationship {0} pairs a character with itself")]
    SelfRelationship(RelationshipId),

    #[error("Relationship {relationship} duplicates the pair of {existing}")]
    DuplicatePair {
        relationship: RelationshipId,
        existing: RelationshipId,
    },

    #[error("Relationship {relationship}: edge {edge} fires '{event}', which {character} does not declare")]
    UndeclaredUnlockEvent {
        relationship: RelationshipId,
        edge: usize,
        character: CharacterId,
        event: String,
    },

    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// An unlock rule as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnlockDecl {
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advance_to: Option<StageId>,
}

impl UnlockDecl {
    pub fn new(patterns: &[&str]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            advance_to: None,
        }
    }

    pub fn advancing_to(mut self, stage: impl Into<StageId>) -> Self {
        self.advance_to = Some(stage.into());
        self
    }
}

/// A character as written in configuration.
///
/// Pattern names are raw strings here; [`ProjectConfig::build`] resolves them
/// against the registry so a typo cannot become a new pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterDecl {
    pub id: CharacterId,
    pub name: String,
    #[serde(default)]
    pub core_essence: String,
    pub stages: Vec<StageId>,
    pub initial_stage: StageId,
    /// The character's full pattern vocabulary.
    pub vocabulary: Vec<String>,
    /// Patterns locked at creation. Everything else in the vocabulary starts available.
    #[serde(default)]
    pub locked: Vec<String>,
    #[serde(default)]
    pub unlock_conditions: BTreeMap<String, UnlockDecl>,
    #[serde(default)]
    pub voice: VoiceSignature,
    #[serde(default)]
    pub context_modifiers: BTreeMap<String, ContextValue>,
}

impl CharacterDecl {
    pub fn new(
        id: impl Into<CharacterId>,
        name: impl Into<String>,
        stages: &[&str],
        initial_stage: impl Into<StageId>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            core_essence: String::new(),
            stages: stages.iter().map(|s| StageId::new(*s)).collect(),
            initial_stage: initial_stage.into(),
            vocabulary: Vec::new(),
            locked: Vec::new(),
            unlock_conditions: BTreeMap::new(),
            voice: VoiceSignature::default(),
            context_modifiers: BTreeMap::new(),
        }
    }

    pub fn with_essence(mut self, essence: impl Into<String>) -> Self {
        self.core_essence = essence.into();
        self
    }

    /// Add patterns to the vocabulary.
    pub fn with_vocabulary(mut self, patterns: &[&str]) -> Self {
        self.vocabulary.extend(patterns.iter().map(|p| p.to_string()));
        self
    }

    /// Mark patterns as locked at creation.
    pub fn with_locked(mut self, patterns: &[&str]) -> Self {
        self.locked.extend(patterns.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_unlock(mut self, event: impl Into<String>, rule: UnlockDecl) -> Self {
        self.unlock_conditions.insert(event.into(), rule);
        self
    }

    pub fn with_voice(mut self, voice: VoiceSignature) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_modifier(mut self, key: impl Into<String>, value: ContextValue) -> Self {
        self.context_modifiers.insert(key.into(), value);
        self
    }

    fn build(&self, registry: &PatternRegistry) -> Result<CharacterState, ConfigError> {
        let context = |what: &str| format!("Character {} {what}", self.id);
        let vocabulary = resolve_all(registry, &self.vocabulary, || context("vocabulary"))?;
        let locked = resolve_all(registry, &self.locked, || context("locked set"))?;

        let mut rules = BTreeMap::new();
        for (event, decl) in &self.unlock_conditions {
            let patterns = resolve_all(registry, &decl.patterns, || {
                context(&format!("unlock '{event}'"))
            })?;
            rules.insert(
                event.clone(),
                UnlockRule {
                    patterns,
                    advance_to: decl.advance_to.clone(),
                },
            );
        }

        let mut character = CharacterState::new(
            self.id.clone(),
            self.name.clone(),
            self.stages.clone(),
            self.initial_stage.clone(),
            vocabulary,
            locked,
            rules,
        )?
        .with_essence(self.core_essence.clone())
        .with_voice(self.voice.clone())?;
        for (key, value) in &self.context_modifiers {
            character = character.with_modifier(key.clone(), value.clone());
        }
        Ok(character)
    }
}

/// A relationship instance as written in configuration.
///
/// For directed types `first` is the source and `second` the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDecl {
    pub id: RelationshipId,
    pub first: CharacterId,
    pub second: CharacterId,
    pub relationship_type: RelationshipType,
}

impl RelationshipDecl {
    pub fn new(
        id: impl Into<RelationshipId>,
        first: impl Into<CharacterId>,
        second: impl Into<CharacterId>,
        relationship_type: impl Into<RelationshipType>,
    ) -> Self {
        Self {
            id: id.into(),
            first: first.into(),
            second: second.into(),
            relationship_type: relationship_type.into(),
        }
    }
}

/// The immutable, validated part of a project: vocabulary and graphs.
#[derive(Debug, Clone)]
pub struct Catalog {
    registry: PatternRegistry,
    graphs: BTreeMap<RelationshipType, RelationshipGraph>,
    strict_unlock_events: bool,
}

impl Catalog {
    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// The graph for a relationship type.
    pub fn graph(&self, relationship_type: &RelationshipType) -> Option<&RelationshipGraph> {
        self.graphs.get(relationship_type)
    }

    pub fn graphs(&self) -> impl Iterator<Item = &RelationshipGraph> {
        self.graphs.values()
    }

    pub fn strict_unlock_events(&self) -> bool {
        self.strict_unlock_events
    }
}

/// Everything needed to start a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name.
    pub name: String,

    /// Treat unlock events a character does not declare as errors.
    #[serde(default)]
    pub strict_unlock_events: bool,

    /// Start the vocabulary from the standard patterns.
    #[serde(default = "default_true")]
    pub standard_patterns: bool,

    /// Patterns declared on top of the standard ones.
    #[serde(default)]
    pub patterns: Vec<PatternDef>,

    #[serde(default)]
    pub relationship_types: Vec<RelationshipGraph>,

    #[serde(default)]
    pub characters: Vec<CharacterDecl>,

    #[serde(default)]
    pub relationships: Vec<RelationshipDecl>,

    /// Generation backend timeout in milliseconds.
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_generation_timeout() -> u64 {
    DEFAULT_GENERATION_TIMEOUT_MS
}

impl ProjectConfig {
    /// Create an empty config using the standard pattern vocabulary.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strict_unlock_events: false,
            standard_patterns: true,
            patterns: Vec::new(),
            relationship_types: Vec::new(),
            characters: Vec::new(),
            relationships: Vec::new(),
            generation_timeout_ms: DEFAULT_GENERATION_TIMEOUT_MS,
        }
    }

    pub fn with_strict_unlock_events(mut self, strict: bool) -> Self {
        self.strict_unlock_events = strict;
        self
    }

    /// Start from an empty vocabulary instead of the standard one.
    pub fn without_standard_patterns(mut self) -> Self {
        self.standard_patterns = false;
        self
    }

    pub fn with_pattern(mut self, pattern: PatternDef) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn with_relationship_type(mut self, graph: RelationshipGraph) -> Self {
        self.relationship_types.push(graph);
        self
    }

    pub fn with_character(mut self, character: CharacterDecl) -> Self {
        self.characters.push(character);
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipDecl) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a JSON config from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        let config = Self::from_json_str(&json)?;
        info!(
            path = %path.as_ref().display(),
            project = %config.name,
            characters = config.characters.len(),
            "config loaded"
        );
        Ok(config)
    }

    /// Validate the vocabulary and graphs.
    pub fn catalog(&self) -> Result<Catalog, ConfigError> {
        let mut registry = if self.standard_patterns {
            PatternRegistry::standard()
        } else {
            PatternRegistry::new()
        };
        for def in &self.patterns {
            if !registry.register(def.clone()) {
                return Err(ConfigError::DuplicatePattern(def.token.clone()));
            }
        }

        let fired: BTreeSet<String> = registry
            .iter()
            .map(|def| def.trigger.clone().unwrap_or_else(|| def.token.default_trigger()))
            .collect();

        let mut graphs = BTreeMap::new();
        for graph in &self.relationship_types {
            let relationship_type = graph.relationship_type.clone();
            graph.validate().map_err(|source| ConfigError::Graph {
                relationship_type: relationship_type.clone(),
                source,
            })?;
            for edge in &graph.edges {
                if let Some(guard) = &edge.guard {
                    for pattern in guard.patterns() {
                        registry.ensure(pattern).map_err(|source| ConfigError::Pattern {
                            context: format!("Relationship type '{relationship_type}' guard"),
                            source,
                        })?;
                    }
                }
                if !fired.contains(&edge.trigger) {
                    return Err(ConfigError::UnreachableTrigger {
                        relationship_type,
                        trigger: edge.trigger.clone(),
                    });
                }
            }
            if graphs.insert(relationship_type.clone(), graph.clone()).is_some() {
                return Err(ConfigError::DuplicateRelationshipType(relationship_type));
            }
        }

        Ok(Catalog {
            registry,
            graphs,
            strict_unlock_events: self.strict_unlock_events,
        })
    }

    /// Validate everything and produce the catalog plus the initial state.
    pub fn build(&self) -> Result<(Catalog, StoryState), ConfigError> {
        let catalog = self.catalog()?;

        let mut characters = CharacterStore::new();
        for decl in &self.characters {
            characters.insert(decl.build(catalog.registry())?)?;
        }

        let mut records: BTreeMap<RelationshipId, RelationshipRecord> = BTreeMap::new();
        for decl in &self.relationships {
            let record = self.build_relationship(&catalog, &characters, decl)?;
            if let Some(existing) = records.values().find(|r| {
                r.relationship_type() == record.relationship_type() && r.pair() == record.pair()
            }) {
                return Err(ConfigError::DuplicatePair {
                    relationship: decl.id.clone(),
                    existing: existing.id().clone(),
                });
            }
            if records.insert(decl.id.clone(), record).is_some() {
                return Err(ConfigError::DuplicateRelationship(decl.id.clone()));
            }
        }

        let state = StoryState::new(Snapshot::new(characters, records.into_values()));
        state.check_integrity(&catalog)?;
        info!(
            project = %self.name,
            patterns = catalog.registry().len(),
            relationship_types = catalog.graphs.len(),
            characters = self.characters.len(),
            relationships = self.relationships.len(),
            "project config built"
        );
        Ok((catalog, state))
    }

    fn build_relationship(
        &self,
        catalog: &Catalog,
        characters: &CharacterStore,
        decl: &RelationshipDecl,
    ) -> Result<RelationshipRecord, ConfigError> {
        let graph = catalog.graph(&decl.relationship_type).ok_or_else(|| {
            ConfigError::UnknownRelationshipType {
                relationship: decl.id.clone(),
                relationship_type: decl.relationship_type.clone(),
            }
        })?;
        for member in [&decl.first, &decl.second] {
            if !characters.contains(member) {
                return Err(ConfigError::UnknownCharacter {
                    relationship: decl.id.clone(),
                    character: member.clone(),
                });
            }
        }
        if decl.first == decl.second {
            return Err(ConfigError::SelfRelationship(decl.id.clone()));
        }

        let pair = RelationshipPair::new(decl.first.clone(), decl.second.clone(), graph.directionality);
        for (index, edge) in graph.edges.iter().enumerate() {
            for directive in &edge.unlocks {
                for role in directive.recipients.roles() {
                    let member = match role {
                        PairRole::First => pair.first(),
                        PairRole::Second => pair.second(),
                    };
                    let declares = characters
                        .get(member)
                        .is_some_and(|c| c.progression_locks().declares(&directive.event));
                    if declares {
                        continue;
                    }
                    if catalog.strict_unlock_events {
                        return Err(ConfigError::UndeclaredUnlockEvent {
                            relationship: decl.id.clone(),
                            edge: index,
                            character: member.clone(),
                            event: directive.event.clone(),
                        });
                    }
                    warn!(
                        relationship = %decl.id,
                        edge = index,
                        character = %member,
                        event = %directive.event,
                        "unlock event is not declared by its recipient and will be ignored"
                    );
                }
            }
        }

        Ok(RelationshipRecord::new(
            decl.id.clone(),
            decl.relationship_type.clone(),
            pair,
            graph.initial_stage.clone(),
        ))
    }
}

fn resolve_all(
    registry: &PatternRegistry,
    raw: &[String],
    context: impl Fn() -> String,
) -> Result<BTreeSet<PatternToken>, ConfigError> {
    raw.iter()
        .map(|p| {
            registry.resolve(p).map_err(|source| ConfigError::Pattern {
                context: context(),
                source,
            })
        })
        .collect()
}
