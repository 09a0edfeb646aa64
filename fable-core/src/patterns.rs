//! Pattern registry.
//!
//! Patterns are the closed vocabulary of symbolic tokens (`CS_RESIST`,
//! `RS_TRUST_BUILDING`, ...) that describe what a character does or what
//! happens between two characters in a scene. The registry is pure lookup:
//! it is built once per project and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from pattern parsing and lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("Unrecognized pattern token: {0}")]
    UnrecognizedPattern(String),

    #[error("Malformed pattern token '{0}': expected UPPER_SNAKE_CASE")]
    MalformedToken(String),
}

/// A symbolic pattern identifier such as `CS_RESIST`.
///
/// Construction only checks the token's shape. Membership in a project's
/// vocabulary is checked by [`PatternRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatternToken(String);

impl PatternToken {
    /// Parse a token, checking that it is UPPER_SNAKE_CASE.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let mut chars = raw.chars();
        let starts_ok = chars.next().is_some_and(|c| c.is_ascii_uppercase());
        let rest_ok = chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
        if starts_ok && rest_ok && !raw.ends_with('_') {
            Ok(Self(raw.to_string()))
        } else {
            Err(PatternError::MalformedToken(raw.to_string()))
        }
    }

    /// The token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The token lowercased, used as the default relationship trigger.
    pub fn default_trigger(&self) -> String {
        self.0.to_lowercase()
    }
}

impl TryFrom<String> for PatternToken {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PatternToken> for String {
    fn from(token: PatternToken) -> Self {
        token.0
    }
}

impl FromStr for PatternToken {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PatternToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a pattern describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// A character behavior.
    Behavior,
    /// A dialogue mode.
    Dialogue,
    /// An interaction between two characters that drives a relationship.
    Interaction,
    /// A scene-composition unit (flashback, time skip, ...).
    Composition,
}

impl PatternKind {
    /// Get the display name.
    pub fn name(&self) -> &'static str {
        match self {
            PatternKind::Behavior => "behavior",
            PatternKind::Dialogue => "dialogue",
            PatternKind::Interaction => "interaction",
            PatternKind::Composition => "composition",
        }
    }
}

/// A declared pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDef {
    pub token: PatternToken,
    pub kind: PatternKind,
    /// Human-readable intended action, handed to the generation backend.
    pub description: String,
    /// Relationship trigger fired when this pattern targets a relationship.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

impl PatternDef {
    /// Create a new pattern definition.
    ///
    /// Returns an error if the token is malformed.
    pub fn new(
        token: &str,
        kind: PatternKind,
        description: impl Into<String>,
    ) -> Result<Self, PatternError> {
        Ok(Self {
            token: PatternToken::parse(token)?,
            kind,
            description: description.into(),
            trigger: None,
        })
    }

    /// Set the relationship trigger this pattern fires.
    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }
}

lazy_static::lazy_static! {
    /// A general-purpose starter vocabulary.
    pub static ref STANDARD_PATTERNS: Vec<PatternDef> = vec![
        standard("CS_RESIST", PatternKind::Behavior, "resists the change being asked of them", None),
        standard("CS_ACCEPT", PatternKind::Behavior, "accepts the change being asked of them", None),
        standard("CS_DEFLECT", PatternKind::Behavior, "deflects with humor or misdirection", None),
        standard("CS_WITHDRAW", PatternKind::Behavior, "withdraws from the situation", None),
        standard("DL_BITTER_QUIP", PatternKind::Dialogue, "makes a bitter, self-deprecating remark", None),
        standard("DL_CONFESSION", PatternKind::Dialogue, "confesses something long held back", None),
        standard("DL_INTERROGATE", PatternKind::Dialogue, "presses the other person with questions", None),
        standard("RS_TRUST_BUILDING", PatternKind::Interaction, "shares a moment that builds trust", Some("trust_building_event")),
        standard("RS_CONFLICT", PatternKind::Interaction, "clashes openly", Some("conflict_event")),
        standard("RS_RECONCILE", PatternKind::Interaction, "reconciles after a conflict", Some("reconciliation_event")),
        standard("RS_BETRAYAL", PatternKind::Interaction, "betrays the other's confidence", Some("betrayal_event")),
        standard("SC_FLASHBACK", PatternKind::Composition, "cuts to a flashback", None),
        standard("SC_TIME_SKIP", PatternKind::Composition, "skips forward in time", None),
    ];
}

fn standard(token: &str, kind: PatternKind, description: &str, trigger: Option<&str>) -> PatternDef {
    PatternDef {
        token: PatternToken(token.to_string()),
        kind,
        description: description.to_string(),
        trigger: trigger.map(str::to_string),
    }
}

/// The closed pattern vocabulary of a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternRegistry {
    patterns: BTreeMap<PatternToken, PatternDef>,
}

impl PatternRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding [`STANDARD_PATTERNS`].
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for def in STANDARD_PATTERNS.iter() {
            registry.register(def.clone());
        }
        registry
    }

    /// Register a pattern. Returns `false` if the token was already present,
    /// in which case the existing definition is kept.
    pub fn register(&mut self, def: PatternDef) -> bool {
        if self.patterns.contains_key(&def.token) {
            return false;
        }
        self.patterns.insert(def.token.clone(), def);
        true
    }

    /// Look up a pattern by its raw text.
    pub fn lookup(&self, raw: &str) -> Option<&PatternDef> {
        PatternToken::parse(raw)
            .ok()
            .and_then(|token| self.patterns.get(&token))
    }

    /// Get a pattern definition by token.
    pub fn get(&self, token: &PatternToken) -> Option<&PatternDef> {
        self.patterns.get(token)
    }

    /// Parse raw text into a token that is known to this registry.
    pub fn resolve(&self, raw: &str) -> Result<PatternToken, PatternError> {
        let token = PatternToken::parse(raw)?;
        if self.patterns.contains_key(&token) {
            Ok(token)
        } else {
            Err(PatternError::UnrecognizedPattern(token.0))
        }
    }

    /// Check that a token belongs to the vocabulary.
    pub fn ensure(&self, token: &PatternToken) -> Result<(), PatternError> {
        if self.contains(token) {
            Ok(())
        } else {
            Err(PatternError::UnrecognizedPattern(token.0.clone()))
        }
    }

    /// Whether the token belongs to the vocabulary.
    pub fn contains(&self, token: &PatternToken) -> bool {
        self.patterns.contains_key(token)
    }

    /// The relationship trigger for a token: the declared trigger, or the
    /// token lowercased.
    pub fn trigger_for(&self, token: &PatternToken) -> Option<String> {
        self.patterns.get(token).map(|def| {
            def.trigger
                .clone()
                .unwrap_or_else(|| token.default_trigger())
        })
    }

    /// Find patterns whose description matches `action` (case-insensitive,
    /// surrounding whitespace ignored).
    pub fn find_by_description(&self, action: &str) -> Vec<&PatternDef> {
        let wanted = action.trim().to_lowercase();
        self.patterns
            .values()
            .filter(|def| def.description.to_lowercase() == wanted)
            .collect()
    }

    /// All patterns of a kind, in token order.
    pub fn of_kind(&self, kind: PatternKind) -> Vec<&PatternDef> {
        self.patterns.values().filter(|d| d.kind == kind).collect()
    }

    /// Iterate over all definitions in token order.
    pub fn iter(&self) -> impl Iterator<Item = &PatternDef> {
        self.patterns.values()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
