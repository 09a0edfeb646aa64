//! Scene token codec.
//!
//! Converts between compact pattern-token scenes and the descriptive form a
//! generation backend works with:
//! - [`SceneCodec::expand`] is deterministic: the same scene and snapshot
//!   always produce the same [`ExpandedScene`] and prompt text
//! - [`SceneCodec::compress`] is a lossy best-effort inverse for drafted
//!   scenes; anything it cannot place unambiguously is reported as an
//!   [`Ambiguity`] instead of guessed
//! - [`SceneCodec::encode_compact`] / [`SceneCodec::decode_compact`] handle
//!   the line-oriented wire form, one event per line:
//!
//! ```text
//! # title=The%20garage
//! @c:rick_v1.0.0 CS_RESIST text=No. emotion=anger intensity=0.4
//! @r:rick-candice RS_TRUST_BUILDING
//! ```

use crate::character::{CharacterId, CharacterState, ContextValue, StageId, VoiceSignature};
use crate::config::Catalog;
use crate::patterns::{PatternDef, PatternError, PatternKind, PatternToken};
use crate::relationship::{RelationshipId, RelationshipType};
use crate::scene::{DialogueLine, EventParams, Scene, SceneEvent, SceneId, SceneTarget};
use crate::state::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

/// Errors from expanding, compressing or decoding scenes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Event {event}: {source}")]
    Pattern {
        event: usize,
        #[source]
        source: PatternError,
    },

    #[error("Event {event}: unknown {target}")]
    UnknownTarget { event: usize, target: SceneTarget },

    #[error("Line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("Line {line}: unknown key '{key}'")]
    UnknownKey { line: usize, key: String },

    #[error("Line {line}: invalid value '{value}' for '{key}'")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },
}

/// What the backend needs to know about one character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorView {
    pub id: CharacterId,
    pub name: String,
    pub core_essence: String,
    pub stage: StageId,
    pub voice: VoiceSignature,
    pub context_modifiers: BTreeMap<String, ContextValue>,
}

impl ActorView {
    fn of(character: &CharacterState) -> Self {
        Self {
            id: character.id().clone(),
            name: character.name.clone(),
            core_essence: character.core_essence.clone(),
            stage: character.current_stage().clone(),
            voice: character.voice_signature.clone(),
            context_modifiers: character.context_modifiers.clone(),
        }
    }

    fn label(&self) -> String {
        let tags = self.voice.style_tags();
        let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
        if tags.is_empty() {
            format!("{} ({})", self.name, self.stage)
        } else {
            format!("{} ({}; voice: {})", self.name, self.stage, tags.join(", "))
        }
    }
}

/// Who a beat is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BeatSubject {
    Character(ActorView),
    Relationship {
        id: RelationshipId,
        relationship_type: RelationshipType,
        stage: StageId,
        trigger: String,
        first: ActorView,
        second: ActorView,
    },
}

/// One expanded scene event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedBeat {
    pub index: usize,
    pub pattern: PatternToken,
    pub kind: PatternKind,
    /// The pattern's intended action.
    pub action: String,
    pub subject: BeatSubject,
    #[serde(default, skip_serializing_if = "EventParams::is_empty")]
    pub params: EventParams,
}

/// A scene in the descriptive form consumed by generation backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedScene {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<SceneId>,
    pub beats: Vec<ExpandedBeat>,
}

impl ExpandedScene {
    /// Render the scene as plain-text instructions for a prose drafter.
    pub fn prompt(&self) -> String {
        let mut out = String::new();
        if let Some(title) = &self.title {
            let _ = writeln!(out, "Scene: {title}");
        }
        if let Some(prior) = self.supersedes {
            let _ = writeln!(out, "Rewrites {prior}.");
        }
        for beat in &self.beats {
            let who = match &beat.subject {
                BeatSubject::Character(actor) => actor.label(),
                BeatSubject::Relationship {
                    relationship_type,
                    stage,
                    first,
                    second,
                    ..
                } => format!(
                    "{} & {} ({relationship_type}, {stage})",
                    first.name, second.name
                ),
            };
            let _ = writeln!(out, "{}. {who}: {} [{}]", beat.index + 1, beat.action, beat.pattern);
            if let Some(line) = &beat.params.dialogue {
                if let Some(text) = &line.text {
                    let _ = write!(out, "   says: \"{text}\"");
                    if let (Some(emotion), Some(intensity)) = (&line.emotion, line.intensity) {
                        let _ = write!(out, " ({emotion} {intensity:.2})");
                    }
                    out.push('\n');
                }
            }
            for (key, value) in &beat.params.notes {
                let _ = writeln!(out, "   {key}: {value}");
            }
        }
        out
    }

    /// The plain descriptive form, as a drafter would hand it back.
    pub fn to_descriptive(&self) -> DescriptiveScene {
        DescriptiveScene {
            title: self.title.clone(),
            supersedes: self.supersedes,
            beats: self
                .beats
                .iter()
                .map(|beat| DescriptiveBeat {
                    subject: match &beat.subject {
                        BeatSubject::Character(actor) => actor.id.to_string(),
                        BeatSubject::Relationship { id, .. } => id.to_string(),
                    },
                    action: beat.action.clone(),
                    pattern: Some(beat.pattern.to_string()),
                    dialogue: beat.params.dialogue.clone(),
                })
                .collect(),
        }
    }
}

/// One beat of an externally drafted scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveBeat {
    /// A character id or name, a relationship id, or `"Name & Name"`.
    pub subject: String,
    /// The intended action, matched against pattern descriptions.
    pub action: String,
    /// An explicit pattern token, if the drafter supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<DialogueLine>,
}

impl DescriptiveBeat {
    pub fn new(subject: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
            pattern: None,
            dialogue: None,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_dialogue(mut self, dialogue: DialogueLine) -> Self {
        self.dialogue = Some(dialogue);
        self
    }
}

/// An externally drafted scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveScene {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<SceneId>,
    pub beats: Vec<DescriptiveBeat>,
}

/// A beat `compress` would not guess about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ambiguity {
    UnknownSubject {
        beat: usize,
        subject: String,
    },
    AmbiguousSubject {
        beat: usize,
        subject: String,
        candidates: Vec<CharacterId>,
    },
    NoMatchingPattern {
        beat: usize,
        action: String,
    },
    AmbiguousPattern {
        beat: usize,
        action: String,
        candidates: Vec<PatternToken>,
    },
}

impl Ambiguity {
    pub fn beat(&self) -> usize {
        match self {
            Ambiguity::UnknownSubject { beat, .. }
            | Ambiguity::AmbiguousSubject { beat, .. }
            | Ambiguity::NoMatchingPattern { beat, .. }
            | Ambiguity::AmbiguousPattern { beat, .. } => *beat,
        }
    }
}

/// The result of compressing a drafted scene. Ambiguous beats are left out
/// of `scene` and listed in `ambiguities`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedScene {
    pub scene: Scene,
    pub ambiguities: Vec<Ambiguity>,
}

impl CompressedScene {
    /// Every beat was placed.
    pub fn is_complete(&self) -> bool {
        self.ambiguities.is_empty()
    }
}

/// Expands and compresses scenes against a project's vocabulary.
#[derive(Debug, Clone)]
pub struct SceneCodec {
    catalog: Arc<Catalog>,
}

impl SceneCodec {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Expand `scene` against `snapshot`.
    pub fn expand(&self, snapshot: &Snapshot, scene: &Scene) -> Result<ExpandedScene, CodecError> {
        let registry = self.catalog.registry();
        let mut beats = Vec::with_capacity(scene.events.len());
        for (index, event) in scene.events.iter().enumerate() {
            let def = registry.get(&event.pattern).ok_or_else(|| CodecError::Pattern {
                event: index,
                source: PatternError::UnrecognizedPattern(event.pattern.to_string()),
            })?;
            let missing = || CodecError::UnknownTarget {
                event: index,
                target: event.target.clone(),
            };
            let subject = match &event.target {
                SceneTarget::Character(id) => {
                    BeatSubject::Character(ActorView::of(snapshot.character(id).ok_or_else(missing)?))
                }
                SceneTarget::Relationship(id) => {
                    let record = snapshot.relationship(id).ok_or_else(missing)?;
                    let first = snapshot.character(record.pair().first()).ok_or_else(missing)?;
                    let second = snapshot.character(record.pair().second()).ok_or_else(missing)?;
                    BeatSubject::Relationship {
                        id: id.clone(),
                        relationship_type: record.relationship_type().clone(),
                        stage: record.stage().clone(),
                        trigger: trigger_of(def),
                        first: ActorView::of(first),
                        second: ActorView::of(second),
                    }
                }
            };
            beats.push(ExpandedBeat {
                index,
                pattern: event.pattern.clone(),
                kind: def.kind,
                action: def.description.clone(),
                subject,
                params: event.params.clone(),
            });
        }
        Ok(ExpandedScene {
            title: scene.title.clone(),
            supersedes: scene.supersedes,
            beats,
        })
    }

    /// Best-effort inverse of [`SceneCodec::expand`].
    ///
    /// Explicit tokens outside the vocabulary are an error. Beats whose
    /// subject or pattern cannot be placed unambiguously are skipped and
    /// reported.
    pub fn compress(
        &self,
        snapshot: &Snapshot,
        drafted: &DescriptiveScene,
    ) -> Result<CompressedScene, CodecError> {
        let registry = self.catalog.registry();
        let mut scene = Scene {
            title: drafted.title.clone(),
            events: Vec::new(),
            supersedes: drafted.supersedes,
        };
        let mut ambiguities = Vec::new();

        for (beat, drafted_beat) in drafted.beats.iter().enumerate() {
            let explicit = drafted_beat
                .pattern
                .as_deref()
                .map(|raw| registry.resolve(raw))
                .transpose()
                .map_err(|source| CodecError::Pattern { event: beat, source })?;

            let target = match resolve_subject(snapshot, beat, &drafted_beat.subject) {
                Ok(target) => target,
                Err(ambiguity) => {
                    ambiguities.push(ambiguity);
                    continue;
                }
            };

            let pattern = match explicit {
                Some(token) => token,
                None => {
                    let wants_interaction = matches!(target, SceneTarget::Relationship(_));
                    let mut candidates = registry.find_by_description(&drafted_beat.action);
                    if candidates.len() > 1 {
                        candidates.retain(|def| (def.kind == PatternKind::Interaction) == wants_interaction);
                    }
                    match candidates.as_slice() {
                        [only] => only.token.clone(),
                        [] => {
                            ambiguities.push(Ambiguity::NoMatchingPattern {
                                beat,
                                action: drafted_beat.action.clone(),
                            });
                            continue;
                        }
                        many => {
                            ambiguities.push(Ambiguity::AmbiguousPattern {
                                beat,
                                action: drafted_beat.action.clone(),
                                candidates: many.iter().map(|d| d.token.clone()).collect(),
                            });
                            continue;
                        }
                    }
                }
            };

            let mut event = SceneEvent::new(target, pattern);
            event.params.dialogue = drafted_beat.dialogue.clone();
            scene.push(event);
        }

        Ok(CompressedScene { scene, ambiguities })
    }

    /// Write `scene` in the compact wire form.
    pub fn encode_compact(&self, scene: &Scene) -> String {
        let mut out = String::new();
        if let Some(title) = &scene.title {
            let _ = writeln!(out, "# title={}", escape(title));
        }
        if let Some(prior) = scene.supersedes {
            let _ = writeln!(out, "# supersedes={}", prior.0);
        }
        for event in &scene.events {
            let target = match &event.target {
                SceneTarget::Character(id) => format!("@c:{}", escape(id.as_str())),
                SceneTarget::Relationship(id) => format!("@r:{}", escape(id.as_str())),
            };
            let _ = write!(out, "{target} {}", event.pattern);
            if let Some(line) = &event.params.dialogue {
                let fields = [
                    ("text", line.text.clone()),
                    ("phrase", line.signature_phrase.clone()),
                    ("emotion", line.emotion.clone()),
                    ("intensity", line.intensity.map(|i| i.to_string())),
                ];
                for (key, value) in fields {
                    if let Some(value) = value {
                        let _ = write!(out, " {key}={}", escape(&value));
                    }
                }
            }
            for (key, value) in &event.params.notes {
                let _ = write!(out, " note.{}={}", escape(key), escape(value));
            }
            out.push('\n');
        }
        out
    }

    /// Parse the compact wire form. Every token must be in the vocabulary.
    pub fn decode_compact(&self, text: &str) -> Result<Scene, CodecError> {
        let registry = self.catalog.registry();
        let mut scene = Scene::new();

        for (offset, raw_line) in text.lines().enumerate() {
            let line = offset + 1;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(header) = trimmed.strip_prefix('#') {
                let (key, value) = split_pair(line, header.trim())?;
                match key {
                    "title" => scene.title = Some(unescape(line, value)?),
                    "supersedes" => {
                        let id = value.parse().map_err(|_| invalid(line, key, value))?;
                        scene.supersedes = Some(SceneId(id));
                    }
                    _ => {
                        return Err(CodecError::UnknownKey {
                            line,
                            key: key.to_string(),
                        })
                    }
                }
                continue;
            }

            let mut fields = trimmed.split_whitespace();
            let target = fields.next().unwrap_or_default();
            let target = if let Some(id) = target.strip_prefix("@c:") {
                SceneTarget::Character(CharacterId::new(unescape(line, id)?))
            } else if let Some(id) = target.strip_prefix("@r:") {
                SceneTarget::Relationship(RelationshipId::new(unescape(line, id)?))
            } else {
                return Err(CodecError::Syntax {
                    line,
                    message: format!("expected @c:<id> or @r:<id>, found '{target}'"),
                });
            };

            let token = fields.next().ok_or_else(|| CodecError::Syntax {
                line,
                message: "missing pattern token".to_string(),
            })?;
            let event_index = scene.events.len();
            let pattern = registry
                .resolve(token)
                .map_err(|source| CodecError::Pattern {
                    event: event_index,
                    source,
                })?;

            let mut event = SceneEvent::new(target, pattern);
            let mut dialogue = DialogueLine::default();
            for field in fields {
                let (key, value) = split_pair(line, field)?;
                let value_text = unescape(line, value)?;
                match key {
                    "text" => dialogue.text = Some(value_text),
                    "phrase" => dialogue.signature_phrase = Some(value_text),
                    "emotion" => dialogue.emotion = Some(value_text),
                    "intensity" => {
                        let intensity: f32 = value_text.parse().map_err(|_| invalid(line, key, value))?;
                        dialogue.intensity = Some(intensity);
                    }
                    _ => match key.strip_prefix("note.") {
                        Some(note) => {
                            event.params.notes.insert(unescape(line, note)?, value_text);
                        }
                        None => {
                            return Err(CodecError::UnknownKey {
                                line,
                                key: key.to_string(),
                            })
                        }
                    },
                }
            }
            if dialogue != DialogueLine::default() {
                event.params.dialogue = Some(dialogue);
            }
            scene.push(event);
        }
        Ok(scene)
    }
}

fn trigger_of(def: &PatternDef) -> String {
    def.trigger
        .clone()
        .unwrap_or_else(|| def.token.default_trigger())
}

fn resolve_subject(snapshot: &Snapshot, beat: usize, subject: &str) -> Result<SceneTarget, Ambiguity> {
    let subject = subject.trim();
    let id = CharacterId::new(subject);
    if snapshot.character(&id).is_some() {
        return Ok(SceneTarget::Character(id));
    }
    let rel = RelationshipId::new(subject);
    if snapshot.relationship(&rel).is_some() {
        return Ok(SceneTarget::Relationship(rel));
    }

    if let Some((a, b)) = subject.split_once('&') {
        let a = unique_by_name(snapshot, beat, a.trim())?;
        let b = unique_by_name(snapshot, beat, b.trim())?;
        return snapshot
            .relationship_between(&a, &b)
            .map(|r| SceneTarget::Relationship(r.id().clone()))
            .ok_or_else(|| Ambiguity::UnknownSubject {
                beat,
                subject: subject.to_string(),
            });
    }
    unique_by_name(snapshot, beat, subject).map(SceneTarget::Character)
}

fn unique_by_name(snapshot: &Snapshot, beat: usize, name: &str) -> Result<CharacterId, Ambiguity> {
    let found = snapshot.characters().find_by_name(name);
    match found.as_slice() {
        [only] => Ok(only.id().clone()),
        [] => Err(Ambiguity::UnknownSubject {
            beat,
            subject: name.to_string(),
        }),
        many => Err(Ambiguity::AmbiguousSubject {
            beat,
            subject: name.to_string(),
            candidates: many.iter().map(|c| c.id().clone()).collect(),
        }),
    }
}

fn split_pair(line: usize, field: &str) -> Result<(&str, &str), CodecError> {
    field.split_once('=').ok_or_else(|| CodecError::Syntax {
        line,
        message: format!("expected key=value, found '{field}'"),
    })
}

fn invalid(line: usize, key: &str, value: &str) -> CodecError {
    CodecError::InvalidValue {
        line,
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Percent-escape the characters that delimit the wire form.
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '=' | '#' | '@') || c.is_whitespace() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(out, "%{byte:02X}");
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape(line: usize, escaped: &str) -> Result<String, CodecError> {
    let bad = |detail: &str| CodecError::Syntax {
        line,
        message: format!("bad escape in '{escaped}': {detail}"),
    };
    let mut bytes = Vec::with_capacity(escaped.len());
    let mut rest = escaped.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte != b'%' {
            bytes.push(byte);
            rest = tail;
            continue;
        }
        let hex = tail.get(..2).ok_or_else(|| bad("truncated"))?;
        let hex = std::str::from_utf8(hex).map_err(|_| bad("not hex"))?;
        bytes.push(u8::from_str_radix(hex, 16).map_err(|_| bad("not hex"))?);
        rest = &tail[2..];
    }
    String::from_utf8(bytes).map_err(|_| bad("not UTF-8"))
}
