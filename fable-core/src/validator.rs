//! Consistency validator.
//!
//! This module implements the scene acceptance pipeline:
//! 1. Every pattern token is checked against the registry
//! 2. Each event is resolved against a scratch copy of the snapshot:
//!    character events are checked against progression locks, relationship
//!    events are planned and applied to the scratch state machines
//! 3. Violations are accumulated across the whole scene, never thrown mid-scan
//! 4. Only a scene with zero violations is committed: the scratch snapshot
//!    replaces the live one and the scene is appended to history
//!
//! Structural problems (unknown ids, tokens outside the vocabulary) abort
//! immediately with a [`ValidationError`]; they mean the input is malformed,
//! not that the story is inconsistent.

use crate::character::{CharacterId, CharacterState, StageId};
use crate::config::Catalog;
use crate::history::AcceptedScene;
use crate::patterns::PatternToken;
use crate::progression::{ProgressionEngine, ProgressionError, UnlockNotification, UnlockSource};
use crate::relationship::{
    RelationshipEngine, RelationshipId, RelationshipType, TransitionError, TransitionPlan,
};
use crate::scene::{DialogueLine, Scene, SceneId, SceneTarget};
use crate::state::{Snapshot, StoryState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Structural errors that abort validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unknown {target}")]
    UnknownEntity {
        /// Index of the offending scene event, if raised from a scene.
        event: Option<usize>,
        target: SceneTarget,
    },

    #[error("Scene amends unknown scene {0}")]
    UnknownScene(SceneId),

    #[error("Event {event}: unrecognized pattern token {token}")]
    UnrecognizedPattern { event: usize, token: PatternToken },

    #[error("Relationship {relationship} has undeclared type '{relationship_type}'")]
    UnknownRelationshipType {
        relationship: RelationshipId,
        relationship_type: RelationshipType,
    },

    #[error("Replayed scene {position} was rejected with {} violation(s)", .violations.len())]
    ReplayRejected {
        position: usize,
        violations: Vec<Violation>,
    },

    #[error(transparent)]
    Progression(#[from] ProgressionError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// A consistency violation. Any violation blocks the commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// A character exhibited a pattern that is not available to them.
    LockedPattern {
        event: usize,
        character: CharacterId,
        pattern: PatternToken,
        stage: StageId,
    },
    /// A relationship event has no matching transition from the current stage.
    InvalidTransition {
        event: usize,
        relationship: RelationshipId,
        stage: StageId,
        trigger: String,
    },
}

impl Violation {
    /// Index of the scene event that caused the violation.
    pub fn event(&self) -> usize {
        match self {
            Violation::LockedPattern { event, .. } | Violation::InvalidTransition { event, .. } => {
                *event
            }
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::LockedPattern {
                event,
                character,
                pattern,
                stage,
            } => write!(
                f,
                "event {event}: {pattern} is locked for {character} at stage '{stage}'"
            ),
            Violation::InvalidTransition {
                event,
                relationship,
                stage,
                trigger,
            } => write!(
                f,
                "event {event}: {relationship} has no transition from '{stage}' on '{trigger}'"
            ),
        }
    }
}

/// Why a dialogue line drifts from the speaker's voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DriftReason {
    UndeclaredEmotion { emotion: String },
    AboveRange {
        emotion: String,
        intensity: f32,
        ceiling: f32,
    },
    IntensityOutOfBounds { intensity: f32 },
    UnknownSignaturePhrase { phrase: String },
}

/// Advisory findings. Warnings never block a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    VoiceDrift {
        event: usize,
        character: CharacterId,
        drift: DriftReason,
    },
}

/// A concrete state change caused by a scene or a direct operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoryEffect {
    RelationshipAdvanced {
        relationship: RelationshipId,
        from: StageId,
        to: StageId,
        trigger: String,
        edge_index: usize,
        sequence: u64,
    },
    PatternsUnlocked(UnlockNotification),
}

/// The outcome of validating a scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Set when the scene was committed to history.
    pub scene_id: Option<SceneId>,
    pub violations: Vec<Violation>,
    pub warnings: Vec<Warning>,
    /// Changes the scene made (or would make, for a dry run). Empty when rejected.
    pub effects: Vec<StoryEffect>,
}

impl ValidationReport {
    /// No violations were found.
    pub fn is_accepted(&self) -> bool {
        self.violations.is_empty()
    }

    /// The scene was appended to history.
    pub fn is_committed(&self) -> bool {
        self.scene_id.is_some()
    }

    /// Unlock notifications among the effects.
    pub fn unlocks(&self) -> impl Iterator<Item = &UnlockNotification> {
        self.effects.iter().filter_map(|e| match e {
            StoryEffect::PatternsUnlocked(n) => Some(n),
            StoryEffect::RelationshipAdvanced { .. } => None,
        })
    }
}

/// The result of evaluating a scene against a snapshot, not yet committed.
#[derive(Debug, Clone)]
pub struct Evaluation {
    scene_id: SceneId,
    base_sequence: u64,
    sequence: u64,
    snapshot: Snapshot,
    violations: Vec<Violation>,
    warnings: Vec<Warning>,
    effects: Vec<StoryEffect>,
}

impl Evaluation {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Report for an evaluation that will not be committed.
    pub fn into_report(self) -> ValidationReport {
        let effects = if self.is_clean() { self.effects } else { Vec::new() };
        ValidationReport {
            scene_id: None,
            violations: self.violations,
            warnings: self.warnings,
            effects,
        }
    }
}

/// Checks scenes against the story state and commits the consistent ones.
#[derive(Debug, Clone)]
pub struct ConsistencyValidator {
    catalog: Arc<Catalog>,
    progression: ProgressionEngine,
    relationships: RelationshipEngine,
}

impl ConsistencyValidator {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        let progression = ProgressionEngine::new(catalog.strict_unlock_events());
        Self {
            catalog,
            progression,
            relationships: RelationshipEngine::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn progression(&self) -> &ProgressionEngine {
        &self.progression
    }

    /// The patterns a character may exhibit right now.
    pub fn patterns_available<'a>(
        &self,
        state: &'a StoryState,
        character: &CharacterId,
    ) -> Result<&'a BTreeSet<PatternToken>, ValidationError> {
        let character = state
            .character(character)
            .ok_or_else(|| unknown(None, SceneTarget::Character(character.clone())))?;
        Ok(self.progression.patterns_available(character))
    }

    /// Evaluate a scene against `state` without changing it.
    pub fn evaluate(&self, state: &StoryState, scene: &Scene) -> Result<Evaluation, ValidationError> {
        let registry = self.catalog.registry();
        if let Some((event, e)) = scene
            .events
            .iter()
            .enumerate()
            .find(|(_, e)| !registry.contains(&e.pattern))
        {
            return Err(ValidationError::UnrecognizedPattern {
                event,
                token: e.pattern.clone(),
            });
        }
        if let Some(prior) = scene.supersedes {
            if !state.history().contains(prior) {
                return Err(ValidationError::UnknownScene(prior));
            }
        }

        let scene_id = state.history().next_id();
        let mut scratch = state.snapshot().clone();
        let mut sequence = state.sequence();
        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        let mut effects = Vec::new();

        for (index, event) in scene.events.iter().enumerate() {
            match &event.target {
                SceneTarget::Character(id) => {
                    let character = scratch
                        .character(id)
                        .ok_or_else(|| unknown(Some(index), event.target.clone()))?;
                    if !self.progression.is_available(character, &event.pattern) {
                        debug!(event = index, character = %id, pattern = %event.pattern, "locked pattern");
                        violations.push(Violation::LockedPattern {
                            event: index,
                            character: id.clone(),
                            pattern: event.pattern.clone(),
                            stage: character.current_stage().clone(),
                        });
                    }
                    if let Some(line) = &event.params.dialogue {
                        warnings.extend(voice_drift(index, character, line));
                    }
                }
                SceneTarget::Relationship(id) => {
                    let trigger = registry
                        .trigger_for(&event.pattern)
                        .unwrap_or_else(|| event.pattern.default_trigger());
                    match self.plan(&scratch, Some(index), id, &trigger)? {
                        Ok(plan) => {
                            sequence += 1;
                            self.apply_plan(&mut scratch, &plan, sequence, Some(scene_id), &mut effects)?;
                        }
                        Err(TransitionError::NoMatchingTransition { stage, .. }) => {
                            debug!(event = index, relationship = %id, %stage, trigger, "no matching transition");
                            violations.push(Violation::InvalidTransition {
                                event: index,
                                relationship: id.clone(),
                                stage,
                                trigger,
                            });
                        }
                        Err(other) => return Err(other.into()),
                    }
                }
            }
        }

        Ok(Evaluation {
            scene_id,
            base_sequence: state.sequence(),
            sequence,
            snapshot: scratch,
            violations,
            warnings,
            effects,
        })
    }

    /// Dry run: report what committing `scene` would do.
    pub fn validate(&self, state: &StoryState, scene: &Scene) -> Result<ValidationReport, ValidationError> {
        Ok(self.evaluate(state, scene)?.into_report())
    }

    /// Validate `scene` and, if it has no violations, commit it to `state`.
    ///
    /// Either the whole scene is committed and history grows by one, or
    /// `state` is left exactly as it was.
    pub fn validate_and_commit(
        &self,
        state: &mut StoryState,
        scene: Scene,
    ) -> Result<ValidationReport, ValidationError> {
        let evaluation = self.evaluate(state, &scene)?;
        Ok(self.commit(state, scene, evaluation))
    }

    /// Commit an evaluation made against this exact `state`.
    pub(crate) fn commit(&self, state: &mut StoryState, scene: Scene, evaluation: Evaluation) -> ValidationReport {
        let stale = evaluation.scene_id != state.history().next_id()
            || evaluation.base_sequence != state.sequence();
        if !evaluation.is_clean() || stale {
            return self.reject(evaluation);
        }

        let Evaluation {
            scene_id,
            sequence,
            snapshot,
            warnings,
            effects,
            ..
        } = evaluation;

        *state.snapshot_mut() = snapshot;
        state.set_sequence(sequence);
        let accepted = AcceptedScene::new(scene_id, scene, effects.clone(), warnings.clone());
        state.history_mut().append(accepted);

        info!(
            scene = %scene_id,
            effects = effects.len(),
            warnings = warnings.len(),
            "scene committed"
        );
        ValidationReport {
            scene_id: Some(scene_id),
            violations: Vec::new(),
            warnings,
            effects,
        }
    }

    /// Re-validate and commit `scenes` in order on a copy of `initial`.
    ///
    /// The same initial state and scene sequence always produce the same
    /// final state. Stops at the first scene that does not commit.
    pub fn replay<'a>(
        &self,
        initial: &StoryState,
        scenes: impl IntoIterator<Item = &'a Scene>,
    ) -> Result<StoryState, ValidationError> {
        let mut state = initial.clone();
        for (position, scene) in scenes.into_iter().enumerate() {
            let report = self.validate_and_commit(&mut state, scene.clone())?;
            if !report.is_committed() {
                return Err(ValidationError::ReplayRejected {
                    position,
                    violations: report.violations,
                });
            }
        }
        Ok(state)
    }

    /// Report a scene that will not be committed.
    pub(crate) fn reject(&self, evaluation: Evaluation) -> ValidationReport {
        warn!(
            scene = %evaluation.scene_id,
            violations = evaluation.violations.len(),
            "scene rejected"
        );
        evaluation.into_report()
    }

    /// Apply an unlock event to a character outside of any scene.
    pub fn commit_unlock(
        &self,
        state: &mut StoryState,
        character: &CharacterId,
        event: &str,
    ) -> Result<UnlockNotification, ValidationError> {
        let target = state
            .snapshot_mut()
            .character_mut(character)
            .ok_or_else(|| unknown(None, SceneTarget::Character(character.clone())))?;
        let outcome = self.progression.apply_unlock(target, event)?;
        Ok(outcome.into_notification(character.clone(), event, UnlockSource::Direct))
    }

    /// Fire `trigger` on a relationship outside of any scene.
    ///
    /// Fails with [`TransitionError::NoMatchingTransition`] (wrapped) when the
    /// relationship cannot take the trigger; `state` is then unchanged.
    pub fn commit_advance(
        &self,
        state: &mut StoryState,
        relationship: &RelationshipId,
        trigger: &str,
    ) -> Result<Vec<StoryEffect>, ValidationError> {
        let plan = self.plan(state.snapshot(), None, relationship, trigger)?;
        let plan = plan?;

        let mut scratch = state.snapshot().clone();
        let sequence = state.sequence() + 1;
        let mut effects = Vec::new();
        self.apply_plan(&mut scratch, &plan, sequence, None, &mut effects)?;

        *state.snapshot_mut() = scratch;
        state.set_sequence(sequence);
        Ok(effects)
    }

    /// Plan a transition. The outer error is structural; the inner one is a
    /// consistency failure for the caller to classify.
    fn plan(
        &self,
        snapshot: &Snapshot,
        event: Option<usize>,
        relationship: &RelationshipId,
        trigger: &str,
    ) -> Result<Result<TransitionPlan, TransitionError>, ValidationError> {
        let target = || SceneTarget::Relationship(relationship.clone());
        let record = snapshot
            .relationship(relationship)
            .ok_or_else(|| unknown(event, target()))?;
        let graph = self
            .catalog
            .graph(record.relationship_type())
            .ok_or_else(|| ValidationError::UnknownRelationshipType {
                relationship: relationship.clone(),
                relationship_type: record.relationship_type().clone(),
            })?;
        let ctx = snapshot
            .guard_context(record)
            .ok_or_else(|| unknown(event, target()))?;
        Ok(self.relationships.plan(graph, record, trigger, &ctx))
    }

    /// Apply a transition and forward its unlock events to each recipient.
    fn apply_plan(
        &self,
        snapshot: &mut Snapshot,
        plan: &TransitionPlan,
        sequence: u64,
        scene: Option<SceneId>,
        effects: &mut Vec<StoryEffect>,
    ) -> Result<(), ValidationError> {
        let record = snapshot
            .relationship_mut(&plan.relationship)
            .ok_or_else(|| unknown(None, SceneTarget::Relationship(plan.relationship.clone())))?;
        self.relationships.apply(record, plan, sequence, scene)?;
        effects.push(StoryEffect::RelationshipAdvanced {
            relationship: plan.relationship.clone(),
            from: plan.from.clone(),
            to: plan.to.clone(),
            trigger: plan.trigger.clone(),
            edge_index: plan.edge_index,
            sequence,
        });

        for (character, event) in &plan.unlocks {
            let target = snapshot
                .character_mut(character)
                .ok_or_else(|| unknown(None, SceneTarget::Character(character.clone())))?;
            let outcome = self.progression.apply_unlock(target, event)?;
            if !outcome.is_empty() {
                let source = UnlockSource::Relationship {
                    relationship: plan.relationship.clone(),
                    trigger: plan.trigger.clone(),
                };
                effects.push(StoryEffect::PatternsUnlocked(outcome.into_notification(
                    character.clone(),
                    event.as_str(),
                    source,
                )));
            }
        }
        Ok(())
    }
}

fn unknown(event: Option<usize>, target: SceneTarget) -> ValidationError {
    ValidationError::UnknownEntity { event, target }
}

/// Check a dialogue line against the speaker's declared voice.
fn voice_drift(event: usize, character: &CharacterState, line: &DialogueLine) -> Vec<Warning> {
    let voice = &character.voice_signature;
    let mut drift = Vec::new();

    if let Some(phrase) = &line.signature_phrase {
        if voice.phrase_weight(phrase).is_none() {
            drift.push(DriftReason::UnknownSignaturePhrase {
                phrase: phrase.clone(),
            });
        }
    }

    if let Some(intensity) = line.intensity.filter(|i| !(0.0..=1.0).contains(i)) {
        drift.push(DriftReason::IntensityOutOfBounds { intensity });
    } else if let Some(emotion) = &line.emotion {
        match voice.intensity_ceiling(emotion) {
            None => drift.push(DriftReason::UndeclaredEmotion {
                emotion: emotion.clone(),
            }),
            Some(ceiling) => {
                if let Some(intensity) = line.intensity.filter(|i| *i > ceiling) {
                    drift.push(DriftReason::AboveRange {
                        emotion: emotion.clone(),
                        intensity,
                        ceiling,
                    });
                }
            }
        }
    }

    drift
        .into_iter()
        .map(|drift| Warning::VoiceDrift {
            event,
            character: character.id().clone(),
            drift,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneEvent;
    use crate::testing::fixtures;

    fn token(raw: &str) -> PatternToken {
        PatternToken::parse(raw).unwrap()
    }

    fn setup() -> (ConsistencyValidator, StoryState) {
        let (catalog, state) = fixtures::config().build().unwrap();
        (ConsistencyValidator::new(Arc::new(catalog)), state)
    }

    #[test]
    fn test_locked_pattern_rejected() {
        let (validator, mut state) = setup();
        let before = state.clone();
        let scene = Scene::new().with_event(SceneEvent::character(fixtures::RICK, token("CS_ACCEPT")));

        let report = validator.validate_and_commit(&mut state, scene).unwrap();
        assert!(!report.is_committed());
        assert_eq!(report.violations.len(), 1);
        assert!(matches!(
            &report.violations[0],
            Violation::LockedPattern { stage, .. } if stage.as_str() == "denial"
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn test_available_pattern_committed() {
        let (validator, mut state) = setup();
        let scene = Scene::new().with_event(SceneEvent::character(fixtures::RICK, token("CS_RESIST")));

        let report = validator.validate_and_commit(&mut state, scene).unwrap();
        assert_eq!(report.scene_id, Some(SceneId(1)));
        assert_eq!(state.history().len(), 1);
    }

    #[test]
    fn test_all_violations_reported() {
        let (validator, mut state) = setup();
        let scene = Scene::new()
            .with_event(SceneEvent::character(fixtures::RICK, token("CS_ACCEPT")))
            .with_event(SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_RECONCILE")))
            .with_event(SceneEvent::character(fixtures::CANDICE, token("DL_CONFESSION")));

        let report = validator.validate_and_commit(&mut state, scene).unwrap();
        let events: Vec<usize> = report.violations.iter().map(Violation::event).collect();
        assert_eq!(events, vec![0, 1, 2]);
        assert!(report.effects.is_empty());
        assert!(state.history().is_empty());
    }

    #[test]
    fn test_unrecognized_pattern_aborts_before_entity_checks() {
        let (validator, mut state) = setup();
        let scene = Scene::new()
            .with_event(SceneEvent::character("nobody", token("CS_RESIST")))
            .with_event(SceneEvent::character(fixtures::RICK, token("CS_TELEPORT")));

        let err = validator.validate_and_commit(&mut state, scene).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnrecognizedPattern {
                event: 1,
                token: token("CS_TELEPORT")
            }
        );
    }

    #[test]
    fn test_unknown_entity_aborts() {
        let (validator, mut state) = setup();
        let scene = Scene::new()
            .with_event(SceneEvent::character(fixtures::RICK, token("CS_ACCEPT")))
            .with_event(SceneEvent::character("morty", token("CS_RESIST")));

        let err = validator.validate_and_commit(&mut state, scene).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnknownEntity { event: Some(1), .. }
        ));
        assert!(state.history().is_empty());
    }

    #[test]
    fn test_transition_unlocks_within_same_scene() {
        let (validator, mut state) = setup();
        let scene = Scene::new()
            .with_event(SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_TRUST_BUILDING")))
            .with_event(SceneEvent::character(fixtures::RICK, token("CS_ACCEPT")));

        let report = validator.validate_and_commit(&mut state, scene).unwrap();
        assert!(report.is_committed(), "{:?}", report.violations);
        assert_eq!(report.unlocks().count(), 1);

        let rick = state.character(&fixtures::RICK.into()).unwrap();
        assert!(validator.progression().is_available(rick, &token("CS_ACCEPT")));
        assert_eq!(rick.current_stage().as_str(), "acceptance");

        let rel = state.relationship(&fixtures::RICK_CANDICE.into()).unwrap();
        assert_eq!(rel.stage().as_str(), "acceptance");
        assert_eq!(rel.history()[0].scene, Some(SceneId(1)));
    }

    #[test]
    fn test_rejected_scene_rolls_back_transitions() {
        let (validator, mut state) = setup();
        let before = state.clone();
        let scene = Scene::new()
            .with_event(SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_TRUST_BUILDING")))
            .with_event(SceneEvent::character(fixtures::CANDICE, token("DL_CONFESSION")));

        let report = validator.validate_and_commit(&mut state, scene).unwrap();
        assert_eq!(report.violations.len(), 1);
        assert_eq!(state, before);
    }

    #[test]
    fn test_voice_drift_is_advisory() {
        let (validator, mut state) = setup();
        let scene = Scene::new().with_event(
            SceneEvent::character(fixtures::RICK, token("DL_BITTER_QUIP")).with_dialogue(
                DialogueLine::new("Great. Just great.")
                    .with_emotion("joy", 0.9)
                    .with_signature_phrase("Totally fine"),
            ),
        );

        let report = validator.validate_and_commit(&mut state, scene).unwrap();
        assert!(report.is_committed());
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().any(|w| matches!(
            w,
            Warning::VoiceDrift { drift: DriftReason::AboveRange { .. }, .. }
        )));
        assert!(report.warnings.iter().any(|w| matches!(
            w,
            Warning::VoiceDrift { drift: DriftReason::UnknownSignaturePhrase { .. }, .. }
        )));
        assert_eq!(state.history().latest().unwrap().warnings().len(), 2);
    }

    #[test]
    fn test_undeclared_emotion_drifts() {
        let (validator, state) = setup();
        let scene = Scene::new().with_event(
            SceneEvent::character(fixtures::RICK, token("CS_RESIST"))
                .with_dialogue(DialogueLine::new("...").with_emotion("serenity", 0.1)),
        );
        let report = validator.validate(&state, &scene).unwrap();
        assert!(matches!(
            &report.warnings[0],
            Warning::VoiceDrift { drift: DriftReason::UndeclaredEmotion { emotion }, .. } if emotion == "serenity"
        ));
    }

    #[test]
    fn test_intensity_outside_unit_range_drifts() {
        let (validator, state) = setup();
        let scene = Scene::new().with_event(
            SceneEvent::character(fixtures::RICK, token("CS_RESIST"))
                .with_dialogue(DialogueLine::new("WHATEVER.").with_emotion("anger", 1.5)),
        );
        let report = validator.validate(&state, &scene).unwrap();
        assert!(report.is_accepted());
        assert_eq!(
            report.warnings,
            vec![Warning::VoiceDrift {
                event: 0,
                character: CharacterId::new(fixtures::RICK),
                drift: DriftReason::IntensityOutOfBounds { intensity: 1.5 },
            }]
        );
    }

    #[test]
    fn test_amending_unknown_scene() {
        let (validator, mut state) = setup();
        let scene = Scene::amending(SceneId(4))
            .with_event(SceneEvent::character(fixtures::RICK, token("CS_RESIST")));
        assert_eq!(
            validator.validate_and_commit(&mut state, scene),
            Err(ValidationError::UnknownScene(SceneId(4)))
        );
    }

    #[test]
    fn test_commit_advance_unknown_relationship_has_no_event() {
        let (validator, mut state) = setup();
        let err = validator
            .commit_advance(&mut state, &"rick-morty".into(), "conflict_event")
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownEntity {
                event: None,
                target: SceneTarget::Relationship("rick-morty".into()),
            }
        );
    }

    #[test]
    fn test_commit_advance_without_match_leaves_state() {
        let (validator, mut state) = setup();
        let before = state.clone();
        let err = validator
            .commit_advance(&mut state, &fixtures::RICK_CANDICE.into(), "reconciliation_event")
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Transition(TransitionError::NoMatchingTransition { .. })
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn test_commit_unlock_direct() {
        let (validator, mut state) = setup();
        let note = validator
            .commit_unlock(&mut state, &fixtures::CANDICE.into(), "rick_opens_up")
            .unwrap();
        assert_eq!(note.source, UnlockSource::Direct);
        assert!(note.unlocked.contains(&token("DL_CONFESSION")));

        let again = validator
            .commit_unlock(&mut state, &fixtures::CANDICE.into(), "rick_opens_up")
            .unwrap();
        assert!(again.unlocked.is_empty());
    }
}
