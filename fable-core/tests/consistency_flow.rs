//! End-to-end consistency tests on the rick/candice project.
//!
//! Run with: `cargo test -p fable-core --test consistency_flow`

use fable_core::progression::UnlockSource;
use fable_core::scene::DialogueLine;
use fable_core::testing::{fixtures, init_tracing};
use fable_core::validator::{StoryEffect, Warning};
use fable_core::{
    CharacterId, PatternToken, Project, ProjectError, RelationshipId, Scene, SceneEvent, SceneId,
    ValidationError, Violation,
};

fn token(raw: &str) -> PatternToken {
    PatternToken::parse(raw).expect("valid token")
}

fn project() -> Project {
    init_tracing();
    Project::open(fixtures::config()).expect("fixture config is valid")
}

fn rick() -> CharacterId {
    CharacterId::new(fixtures::RICK)
}

fn rick_candice() -> RelationshipId {
    RelationshipId::new(fixtures::RICK_CANDICE)
}

// =============================================================================
// Locked patterns
// =============================================================================

#[tokio::test]
async fn test_locked_pattern_scene_rejected() {
    let project = project();

    let scene = Scene::new().with_event(SceneEvent::character(fixtures::RICK, token("CS_ACCEPT")));
    let report = project.validate_and_commit(scene).await.unwrap();

    assert_eq!(report.violations.len(), 1);
    match &report.violations[0] {
        Violation::LockedPattern {
            character,
            pattern,
            stage,
            ..
        } => {
            assert_eq!(character, &rick());
            assert_eq!(pattern, &token("CS_ACCEPT"));
            assert_eq!(stage.as_str(), "denial");
        }
        other => panic!("unexpected violation {other:?}"),
    }
    assert_eq!(project.history_len().await, 0);
}

#[tokio::test]
async fn test_available_pattern_scene_accepted() {
    let project = project();

    let scene = Scene::new().with_event(SceneEvent::character(fixtures::RICK, token("CS_RESIST")));
    let report = project.validate_and_commit(scene).await.unwrap();

    assert!(report.violations.is_empty());
    assert_eq!(report.scene_id, Some(SceneId(1)));
    assert_eq!(project.history_len().await, 1);
}

// =============================================================================
// Relationship transitions and unlocks
// =============================================================================

#[tokio::test]
async fn test_trust_building_unlocks_accept() {
    let project = project();

    let effects = project
        .advance_relationship(&rick_candice(), "trust_building_event")
        .await
        .unwrap();

    let snapshot = project.snapshot().await;
    assert_eq!(
        snapshot.relationship(&rick_candice()).unwrap().stage().as_str(),
        "acceptance"
    );
    let available = project.patterns_available(&rick()).await.unwrap();
    assert!(available.contains(&token("CS_ACCEPT")));

    let unlock = effects
        .iter()
        .find_map(|e| match e {
            StoryEffect::PatternsUnlocked(n) => Some(n),
            _ => None,
        })
        .expect("an unlock effect");
    assert_eq!(unlock.character, rick());
    assert!(matches!(unlock.source, UnlockSource::Relationship { .. }));
    assert_eq!(
        unlock.stage_change.as_ref().map(|(_, to)| to.as_str()),
        Some("acceptance")
    );
}

#[tokio::test]
async fn test_failed_guard_is_invalid_transition() {
    init_tracing();
    let mut config = fixtures::config();
    config.characters[1] = fixtures::candice()
        .with_modifier("trust", fable_core::ContextValue::Number(0.1));
    let project = Project::open(config).unwrap();

    let scene = Scene::new().with_event(SceneEvent::relationship(
        fixtures::RICK_CANDICE,
        token("RS_TRUST_BUILDING"),
    ));
    let report = project.validate_and_commit(scene).await.unwrap();
    assert!(matches!(
        report.violations.as_slice(),
        [Violation::InvalidTransition { trigger, .. }] if trigger == "trust_building_event"
    ));

    let snapshot = project.snapshot().await;
    let record = snapshot.relationship(&rick_candice()).unwrap();
    assert_eq!(record.stage().as_str(), "denial");
    assert!(record.history().is_empty());
}

#[tokio::test]
async fn test_conflict_reconciliation_cycle() {
    let project = project();

    let scenes = [
        ("RS_TRUST_BUILDING", "acceptance"),
        ("RS_CONFLICT", "conflict"),
        ("RS_RECONCILE", "acceptance"),
        ("RS_CONFLICT", "conflict"),
        ("RS_RECONCILE", "acceptance"),
    ];
    for (pattern, expected) in scenes {
        let scene = Scene::new().with_event(SceneEvent::relationship(
            fixtures::RICK_CANDICE,
            token(pattern),
        ));
        let report = project.validate_and_commit(scene).await.unwrap();
        assert!(report.is_committed(), "{pattern}: {:?}", report.violations);
        let snapshot = project.snapshot().await;
        assert_eq!(
            snapshot.relationship(&rick_candice()).unwrap().stage().as_str(),
            expected
        );
    }

    let snapshot = project.snapshot().await;
    let record = snapshot.relationship(&rick_candice()).unwrap();
    let sequences: Vec<u64> = record.history().iter().map(|t| t.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);

    // Candice opened up on the first reconciliation only.
    let candice = snapshot.character(&fixtures::CANDICE.into()).unwrap();
    assert_eq!(candice.current_stage().as_str(), "open");
    let unlocks: usize = snapshot
        .history()
        .iter()
        .map(|s| {
            s.effects()
                .iter()
                .filter(|e| matches!(e, StoryEffect::PatternsUnlocked(_)))
                .count()
        })
        .sum();
    assert_eq!(unlocks, 2);
}

// =============================================================================
// Whole-scene evaluation
// =============================================================================

#[tokio::test]
async fn test_every_violation_reported_and_nothing_committed() {
    let project = project();
    let before = project.snapshot().await;

    let scene = Scene::new()
        .with_event(SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_TRUST_BUILDING")))
        .with_event(SceneEvent::character(fixtures::RICK, token("CS_ACCEPT")))
        .with_event(SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_RECONCILE")))
        .with_event(SceneEvent::character(fixtures::CANDICE, token("DL_CONFESSION")));
    let report = project.validate_and_commit(scene).await.unwrap();

    // CS_ACCEPT is fine once the earlier transition unlocked it.
    let events: Vec<usize> = report.violations.iter().map(Violation::event).collect();
    assert_eq!(events, vec![2, 3]);
    assert!(report.effects.is_empty());
    assert_eq!(*project.snapshot().await, *before);
}

#[tokio::test]
async fn test_unrecognized_token_rejected_before_other_checks() {
    let project = project();

    let scene = Scene::new()
        .with_event(SceneEvent::character("nobody", token("CS_ACCEPT")))
        .with_event(SceneEvent::character(fixtures::RICK, token("XX_UNKNOWN")));
    let err = project.validate_and_commit(scene).await.unwrap_err();
    assert!(matches!(
        err,
        ProjectError::Validation(ValidationError::UnrecognizedPattern { event: 1, .. })
    ));
}

#[tokio::test]
async fn test_unknown_entity_aborts() {
    let project = project();

    let scene = Scene::new().with_event(SceneEvent::relationship("rick-morty", token("RS_CONFLICT")));
    let err = project.validate_and_commit(scene).await.unwrap_err();
    assert!(matches!(
        err,
        ProjectError::Validation(ValidationError::UnknownEntity { event: Some(0), .. })
    ));
    assert_eq!(project.history_len().await, 0);
}

#[tokio::test]
async fn test_voice_drift_warns_but_commits() {
    let project = project();

    let scene = Scene::new().with_event(
        SceneEvent::character(fixtures::RICK, token("DL_BITTER_QUIP"))
            .with_dialogue(DialogueLine::new("I'm thrilled.").with_emotion("joy", 0.95)),
    );
    let report = project.validate_and_commit(scene).await.unwrap();
    assert!(report.is_committed());
    assert!(matches!(report.warnings.as_slice(), [Warning::VoiceDrift { .. }]));
}

// =============================================================================
// Amendments
// =============================================================================

#[tokio::test]
async fn test_amendment_supersedes_without_rewriting() {
    let project = project();

    let first = Scene::new()
        .titled("draft")
        .with_event(SceneEvent::character(fixtures::RICK, token("CS_RESIST")));
    let first_id = project.validate_and_commit(first).await.unwrap().scene_id.unwrap();

    let fix = Scene::amending(first_id)
        .titled("fixed")
        .with_event(SceneEvent::character(fixtures::RICK, token("CS_DEFLECT")));
    let fix_id = project.validate_and_commit(fix).await.unwrap().scene_id.unwrap();

    let history = project.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history.superseded_by(first_id), Some(fix_id));
    let effective: Vec<SceneId> = history.effective().iter().map(|s| s.id()).collect();
    assert_eq!(effective, vec![fix_id]);
    assert_eq!(history.get(first_id).unwrap().scene().title.as_deref(), Some("draft"));

    let dangling = Scene::amending(SceneId(99))
        .with_event(SceneEvent::character(fixtures::RICK, token("CS_RESIST")));
    assert!(matches!(
        project.validate_and_commit(dangling).await,
        Err(ProjectError::Validation(ValidationError::UnknownScene(_)))
    ));
}
