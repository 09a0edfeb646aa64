//! Property tests for the story-state invariants.
//!
//! Scenes are drawn from a fixed pool of events on the rick/candice project,
//! so most generated scenes hit a mix of accepted and rejected paths.

use fable_core::character::CharacterState;
use fable_core::config::Catalog;
use fable_core::scene::DialogueLine;
use fable_core::testing::fixtures;
use fable_core::{ConsistencyValidator, PatternToken, Scene, SceneEvent, StoryState};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn token(raw: &str) -> PatternToken {
    PatternToken::parse(raw).expect("valid token")
}

fn event_pool() -> Vec<SceneEvent> {
    vec![
        SceneEvent::character(fixtures::RICK, token("CS_RESIST")),
        SceneEvent::character(fixtures::RICK, token("CS_ACCEPT")),
        SceneEvent::character(fixtures::RICK, token("DL_BITTER_QUIP"))
            .with_dialogue(DialogueLine::new("Sure.").with_emotion("joy", 0.9)),
        SceneEvent::character(fixtures::CANDICE, token("DL_INTERROGATE")),
        SceneEvent::character(fixtures::CANDICE, token("DL_CONFESSION")),
        SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_TRUST_BUILDING")),
        SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_CONFLICT")),
        SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_RECONCILE")),
        SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_BETRAYAL")),
    ]
}

fn setup() -> (ConsistencyValidator, StoryState) {
    let (catalog, state): (Catalog, StoryState) =
        fixtures::config().build().expect("fixture config is valid");
    (ConsistencyValidator::new(Arc::new(catalog)), state)
}

fn scenes_strategy() -> impl Strategy<Value = Vec<Scene>> {
    let pool_len = event_pool().len();
    prop::collection::vec(prop::collection::vec(0..pool_len, 1..5), 1..12).prop_map(|scenes| {
        let pool = event_pool();
        scenes
            .into_iter()
            .map(|events| {
                events
                    .into_iter()
                    .fold(Scene::new(), |scene, i| scene.with_event(pool[i].clone()))
            })
            .collect()
    })
}

fn assert_partition(character: &CharacterState) {
    let locks = character.progression_locks();
    assert!(locks
        .locked_patterns()
        .is_disjoint(locks.available_patterns()));
    let union: BTreeSet<PatternToken> = locks
        .locked_patterns()
        .union(locks.available_patterns())
        .cloned()
        .collect();
    assert_eq!(&union, character.vocabulary());
    assert!(character.has_stage(character.current_stage()));
}

proptest! {
    #[test]
    fn prop_lock_sets_stay_partitioned(scenes in scenes_strategy()) {
        let (validator, mut state) = setup();
        for scene in scenes {
            let _ = validator.validate_and_commit(&mut state, scene);
            for character in state.snapshot().characters().iter() {
                assert_partition(character);
            }
        }
    }

    #[test]
    fn prop_commit_is_all_or_nothing(scenes in scenes_strategy()) {
        let (validator, mut state) = setup();
        for scene in scenes {
            let before = state.clone();
            let report = validator
                .validate_and_commit(&mut state, scene)
                .expect("pool events are structurally valid");
            if report.is_committed() {
                prop_assert!(report.violations.is_empty());
                prop_assert_eq!(state.history().len(), before.history().len() + 1);
            } else {
                prop_assert!(!report.violations.is_empty());
                prop_assert_eq!(&state, &before);
            }
        }
    }

    #[test]
    fn prop_replay_is_deterministic(scenes in scenes_strategy()) {
        let (validator, initial) = setup();
        let mut live = initial.clone();
        let mut accepted = Vec::new();
        for scene in scenes {
            let report = validator
                .validate_and_commit(&mut live, scene.clone())
                .expect("pool events are structurally valid");
            if report.is_committed() {
                accepted.push(scene);
            }
        }

        let first = validator.replay(&initial, &accepted).expect("accepted scenes replay");
        let second = validator.replay(&initial, &accepted).expect("accepted scenes replay");
        prop_assert_eq!(&first, &live);
        prop_assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn prop_unlocks_are_idempotent(order in prop::collection::vec(0usize..3, 1..10)) {
        let events = ["candice_earns_trust", "rick_opens_up", "candice_earns_trust"];
        let targets = [fixtures::RICK, fixtures::CANDICE, fixtures::RICK];
        let (validator, mut state) = setup();
        let mut fired = BTreeSet::new();

        for i in order {
            let note = validator
                .commit_unlock(&mut state, &targets[i].into(), events[i])
                .expect("declared event");
            if !fired.insert(events[i]) {
                prop_assert!(note.unlocked.is_empty());
                prop_assert!(note.stage_change.is_none());
            }
        }
    }
}

#[test]
fn test_unlock_event_for_other_character_is_rejected_in_strict_mode() {
    let (validator, mut state) = setup();
    assert!(validator
        .commit_unlock(&mut state, &fixtures::CANDICE.into(), "candice_earns_trust")
        .is_err());
}
