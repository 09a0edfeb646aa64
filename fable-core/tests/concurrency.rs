//! Concurrency tests: serialized writers, snapshot readers, independent projects.

use fable_core::testing::{fixtures, init_tracing, MockBackend, MockReply};
use fable_core::{GenerationOutcome, PatternToken, Project, RelationshipId, Scene, SceneEvent};
use std::sync::Arc;
use std::time::Duration;

fn token(raw: &str) -> PatternToken {
    PatternToken::parse(raw).expect("valid token")
}

fn resist() -> Scene {
    Scene::new().with_event(SceneEvent::character(fixtures::RICK, token("CS_RESIST")))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_are_serialized() {
    init_tracing();
    let project = Arc::new(Project::open(fixtures::config()).unwrap());

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let project = Arc::clone(&project);
        tasks.push(tokio::spawn(async move {
            project.validate_and_commit(resist()).await.unwrap()
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        let report = task.await.unwrap();
        ids.push(report.scene_id.expect("committed").0);
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=32).collect::<Vec<u64>>());
    assert_eq!(project.history_len().await, 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_competing_transitions_take_effect_once() {
    let project = Arc::new(Project::open(fixtures::config()).unwrap());
    let trust = || {
        Scene::new().with_event(SceneEvent::relationship(
            fixtures::RICK_CANDICE,
            token("RS_TRUST_BUILDING"),
        ))
    };

    let a = tokio::spawn({
        let project = Arc::clone(&project);
        async move { project.validate_and_commit(trust()).await.unwrap() }
    });
    let b = tokio::spawn({
        let project = Arc::clone(&project);
        async move { project.validate_and_commit(trust()).await.unwrap() }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    // Only one can move denial -> acceptance; the other sees acceptance.
    assert_eq!(
        [a.is_committed(), b.is_committed()].iter().filter(|c| **c).count(),
        1
    );
    let snapshot = project.snapshot().await;
    let record = snapshot
        .relationship(&RelationshipId::new(fixtures::RICK_CANDICE))
        .unwrap();
    assert_eq!(record.history().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_partial_scenes() {
    let project = Arc::new(Project::open(fixtures::config()).unwrap());

    let writer = tokio::spawn({
        let project = Arc::clone(&project);
        async move {
            for _ in 0..5 {
                let cycle = Scene::new()
                    .with_event(SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_TRUST_BUILDING")))
                    .with_event(SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_CONFLICT")))
                    .with_event(SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_BETRAYAL")));
                let report = project.validate_and_commit(cycle).await.unwrap();
                assert!(report.is_committed(), "{:?}", report.violations);
            }
        }
    });

    let reader = tokio::spawn({
        let project = Arc::clone(&project);
        async move {
            for _ in 0..200 {
                let snapshot = project.snapshot().await;
                let record = snapshot
                    .relationship(&RelationshipId::new(fixtures::RICK_CANDICE))
                    .unwrap();
                // Each scene makes exactly three transitions and ends in denial.
                assert_eq!(record.history().len(), snapshot.history().len() * 3);
                assert_eq!(record.stage().as_str(), "denial");
                tokio::task::yield_now().await;
            }
        }
    });

    writer.await.unwrap();
    reader.await.unwrap();
    assert_eq!(project.history_len().await, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_projects_are_independent() {
    let first = Arc::new(Project::open(fixtures::config()).unwrap());
    let second = Arc::new(Project::open(fixtures::config()).unwrap());
    assert_ne!(first.session_id(), second.session_id());

    let a = tokio::spawn({
        let project = Arc::clone(&first);
        async move {
            for _ in 0..10 {
                project.validate_and_commit(resist()).await.unwrap();
            }
        }
    });
    let b = tokio::spawn({
        let project = Arc::clone(&second);
        async move {
            project
                .advance_relationship(&fixtures::RICK_CANDICE.into(), "trust_building_event")
                .await
                .unwrap();
        }
    });
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(first.history_len().await, 10);
    assert_eq!(second.history_len().await, 0);
    let id = RelationshipId::new(fixtures::RICK_CANDICE);
    assert_eq!(first.snapshot().await.relationship(&id).unwrap().stage().as_str(), "denial");
    assert_eq!(second.snapshot().await.relationship(&id).unwrap().stage().as_str(), "acceptance");
}

#[tokio::test]
async fn test_slow_generation_does_not_block_commits() {
    let project = Arc::new(Project::open(fixtures::config()).unwrap());
    let backend = Arc::new(
        MockBackend::new(vec![MockReply::compact("@c:rick_v1.0.0 CS_DEFLECT")])
            .with_delay(Duration::from_millis(100)),
    );

    let drafting = tokio::spawn({
        let project = Arc::clone(&project);
        let backend = Arc::clone(&backend);
        async move { project.draft(backend.as_ref(), &resist(), None).await.unwrap() }
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let report = project.validate_and_commit(resist()).await.unwrap();
    assert!(report.is_committed());
    assert_eq!(backend.calls().await, 1);

    let outcome = drafting.await.unwrap();
    let proposed = match outcome {
        GenerationOutcome::Proposed(scene) => scene,
        other => panic!("unexpected outcome {other:?}"),
    };
    let report = project.validate_and_commit(proposed).await.unwrap();
    assert!(report.is_committed());
    assert_eq!(project.history_len().await, 2);
}
