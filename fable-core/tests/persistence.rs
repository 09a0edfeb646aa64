//! Save/load tests: a resumed project continues exactly where it stopped.

use fable_core::persist::{list_saves, project_save_path, PersistError, SavedProject};
use fable_core::testing::{fixtures, init_tracing};
use fable_core::{PatternToken, Project, ProjectError, RelationshipId, Scene, SceneEvent};
use tempfile::TempDir;

fn token(raw: &str) -> PatternToken {
    PatternToken::parse(raw).expect("valid token")
}

#[tokio::test]
async fn test_resume_keeps_history_and_locks() {
    init_tracing();
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = project_save_path(temp_dir.path(), fixtures::PROJECT);

    let project = Project::open(fixtures::config()).unwrap();
    let scene = Scene::new()
        .titled("First rehearsal")
        .with_event(SceneEvent::relationship(fixtures::RICK_CANDICE, token("RS_TRUST_BUILDING")))
        .with_event(SceneEvent::character(fixtures::RICK, token("CS_ACCEPT")));
    assert!(project.validate_and_commit(scene).await.unwrap().is_committed());
    project.save(&path).await.unwrap();
    let closed = project.close().await;

    let resumed = Project::load(&path).await.unwrap();
    let snapshot = resumed.snapshot().await;
    assert_eq!(*snapshot, closed);

    let record = snapshot
        .relationship(&RelationshipId::new(fixtures::RICK_CANDICE))
        .unwrap();
    assert_eq!(record.stage().as_str(), "acceptance");
    assert_eq!(record.history().len(), 1);
    assert!(resumed
        .patterns_available(&fixtures::RICK.into())
        .await
        .unwrap()
        .contains(&token("CS_ACCEPT")));

    // The resumed project keeps numbering scenes and transitions.
    let next = Scene::new().with_event(SceneEvent::relationship(
        fixtures::RICK_CANDICE,
        token("RS_CONFLICT"),
    ));
    let report = resumed.validate_and_commit(next).await.unwrap();
    assert_eq!(report.scene_id.map(|id| id.0), Some(2));
    assert_eq!(resumed.snapshot().await.sequence(), 2);
}

#[tokio::test]
async fn test_list_saves_across_projects() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    for name in ["alpha", "beta"] {
        let mut config = fixtures::config();
        config.name = name.to_string();
        let project = Project::open(config).unwrap();
        project
            .save(project_save_path(temp_dir.path(), name))
            .await
            .unwrap();
    }
    tokio::fs::write(temp_dir.path().join("notes.json"), "{}")
        .await
        .unwrap();

    let saves = list_saves(temp_dir.path()).await.unwrap();
    let mut names: Vec<String> = saves.into_iter().map(|s| s.metadata.project).collect();
    names.sort();
    assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
}

#[tokio::test]
async fn test_save_with_unknown_scene_target_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("tampered.json");

    let project = Project::open(fixtures::config()).unwrap();
    let scene = Scene::new().with_event(SceneEvent::character(fixtures::RICK, token("CS_RESIST")));
    project.validate_and_commit(scene).await.unwrap();
    project.save(&path).await.unwrap();

    let content = tokio::fs::read_to_string(&path).await.unwrap();
    let mut json: serde_json::Value = serde_json::from_str(&content).unwrap();
    json["state"]["history"]["scenes"][0]["scene"]["events"][0]["target"]["id"] =
        serde_json::Value::String("morty".to_string());
    tokio::fs::write(&path, json.to_string()).await.unwrap();

    let err = Project::load(&path).await.unwrap_err();
    assert!(matches!(
        err,
        ProjectError::Persist(PersistError::Integrity(_))
    ));
    assert!(SavedProject::peek_metadata(&path).await.is_ok());
}
