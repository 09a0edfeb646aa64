//! Consistency and progression engine for long-form fiction.
//!
//! This crate provides:
//! - A closed pattern vocabulary for character behavior, dialogue and scene composition
//! - Characters with progression locks that gate which patterns they may exhibit
//! - Relationship state machines declared per relationship type
//! - All-or-nothing scene validation against the current story state
//! - A codec between pattern-token scenes and descriptive drafts
//! - Project persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use fable_core::{PatternToken, Project, ProjectConfig, Scene, SceneEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProjectConfig::load("garage-days.json").await?;
//!     let project = Project::open(config)?;
//!
//!     let scene = Scene::new()
//!         .with_event(SceneEvent::character("rick_v1.0.0", PatternToken::parse("CS_RESIST")?));
//!     let report = project.validate_and_commit(scene).await?;
//!     for violation in &report.violations {
//!         println!("{violation}");
//!     }
//!
//!     project.save("garage-days.save.json").await?;
//!     Ok(())
//! }
//! ```

pub mod character;
pub mod codec;
pub mod config;
pub mod generation;
pub mod history;
pub mod patterns;
pub mod persist;
pub mod progression;
pub mod project;
pub mod relationship;
pub mod scene;
pub mod state;
pub mod testing;
pub mod validator;

// Primary public API
pub use character::{CharacterId, CharacterState, ContextValue, StageId, VoiceSignature};
pub use codec::{Ambiguity, CompressedScene, DescriptiveScene, ExpandedScene, SceneCodec};
pub use config::{Catalog, CharacterDecl, ConfigError, ProjectConfig, RelationshipDecl};
pub use generation::{Draft, GenerationBackend, GenerationError, GenerationOutcome};
pub use history::{AcceptedScene, StoryHistory};
pub use patterns::{PatternKind, PatternRegistry, PatternToken};
pub use progression::{ProgressionEngine, UnlockNotification};
pub use project::{Project, ProjectError};
pub use relationship::{RelationshipEngine, RelationshipGraph, RelationshipId};
pub use scene::{Scene, SceneEvent, SceneId, SceneTarget};
pub use state::StoryState;
pub use testing::{MockBackend, MockReply};
pub use validator::{ConsistencyValidator, ValidationError, ValidationReport, Violation, Warning};
