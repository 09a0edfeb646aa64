//! Generation backend boundary.
//!
//! The backend drafts prose or new scenes from an expanded scene. It is
//! called outside any lock, under a timeout, and can be aborted. Whatever it
//! returns comes back as a *proposal*: nothing here touches story state.

use crate::codec::{CompressedScene, DescriptiveScene, ExpandedScene};
use crate::scene::Scene;
use async_trait::async_trait;
use futures::future::Abortable;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use futures::future::{AbortHandle, AbortRegistration};

/// Errors from a generation call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Generation timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Generation was cancelled")]
    Cancelled,
}

/// What the backend is asked to draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub project: String,
    /// Plain-text rendering of `scene`.
    pub prompt: String,
    pub scene: ExpandedScene,
}

/// What the backend produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "draft", rename_all = "snake_case")]
pub enum Draft {
    /// Free-form prose.
    Text(String),
    /// A drafted scene in descriptive form.
    Scene(DescriptiveScene),
    /// A drafted scene in the compact wire form.
    Compact(String),
}

/// The result of a drafting round, as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// A complete scene, ready to be validated.
    Proposed(Scene),
    /// A drafted scene with beats that could not be placed.
    Ambiguous(CompressedScene),
    /// Prose only.
    Text(String),
    /// Nothing usable was produced.
    NoScene { reason: String },
}

impl GenerationOutcome {
    /// The proposed scene, if one was produced in full.
    pub fn scene(&self) -> Option<&Scene> {
        match self {
            GenerationOutcome::Proposed(scene) => Some(scene),
            _ => None,
        }
    }
}

/// A service that drafts from expanded scenes.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Draft, GenerationError>;
}

/// Call `backend` with a timeout and an optional abort handle.
pub async fn run_generation(
    backend: &dyn GenerationBackend,
    request: GenerationRequest,
    timeout: Duration,
    abort: Option<AbortRegistration>,
) -> Result<Draft, GenerationError> {
    let call = async move {
        match abort {
            Some(registration) => Abortable::new(backend.generate(request), registration)
                .await
                .unwrap_or(Err(GenerationError::Cancelled)),
            None => backend.generate(request).await,
        }
    };

    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(draft)) => Ok(draft),
        Ok(Err(err)) => {
            warn!(error = %err, "generation failed");
            Err(err)
        }
        Err(_) => {
            warn!(?timeout, "generation timed out");
            Err(GenerationError::TimedOut(timeout))
        }
    }
}
