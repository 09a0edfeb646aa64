//! Testing utilities.
//!
//! This module provides tools for integration testing:
//! - `fixtures` for the canonical two-character project
//! - `MockBackend` for deterministic generation without a real drafter
//! - `init_tracing` to see engine logs in test output

use crate::codec::DescriptiveScene;
use crate::generation::{Draft, GenerationBackend, GenerationError, GenerationRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber filtered by `RUST_LOG`. Safe to call
/// from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// The rick/candice project used across the tests.
pub mod fixtures {
    use crate::character::{ContextValue, VoiceSignature};
    use crate::config::{CharacterDecl, ProjectConfig, RelationshipDecl, UnlockDecl};
    use crate::relationship::{Directionality, Edge, Guard, PairRole, Recipients, RelationshipGraph};

    pub const PROJECT: &str = "garage-days";
    pub const RICK: &str = "rick_v1.0.0";
    pub const CANDICE: &str = "candice";
    pub const RICK_CANDICE: &str = "rick-candice";
    pub const MENTOR_MENTEE: &str = "mentor-mentee";

    /// Directed: rick mentors candice.
    ///
    /// ```text
    /// denial --trust_building_event [candice.trust >= 0.5]--> acceptance  (rick: candice_earns_trust)
    /// acceptance --conflict_event--> conflict
    /// conflict --reconciliation_event--> acceptance                        (candice: rick_opens_up)
    /// conflict --betrayal_event--> denial
    /// ```
    pub fn mentor_mentee() -> RelationshipGraph {
        RelationshipGraph::new(
            MENTOR_MENTEE,
            Directionality::Directed,
            ["denial".into(), "acceptance".into(), "conflict".into()],
            "denial",
        )
        .with_edge(
            Edge::new("denial", "trust_building_event", "acceptance")
                .with_guard(Guard::ModifierAtLeast {
                    role: PairRole::Second,
                    key: "trust".to_string(),
                    value: 0.5,
                })
                .unlocking("candice_earns_trust", Recipients::First),
        )
        .with_edge(Edge::new("acceptance", "conflict_event", "conflict"))
        .with_edge(
            Edge::new("conflict", "reconciliation_event", "acceptance")
                .unlocking("rick_opens_up", Recipients::Second),
        )
        .with_edge(Edge::new("conflict", "betrayal_event", "denial"))
    }

    pub fn rick() -> CharacterDecl {
        CharacterDecl::new(RICK, "Rick", &["denial", "acceptance"], "denial")
            .with_essence("washed-up guitarist hiding behind sarcasm")
            .with_vocabulary(&["CS_RESIST", "CS_ACCEPT", "CS_DEFLECT", "DL_BITTER_QUIP"])
            .with_locked(&["CS_ACCEPT"])
            .with_unlock(
                "candice_earns_trust",
                UnlockDecl::new(&["CS_ACCEPT"]).advancing_to("acceptance"),
            )
            .with_voice(
                VoiceSignature::new("bitter_humor + metaphor_heavy", "terse + deflective")
                    .with_phrase("Whatever.")
                    .with_phrase("Not my problem.")
                    .with_emotion("anger", 0.8)
                    .with_emotion("joy", 0.3),
            )
            .with_modifier("dependency", ContextValue::Number(0.7))
    }

    pub fn candice() -> CharacterDecl {
        CharacterDecl::new(CANDICE, "Candice", &["guarded", "open"], "guarded")
            .with_essence("new drummer with something to prove")
            .with_vocabulary(&["CS_DEFLECT", "DL_INTERROGATE", "DL_CONFESSION"])
            .with_locked(&["DL_CONFESSION"])
            .with_unlock(
                "rick_opens_up",
                UnlockDecl::new(&["DL_CONFESSION"]).advancing_to("open"),
            )
            .with_voice(
                VoiceSignature::new("earnest", "direct + curious")
                    .with_phrase("Be straight with me.")
                    .with_emotion("curiosity", 0.9)
                    .with_emotion("anger", 0.5),
            )
            .with_modifier("trust", ContextValue::Number(0.6))
    }

    /// The full project, in strict unlock mode.
    pub fn config() -> ProjectConfig {
        ProjectConfig::new(PROJECT)
            .with_strict_unlock_events(true)
            .with_relationship_type(mentor_mentee())
            .with_character(rick())
            .with_character(candice())
            .with_relationship(RelationshipDecl::new(
                RICK_CANDICE,
                RICK,
                CANDICE,
                MENTOR_MENTEE,
            ))
    }
}

/// A scripted backend reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Draft(Draft),
    Fail(String),
    /// Never answers; exercises timeouts and cancellation.
    Hang,
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Draft(Draft::Text(text.into()))
    }

    pub fn scene(scene: DescriptiveScene) -> Self {
        MockReply::Draft(Draft::Scene(scene))
    }

    pub fn compact(wire: impl Into<String>) -> Self {
        MockReply::Draft(Draft::Compact(wire.into()))
    }
}

/// A generation backend that returns scripted replies in order.
///
/// Use this for deterministic tests without a real drafter.
#[derive(Debug, Default)]
pub struct MockBackend {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<GenerationRequest>>,
    delay: Option<Duration>,
}

impl MockBackend {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Wait this long before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Add a reply to the queue.
    pub async fn queue(&self, reply: MockReply) {
        self.replies.lock().await.push_back(reply);
    }

    /// Number of requests received so far.
    pub async fn calls(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// All requests received so far.
    pub async fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<Draft, GenerationError> {
        self.requests.lock().await.push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.replies.lock().await.pop_front();
        match reply {
            Some(MockReply::Draft(draft)) => Ok(draft),
            Some(MockReply::Fail(message)) => Err(GenerationError::Backend(message)),
            Some(MockReply::Hang) => futures::future::pending().await,
            None => Err(GenerationError::Backend(
                "no more scripted replies".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_config_is_valid() {
        init_tracing();
        let (catalog, state) = fixtures::config().build().unwrap();
        assert!(catalog.graph(&fixtures::MENTOR_MENTEE.into()).is_some());
        assert!(state.character(&fixtures::RICK.into()).is_some());
        assert!(state.character(&fixtures::CANDICE.into()).is_some());
    }

    #[tokio::test]
    async fn test_mock_backend_runs_dry() {
        let backend = MockBackend::new(vec![MockReply::text("one")]);
        backend.queue(MockReply::Fail("two".to_string())).await;

        let request = GenerationRequest {
            project: fixtures::PROJECT.to_string(),
            prompt: String::new(),
            scene: crate::codec::ExpandedScene {
                title: None,
                supersedes: None,
                beats: Vec::new(),
            },
        };
        assert!(backend.generate(request.clone()).await.is_ok());
        assert!(backend.generate(request.clone()).await.is_err());
        assert!(matches!(
            backend.generate(request).await,
            Err(GenerationError::Backend(_))
        ));
        assert_eq!(backend.calls().await, 3);
    }
}
