//! Relationship-type state machine graphs.

use super::engine::GuardContext;
use super::record::{Directionality, RelationshipType};
use crate::character::{ContextValue, StageId};
use crate::patterns::PatternToken;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors found when checking a graph declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Graph declares no stages")]
    NoStages,

    #[error("Stage '{0}' is declared twice")]
    DuplicateStage(StageId),

    #[error("Initial stage '{0}' is not declared")]
    UndeclaredInitialStage(StageId),

    #[error("Edge {edge} references undeclared stage '{stage}'")]
    UndeclaredStage { edge: usize, stage: StageId },

    #[error("Edge {edge} has an empty trigger")]
    EmptyTrigger { edge: usize },

    #[error("Edge {edge} can never fire: edge {by} already matches ({stage}, {trigger}) unconditionally")]
    ShadowedEdge {
        edge: usize,
        by: usize,
        stage: StageId,
        trigger: String,
    },

    #[error("Edge {edge} duplicates edge {of}")]
    DuplicateEdge { edge: usize, of: usize },

    #[error("Edge {edge} fires '{event}' for one side of a symmetric relationship")]
    OneSidedUnlock { edge: usize, event: String },
}

/// Which side of a pair a guard or unlock refers to.
///
/// For directed relationships `First` is the source and `Second` the target.
/// Symmetric pairs have no sides: their guards must hold with the roles
/// either way round, and their unlocks must go to both members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairRole {
    First,
    Second,
}

/// A condition evaluated against both characters' current states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Guard {
    StageIs { role: PairRole, stage: StageId },
    PatternAvailable { role: PairRole, pattern: PatternToken },
    PatternLocked { role: PairRole, pattern: PatternToken },
    ModifierAtLeast { role: PairRole, key: String, value: f64 },
    ModifierAtMost { role: PairRole, key: String, value: f64 },
    ModifierEquals { role: PairRole, key: String, value: ContextValue },
    All { guards: Vec<Guard> },
    Any { guards: Vec<Guard> },
    Not { guard: Box<Guard> },
}

impl Guard {
    /// Evaluate against the pair's states. Missing modifiers never satisfy
    /// a comparison.
    pub fn evaluate(&self, ctx: &GuardContext<'_>) -> bool {
        match self {
            Guard::StageIs { role, stage } => ctx.character(*role).current_stage() == stage,
            Guard::PatternAvailable { role, pattern } => ctx
                .character(*role)
                .progression_locks()
                .available_patterns()
                .contains(pattern),
            Guard::PatternLocked { role, pattern } => ctx
                .character(*role)
                .progression_locks()
                .locked_patterns()
                .contains(pattern),
            Guard::ModifierAtLeast { role, key, value } => ctx
                .character(*role)
                .modifier(key)
                .and_then(ContextValue::as_number)
                .is_some_and(|n| n >= *value),
            Guard::ModifierAtMost { role, key, value } => ctx
                .character(*role)
                .modifier(key)
                .and_then(ContextValue::as_number)
                .is_some_and(|n| n <= *value),
            Guard::ModifierEquals { role, key, value } => {
                ctx.character(*role).modifier(key) == Some(value)
            }
            Guard::All { guards } => guards.iter().all(|g| g.evaluate(ctx)),
            Guard::Any { guards } => guards.iter().any(|g| g.evaluate(ctx)),
            Guard::Not { guard } => !guard.evaluate(ctx),
        }
    }

    /// Pattern tokens this guard mentions.
    pub fn patterns(&self) -> BTreeSet<&PatternToken> {
        let mut found = BTreeSet::new();
        self.collect_patterns(&mut found);
        found
    }

    fn collect_patterns<'a>(&'a self, found: &mut BTreeSet<&'a PatternToken>) {
        match self {
            Guard::PatternAvailable { pattern, .. } | Guard::PatternLocked { pattern, .. } => {
                found.insert(pattern);
            }
            Guard::All { guards } | Guard::Any { guards } => {
                for guard in guards {
                    guard.collect_patterns(found);
                }
            }
            Guard::Not { guard } => guard.collect_patterns(found),
            _ => {}
        }
    }
}

/// Which characters an unlock directive targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipients {
    First,
    Second,
    Both,
}

impl Recipients {
    pub fn roles(&self) -> &'static [PairRole] {
        match self {
            Recipients::First => &[PairRole::First],
            Recipients::Second => &[PairRole::Second],
            Recipients::Both => &[PairRole::First, PairRole::Second],
        }
    }
}

/// An unlock event fired when an edge is taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockDirective {
    pub event: String,
    pub recipients: Recipients,
}

/// A transition: `from --trigger [guard]--> to`, optionally firing unlocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: StageId,
    pub trigger: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
    pub to: StageId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unlocks: Vec<UnlockDirective>,
}

impl Edge {
    pub fn new(from: impl Into<StageId>, trigger: impl Into<String>, to: impl Into<StageId>) -> Self {
        Self {
            from: from.into(),
            trigger: trigger.into(),
            guard: None,
            to: to.into(),
            unlocks: Vec::new(),
        }
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn unlocking(mut self, event: impl Into<String>, recipients: Recipients) -> Self {
        self.unlocks.push(UnlockDirective {
            event: event.into(),
            recipients,
        });
        self
    }

    fn matches(&self, stage: &StageId, trigger: &str) -> bool {
        &self.from == stage && self.trigger == trigger
    }
}

/// The declared state machine for one relationship type.
///
/// Edges are kept in declaration order, which is also their precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipGraph {
    pub relationship_type: RelationshipType,
    pub directionality: Directionality,
    pub stages: Vec<StageId>,
    pub initial_stage: StageId,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl RelationshipGraph {
    pub fn new(
        relationship_type: impl Into<RelationshipType>,
        directionality: Directionality,
        stages: impl IntoIterator<Item = StageId>,
        initial_stage: impl Into<StageId>,
    ) -> Self {
        Self {
            relationship_type: relationship_type.into(),
            directionality,
            stages: stages.into_iter().collect(),
            initial_stage: initial_stage.into(),
            edges: Vec::new(),
        }
    }

    /// Append an edge with the lowest precedence so far.
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn has_stage(&self, stage: &StageId) -> bool {
        self.stages.contains(stage)
    }

    /// Edges leaving `stage` on `trigger`, in precedence order.
    pub fn candidates<'a>(
        &'a self,
        stage: &'a StageId,
        trigger: &'a str,
    ) -> impl Iterator<Item = (usize, &'a Edge)> + 'a {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, edge)| edge.matches(stage, trigger))
    }

    /// Every trigger the graph responds to.
    pub fn triggers(&self) -> BTreeSet<&str> {
        self.edges.iter().map(|e| e.trigger.as_str()).collect()
    }

    /// Check stages, edge endpoints and edge precedence.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.stages.is_empty() {
            return Err(GraphError::NoStages);
        }
        let mut seen = BTreeSet::new();
        for stage in &self.stages {
            if !seen.insert(stage) {
                return Err(GraphError::DuplicateStage(stage.clone()));
            }
        }
        if !self.has_stage(&self.initial_stage) {
            return Err(GraphError::UndeclaredInitialStage(self.initial_stage.clone()));
        }

        for (i, edge) in self.edges.iter().enumerate() {
            for stage in [&edge.from, &edge.to] {
                if !self.has_stage(stage) {
                    return Err(GraphError::UndeclaredStage {
                        edge: i,
                        stage: stage.clone(),
                    });
                }
            }
            if edge.trigger.trim().is_empty() {
                return Err(GraphError::EmptyTrigger { edge: i });
            }
            if self.directionality == Directionality::Symmetric {
                if let Some(directive) = edge
                    .unlocks
                    .iter()
                    .find(|d| d.recipients != Recipients::Both)
                {
                    return Err(GraphError::OneSidedUnlock {
                        edge: i,
                        event: directive.event.clone(),
                    });
                }
            }

            // An earlier edge on the same (stage, trigger) wins if it has no
            // guard or the same guard, so this one would be dead.
            for (j, earlier) in self.edges[..i].iter().enumerate() {
                if !earlier.matches(&edge.from, &edge.trigger) {
                    continue;
                }
                match (&earlier.guard, &edge.guard) {
                    (None, None) => return Err(GraphError::DuplicateEdge { edge: i, of: j }),
                    (None, Some(_)) => {
                        return Err(GraphError::ShadowedEdge {
                            edge: i,
                            by: j,
                            stage: edge.from.clone(),
                            trigger: edge.trigger.clone(),
                        })
                    }
                    (Some(a), Some(b)) if a == b => {
                        return Err(GraphError::DuplicateEdge { edge: i, of: j })
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle_graph() -> RelationshipGraph {
        RelationshipGraph::new(
            "rivals",
            Directionality::Symmetric,
            ["cold".into(), "feud".into(), "truce".into()],
            "cold",
        )
        .with_edge(Edge::new("cold", "insult", "feud"))
        .with_edge(Edge::new("feud", "apology", "truce"))
        .with_edge(Edge::new("truce", "insult", "feud"))
    }

    #[test]
    fn test_cycles_are_valid() {
        assert_eq!(cycle_graph().validate(), Ok(()));
    }

    #[test]
    fn test_undeclared_stage() {
        let graph = cycle_graph().with_edge(Edge::new("truce", "wedding", "married"));
        assert_eq!(
            graph.validate(),
            Err(GraphError::UndeclaredStage {
                edge: 3,
                stage: "married".into()
            })
        );
    }

    #[test]
    fn test_undeclared_initial_stage() {
        let graph = RelationshipGraph::new("x", Directionality::Directed, ["a".into()], "b");
        assert_eq!(
            graph.validate(),
            Err(GraphError::UndeclaredInitialStage("b".into()))
        );
    }

    #[test]
    fn test_shadowed_edge_rejected() {
        let guard = Guard::ModifierAtLeast {
            role: PairRole::First,
            key: "trust".to_string(),
            value: 0.5,
        };
        let graph = cycle_graph().with_edge(Edge::new("cold", "insult", "truce").with_guard(guard));
        assert!(matches!(
            graph.validate(),
            Err(GraphError::ShadowedEdge { edge: 3, by: 0, .. })
        ));
    }

    #[test]
    fn test_guarded_then_fallback_is_valid() {
        let guard = Guard::ModifierAtLeast {
            role: PairRole::First,
            key: "trust".to_string(),
            value: 0.5,
        };
        let graph = RelationshipGraph::new(
            "x",
            Directionality::Directed,
            ["a".into(), "b".into(), "c".into()],
            "a",
        )
        .with_edge(Edge::new("a", "go", "b").with_guard(guard))
        .with_edge(Edge::new("a", "go", "c"));
        assert_eq!(graph.validate(), Ok(()));

        let stage = StageId::new("a");
        let order: Vec<usize> = graph.candidates(&stage, "go").map(|(i, _)| i).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_one_sided_unlock_on_symmetric_graph_rejected() {
        let graph = cycle_graph().with_edge(
            Edge::new("truce", "apology", "cold").unlocking("forgiven", Recipients::First),
        );
        assert_eq!(
            graph.validate(),
            Err(GraphError::OneSidedUnlock {
                edge: 3,
                event: "forgiven".to_string()
            })
        );

        let graph = cycle_graph().with_edge(
            Edge::new("truce", "apology", "cold").unlocking("forgiven", Recipients::Both),
        );
        assert_eq!(graph.validate(), Ok(()));
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let graph = cycle_graph().with_edge(Edge::new("feud", "apology", "cold"));
        assert_eq!(
            graph.validate(),
            Err(GraphError::DuplicateEdge { edge: 3, of: 1 })
        );
    }

    #[test]
    fn test_guard_serde_shape() {
        let guard = Guard::All {
            guards: vec![
                Guard::StageIs {
                    role: PairRole::First,
                    stage: "denial".into(),
                },
                Guard::Not {
                    guard: Box::new(Guard::PatternLocked {
                        role: PairRole::Second,
                        pattern: PatternToken::parse("CS_ACCEPT").unwrap(),
                    }),
                },
            ],
        };
        let json = serde_json::to_value(&guard).unwrap();
        assert_eq!(json["kind"], "all");
        assert_eq!(json["guards"][0]["kind"], "stage_is");
        let back: Guard = serde_json::from_value(json).unwrap();
        assert_eq!(back, guard);
        assert_eq!(back.patterns().len(), 1);
    }
}
