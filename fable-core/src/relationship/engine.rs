//! Relationship state machine execution.

use super::graph::{Guard, PairRole, RelationshipGraph};
use super::record::{Directionality, RelationshipId, RelationshipRecord, TransitionRecord};
use crate::character::{CharacterId, CharacterState, StageId};
use crate::scene::SceneId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from advancing a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("No transition from stage '{stage}' on '{trigger}' for relationship {relationship}")]
    NoMatchingTransition {
        relationship: RelationshipId,
        stage: StageId,
        trigger: String,
    },

    #[error("Plan for {planned} from '{from}' does not fit {relationship} at '{stage}'")]
    StalePlan {
        relationship: RelationshipId,
        stage: StageId,
        planned: RelationshipId,
        from: StageId,
    },
}

/// Read-only view of both characters in a relationship.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    first: &'a CharacterState,
    second: &'a CharacterState,
}

impl<'a> GuardContext<'a> {
    pub fn new(first: &'a CharacterState, second: &'a CharacterState) -> Self {
        Self { first, second }
    }

    pub fn character(&self, role: PairRole) -> &'a CharacterState {
        match role {
            PairRole::First => self.first,
            PairRole::Second => self.second,
        }
    }

    /// The same pair with the roles exchanged.
    pub fn swapped(&self) -> Self {
        Self {
            first: self.second,
            second: self.first,
        }
    }
}

/// A transition the engine has decided to take, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPlan {
    pub relationship: RelationshipId,
    pub from: StageId,
    pub trigger: String,
    pub to: StageId,
    pub edge_index: usize,
    /// Unlock events to forward, per recipient, in declaration order.
    pub unlocks: Vec<(CharacterId, String)>,
}

/// Runs relationship state machines.
///
/// Edges are tried in declaration order and the first one whose guard holds
/// is taken, so the same event sequence always yields the same history.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipEngine;

impl RelationshipEngine {
    pub fn new() -> Self {
        Self
    }

    /// Pick the transition `trigger` would take, without mutating anything.
    pub fn plan(
        &self,
        graph: &RelationshipGraph,
        record: &RelationshipRecord,
        trigger: &str,
        ctx: &GuardContext<'_>,
    ) -> Result<TransitionPlan, TransitionError> {
        let stage = record.stage();
        let holds = |guard: &Guard| match graph.directionality {
            Directionality::Directed => guard.evaluate(ctx),
            Directionality::Symmetric => guard.evaluate(ctx) && guard.evaluate(&ctx.swapped()),
        };
        let taken = graph
            .candidates(stage, trigger)
            .find(|(_, edge)| edge.guard.as_ref().map_or(true, |g| holds(g)));

        let Some((edge_index, edge)) = taken else {
            return Err(TransitionError::NoMatchingTransition {
                relationship: record.id().clone(),
                stage: stage.clone(),
                trigger: trigger.to_string(),
            });
        };

        let pair = record.pair();
        let unlocks = edge
            .unlocks
            .iter()
            .flat_map(|directive| {
                directive.recipients.roles().iter().map(move |role| {
                    let character = match role {
                        PairRole::First => pair.first().clone(),
                        PairRole::Second => pair.second().clone(),
                    };
                    (character, directive.event.clone())
                })
            })
            .collect();

        Ok(TransitionPlan {
            relationship: record.id().clone(),
            from: stage.clone(),
            trigger: trigger.to_string(),
            to: edge.to.clone(),
            edge_index,
            unlocks,
        })
    }

    /// Apply a plan made against this record's current stage.
    ///
    /// A plan for another relationship, or one whose `from` is no longer the
    /// record's stage, is refused and the record is left as it was.
    pub fn apply(
        &self,
        record: &mut RelationshipRecord,
        plan: &TransitionPlan,
        sequence: u64,
        scene: Option<SceneId>,
    ) -> Result<(), TransitionError> {
        if plan.relationship != *record.id() || plan.from != *record.stage() {
            return Err(TransitionError::StalePlan {
                relationship: record.id().clone(),
                stage: record.stage().clone(),
                planned: plan.relationship.clone(),
                from: plan.from.clone(),
            });
        }
        debug!(
            relationship = %record.id(),
            from = %plan.from,
            to = %plan.to,
            trigger = %plan.trigger,
            sequence,
            "relationship transition"
        );
        record.record_transition(TransitionRecord {
            sequence,
            from: plan.from.clone(),
            trigger: plan.trigger.clone(),
            to: plan.to.clone(),
            edge_index: plan.edge_index,
            scene,
        });
        Ok(())
    }

    /// Plan and apply in one step. On error the record is untouched.
    ///
    /// The returned plan's `unlocks` still have to be forwarded to the
    /// progression engine by the caller, which owns the characters.
    pub fn advance(
        &self,
        graph: &RelationshipGraph,
        record: &mut RelationshipRecord,
        trigger: &str,
        ctx: &GuardContext<'_>,
        sequence: u64,
    ) -> Result<TransitionPlan, TransitionError> {
        let plan = self.plan(graph, record, trigger, ctx)?;
        self.apply(record, &plan, sequence, None)?;
        Ok(plan)
    }
}
