//! Relationship dynamics.
//!
//! Each relationship *type* ("mentor-mentee", "romantic", ...) declares a
//! directed graph of stages. Every relationship instance of that type runs
//! its own copy of the state machine and keeps an append-only history of the
//! transitions it took.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │ RelationshipGraph        │ shared │ RelationshipRecord       │
//! │ (stages, ordered edges,  │───────▶│ (pair, stage, history)   │
//! │  guards, unlock events)  │  read  │  one per character pair  │
//! └──────────────────────────┘  only  └──────────────────────────┘
//!               │                                  ▲
//!               ▼                                  │ apply
//!        RelationshipEngine::plan ───────▶ TransitionPlan
//! ```
//!
//! Symmetric types store one shared stage for a normalized pair. Directed
//! types key on the ordered pair; the other perspective is its own record.

mod engine;
mod graph;
mod record;

pub use engine::{GuardContext, RelationshipEngine, TransitionError, TransitionPlan};
pub use graph::{Edge, GraphError, Guard, PairRole, Recipients, RelationshipGraph, UnlockDirective};
pub use record::{
    Directionality, RelationshipId, RelationshipPair, RelationshipRecord, RelationshipType,
    TransitionRecord,
};
