//! # Probgraph Core
//!
//! Probabilistic model graphs of constant, stochastic and deterministic nodes
//! with lazy re-evaluation and Metropolis-Hastings moves.

#![forbid(unsafe_code)]

pub mod engine;
pub mod library;
pub mod metrics;
pub mod moves;

// Re-export commonly used types
pub use engine::collaborators::{Distribution, Function, Params};
pub use engine::errors::ModelError;
pub use engine::graph::{ModelGraph, NodeKind};
pub use engine::model::Model;
pub use engine::value::{Handle, NodeId, Value};
pub use moves::{Heats, MetropolisHastingsMove, MoveConfig, MoveRatios, Proposal};
