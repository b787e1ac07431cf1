//! Proposals and Metropolis-Hastings moves.
//!
//! This module provides:
//! - **proposal**: the `Proposal` contract and bounded tuning parameters
//! - **scale**: multiplicative single-node and up-down block proposals
//! - **slide**: symmetric sliding-window proposal
//! - **acceptance**: heats, move ratios and the acceptance test
//! - **mh_move**: the weighted, tunable move driving propose / accept / reject

pub mod acceptance;
pub mod mh_move;
pub mod proposal;
pub mod scale;
pub mod slide;

pub use acceptance::{is_computable, metropolis_hastings_accepts, Heats, MoveRatios};
pub use mh_move::{MetropolisHastingsMove, MoveConfig, MoveState, MoveStats};
pub use proposal::{
    Proposal, TuningParameter, BLOCK_TARGET_ACCEPTANCE, SINGLE_TARGET_ACCEPTANCE,
};
pub use scale::{ScaleProposal, UpDownScaleProposal};
pub use slide::SlideProposal;
