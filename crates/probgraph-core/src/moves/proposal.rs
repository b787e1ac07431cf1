//! # Proposals
//!
//! A proposal mutates one or more stochastic nodes and reports the log
//! Hastings ratio of the change. It keeps just enough state to undo its most
//! recent change.
//!
//! ## Key Components
//!
//! - **Proposal**: the propose / undo / clean / tune contract driven by a move
//! - **TuningParameter**: a bounded step size adapted toward a target acceptance rate

use std::fmt;

use rand::RngCore;

use crate::engine::errors::ModelError;
use crate::engine::graph::ModelGraph;
use crate::engine::value::NodeId;

/// Target acceptance rate for single-parameter proposals.
pub const SINGLE_TARGET_ACCEPTANCE: f64 = 0.44;

/// Target acceptance rate for block proposals.
pub const BLOCK_TARGET_ACCEPTANCE: f64 = 0.234;

/// Smallest step size a tuned proposal may shrink to.
pub(crate) const MIN_TUNING_VALUE: f64 = 1e-8;

/// Contract between a move and the value generator it wraps.
pub trait Proposal: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Stochastic nodes this proposal mutates.
    fn nodes(&self) -> Vec<NodeId>;

    /// Bookkeeping before a new value is generated.
    fn prepare(&mut self, _graph: &mut ModelGraph, _rng: &mut dyn RngCore) -> Result<(), ModelError> {
        Ok(())
    }

    /// Sets new values through `ModelGraph::set_value` and returns the log
    /// Hastings ratio `ln(q(old | new) / q(new | old))`.
    fn propose(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<f64, ModelError>;

    /// Puts back the values stored by the last `propose`.
    fn undo(&mut self, graph: &mut ModelGraph) -> Result<(), ModelError>;

    /// Drops scratch state. Always safe to call.
    fn clean(&mut self) {}

    /// Adapts the tuning parameter to an observed acceptance rate.
    fn tune(&mut self, _acceptance_rate: f64) {}

    fn tuning_parameter(&self) -> Option<f64> {
        None
    }
}

/// Positive step size adapted toward a target acceptance rate.
///
/// The value lives in the closed interval `[lower, upper]` and may reach
/// either bound. A parameter whose natural domain is open, such as a
/// probability in `(0, 1)`, takes bounds strictly inside that domain.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TuningParameter {
    value: f64,
    lower: f64,
    upper: f64,
    target: f64,
}

impl TuningParameter {
    pub fn new(value: f64, lower: f64, upper: f64, target: f64) -> Result<Self, ModelError> {
        if !(lower > 0.0) || !(lower < upper) {
            return Err(ModelError::Validation(format!(
                "tuning parameter: bounds must satisfy 0 < lower < upper, got [{}, {}]",
                lower, upper
            )));
        }
        if !value.is_finite() || value < lower || value > upper {
            return Err(ModelError::Validation(format!(
                "tuning parameter: value {} outside [{}, {}]",
                value, lower, upper
            )));
        }
        if !(target > 0.0 && target < 1.0) {
            return Err(ModelError::Validation(format!(
                "tuning parameter: target acceptance must be in (0, 1), got {}",
                target
            )));
        }
        Ok(Self {
            value,
            lower,
            upper,
            target,
        })
    }

    /// Positive step size with the default lower bound and no upper bound.
    pub fn positive(value: f64, target: f64) -> Result<Self, ModelError> {
        Self::new(value, MIN_TUNING_VALUE, f64::INFINITY, target)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn with_target(self, target: f64) -> Result<Self, ModelError> {
        Self::new(self.value, self.lower, self.upper, target)
    }

    /// Grows the value when `acceptance_rate` exceeds the target and shrinks it
    /// otherwise, then clamps it to `[lower, upper]`. Non-finite rates are
    /// ignored.
    pub fn tune(&mut self, acceptance_rate: f64) {
        if !acceptance_rate.is_finite() {
            return;
        }
        let rate = acceptance_rate.clamp(0.0, 1.0);
        let target = self.target;
        let tuned = if rate > target {
            self.value * (1.0 + (rate - target) / (1.0 - target))
        } else {
            self.value / (2.0 - rate / target)
        };
        self.value = tuned.clamp(self.lower, self.upper);
    }
}
