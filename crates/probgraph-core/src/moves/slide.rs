//! Sliding-window proposal.

use rand::{Rng, RngCore};

use crate::engine::errors::ModelError;
use crate::engine::graph::ModelGraph;
use crate::engine::value::{Handle, NodeId};
use crate::moves::proposal::{Proposal, TuningParameter, SINGLE_TARGET_ACCEPTANCE};

/// Shifts one scalar node by `delta * (u - 0.5)`, `u ~ U(0, 1)`.
///
/// Symmetric, so the log Hastings ratio is 0.
#[derive(Debug, Clone)]
pub struct SlideProposal {
    node: Handle<f64>,
    delta: TuningParameter,
    stored: Option<f64>,
}

impl SlideProposal {
    pub fn new(node: Handle<f64>, delta: f64) -> Result<Self, ModelError> {
        Ok(Self {
            node,
            delta: TuningParameter::positive(delta, SINGLE_TARGET_ACCEPTANCE)?,
            stored: None,
        })
    }

    pub fn with_target(mut self, target: f64) -> Result<Self, ModelError> {
        self.delta = self.delta.with_target(target)?;
        Ok(self)
    }

    pub fn delta(&self) -> f64 {
        self.delta.value()
    }
}

impl Proposal for SlideProposal {
    fn name(&self) -> &'static str {
        "slide"
    }

    fn nodes(&self) -> Vec<NodeId> {
        vec![self.node.id()]
    }

    fn propose(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<f64, ModelError> {
        let old = *graph.value(self.node)?;
        let u: f64 = rng.gen();
        self.stored = Some(old);
        graph.set_value(self.node, old + self.delta.value() * (u - 0.5))?;
        Ok(0.0)
    }

    fn undo(&mut self, graph: &mut ModelGraph) -> Result<(), ModelError> {
        if let Some(old) = self.stored {
            graph.set_value(self.node, old)?;
        }
        Ok(())
    }

    fn clean(&mut self) {
        self.stored = None;
    }

    fn tune(&mut self, acceptance_rate: f64) {
        self.delta.tune(acceptance_rate);
    }

    fn tuning_parameter(&self) -> Option<f64> {
        Some(self.delta.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Normal;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn slide_stays_within_window() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut g = ModelGraph::new();
        let mu = g.add_constant("mu", 0.0_f64).expect("mu");
        let sd = g.add_constant("sd", 1.0_f64).expect("sd");
        let x = g.add_stochastic("x", Normal::new(mu, sd), 0.0).expect("x");

        let mut proposal = SlideProposal::new(x, 0.5).expect("proposal");
        for _ in 0..50 {
            assert_eq!(proposal.propose(&mut g, &mut rng).expect("propose"), 0.0);
            assert!(g.value(x).expect("x").abs() <= 0.25);
            proposal.undo(&mut g).expect("undo");
            g.restore(x.id()).expect("restore");
            proposal.clean();
        }
        assert_eq!(*g.value(x).expect("x"), 0.0);
    }
}
