//! Multiplicative proposals.
//!
//! Both proposals draw `u ~ U(0, 1)` and a scaling factor `s = exp(lambda * (u - 0.5))`.

use rand::{Rng, RngCore};

use crate::engine::errors::ModelError;
use crate::engine::graph::ModelGraph;
use crate::engine::value::{Handle, NodeId};
use crate::moves::proposal::{
    Proposal, TuningParameter, BLOCK_TARGET_ACCEPTANCE, SINGLE_TARGET_ACCEPTANCE,
};

fn draw_ln_scale(lambda: f64, rng: &mut dyn RngCore) -> f64 {
    let u: f64 = rng.gen();
    lambda * (u - 0.5)
}

/// Multiplies one positive scalar node by a random factor.
///
/// The log Hastings ratio is `ln(s)`.
#[derive(Debug, Clone)]
pub struct ScaleProposal {
    node: Handle<f64>,
    lambda: TuningParameter,
    stored: Option<f64>,
}

impl ScaleProposal {
    pub fn new(node: Handle<f64>, lambda: f64) -> Result<Self, ModelError> {
        Ok(Self {
            node,
            lambda: TuningParameter::positive(lambda, SINGLE_TARGET_ACCEPTANCE)?,
            stored: None,
        })
    }

    pub fn with_target(mut self, target: f64) -> Result<Self, ModelError> {
        self.lambda = self.lambda.with_target(target)?;
        Ok(self)
    }

    pub fn lambda(&self) -> f64 {
        self.lambda.value()
    }
}

impl Proposal for ScaleProposal {
    fn name(&self) -> &'static str {
        "scale"
    }

    fn nodes(&self) -> Vec<NodeId> {
        vec![self.node.id()]
    }

    fn propose(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<f64, ModelError> {
        let old = *graph.value(self.node)?;
        let ln_scale = draw_ln_scale(self.lambda.value(), rng);
        self.stored = Some(old);
        graph.set_value(self.node, old * ln_scale.exp())?;
        Ok(ln_scale)
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
        self.lambda.tune(acceptance_rate);
    }

    fn tuning_parameter(&self) -> Option<f64> {
        Some(self.lambda.value())
    }
}

/// Scales one block of nodes up and another down by the same factor.
///
/// The log Hastings ratio is `(n_up - n_down) * ln(s)`.
#[derive(Debug, Clone)]
pub struct UpDownScaleProposal {
    up: Vec<Handle<f64>>,
    down: Vec<Handle<f64>>,
    lambda: TuningParameter,
    stored: Vec<(Handle<f64>, f64)>,
}

impl UpDownScaleProposal {
    pub fn new(
        up: Vec<Handle<f64>>,
        down: Vec<Handle<f64>>,
        lambda: f64,
    ) -> Result<Self, ModelError> {
        if up.is_empty() && down.is_empty() {
            return Err(ModelError::Validation(
                "up-down scale: at least one node must be scaled".into(),
            ));
        }
        let mut seen = rustc_hash::FxHashSet::default();
        for handle in up.iter().chain(&down) {
            if !seen.insert(handle.id()) {
                return Err(ModelError::Validation(format!(
                    "up-down scale: node {} listed more than once",
                    handle.id()
                )));
            }
        }
        Ok(Self {
            up,
            down,
            lambda: TuningParameter::positive(lambda, BLOCK_TARGET_ACCEPTANCE)?,
            stored: Vec::new(),
        })
    }

    pub fn with_target(mut self, target: f64) -> Result<Self, ModelError> {
        self.lambda = self.lambda.with_target(target)?;
        Ok(self)
    }

    pub fn lambda(&self) -> f64 {
        self.lambda.value()
    }
}

impl Proposal for UpDownScaleProposal {
    fn name(&self) -> &'static str {
        "up-down-scale"
    }

    fn nodes(&self) -> Vec<NodeId> {
        self.up.iter().chain(&self.down).map(Handle::id).collect()
    }

    fn propose(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<f64, ModelError> {
        let ln_scale = draw_ln_scale(self.lambda.value(), rng);
        let scale = ln_scale.exp();
        self.stored.clear();

        for &node in &self.up {
            let old = *graph.value(node)?;
            self.stored.push((node, old));
            graph.set_value(node, old * scale)?;
        }
        for &node in &self.down {
            let old = *graph.value(node)?;
            self.stored.push((node, old));
            graph.set_value(node, old / scale)?;
        }

        let net = self.up.len() as f64 - self.down.len() as f64;
        Ok(net * ln_scale)
    }

    fn undo(&mut self, graph: &mut ModelGraph) -> Result<(), ModelError> {
        for &(node, old) in self.stored.iter().rev() {
            graph.set_value(node, old)?;
        }
        Ok(())
    }

    fn clean(&mut self) {
        self.stored.clear();
    }

    fn tune(&mut self, acceptance_rate: f64) {
        self.lambda.tune(acceptance_rate);
    }

    fn tuning_parameter(&self) -> Option<f64> {
        Some(self.lambda.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Exponential;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn scale_hastings_matches_factor() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut g = ModelGraph::new();
        let rate = g.add_constant("rate", 1.0_f64).expect("rate");
        let x = g.add_stochastic("x", Exponential::new(rate), 2.0).expect("x");

        let mut proposal = ScaleProposal::new(x, 1.0).expect("proposal");
        let ln_h = proposal.propose(&mut g, &mut rng).expect("propose");
        let new = *g.value(x).expect("x");
        assert!((new / 2.0 - ln_h.exp()).abs() < 1e-12);
        assert!(ln_h.abs() <= 0.5);

        proposal.undo(&mut g).expect("undo");
        g.restore(x.id()).expect("restore");
        assert_eq!(*g.value(x).expect("x"), 2.0);
    }

    #[test]
    fn up_down_hastings_counts_net_direction() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut g = ModelGraph::new();
        let rate = g.add_constant("rate", 1.0_f64).expect("rate");
        let a = g.add_stochastic("a", Exponential::new(rate), 1.0).expect("a");
        let b = g.add_stochastic("b", Exponential::new(rate), 1.0).expect("b");
        let c = g.add_stochastic("c", Exponential::new(rate), 4.0).expect("c");

        let mut proposal =
            UpDownScaleProposal::new(vec![a, b], vec![c], 0.8).expect("proposal");
        let ln_h = proposal.propose(&mut g, &mut rng).expect("propose");
        let scale = *g.value(a).expect("a");
        assert!((ln_h - scale.ln()).abs() < 1e-12);
        assert!((*g.value(c).expect("c") * scale - 4.0).abs() < 1e-12);

        proposal.undo(&mut g).expect("undo");
        assert_eq!(*g.value(c).expect("c"), 4.0);
        assert_eq!(*g.value(b).expect("b"), 1.0);
    }

    #[test]
    fn up_down_rejects_overlapping_blocks() {
        let mut g = ModelGraph::new();
        let rate = g.add_constant("rate", 1.0_f64).expect("rate");
        let a = g.add_stochastic("a", Exponential::new(rate), 1.0).expect("a");
        assert!(UpDownScaleProposal::new(vec![a], vec![a], 1.0).is_err());
        assert!(UpDownScaleProposal::new(vec![], vec![], 1.0).is_err());
    }
}
