//! # Metropolis-Hastings Move
//!
//! Wraps a [`Proposal`] with a selection weight, acceptance statistics and
//! auto-tuning, and drives the propose / accept / reject cycle on a graph.
//!
//! State machine: `Idle → Proposed → (accept | reject) → Idle`. Only one
//! proposal may be in flight per move.

use rand::RngCore;
use rustc_hash::FxHashSet;

use crate::engine::errors::ModelError;
use crate::engine::graph::{ModelGraph, NodeKind};
use crate::engine::value::NodeId;
use crate::moves::acceptance::{metropolis_hastings_accepts, Heats, MoveRatios};
use crate::moves::proposal::Proposal;

/// Configuration of a move.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MoveConfig {
    /// Relative selection weight used by a driver.
    pub weight: f64,
    /// Whether `auto_tune` adapts the proposal at the end of a tuning period.
    pub auto_tune: bool,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            weight: 1.0,
            auto_tune: true,
        }
    }
}

impl MoveConfig {
    pub fn validate(self) -> Result<Self, ModelError> {
        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(ModelError::Validation(format!(
                "move: weight must be finite and > 0, got {}",
                self.weight
            )));
        }
        Ok(self)
    }
}

/// Acceptance counters, for the whole run and for the current tuning period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MoveStats {
    pub tried_total: u64,
    pub accepted_total: u64,
    pub tried_period: u64,
    pub accepted_period: u64,
}

impl MoveStats {
    pub fn acceptance_rate(&self) -> f64 {
        ratio(self.accepted_total, self.tried_total)
    }

    pub fn period_acceptance_rate(&self) -> f64 {
        ratio(self.accepted_period, self.tried_period)
    }
}

fn ratio(accepted: u64, tried: u64) -> f64 {
    if tried == 0 {
        0.0
    } else {
        accepted as f64 / tried as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MoveState {
    Idle,
    Proposed,
}

/// A weighted, tunable Metropolis-Hastings move.
#[derive(Debug)]
pub struct MetropolisHastingsMove {
    proposal: Box<dyn Proposal>,
    config: MoveConfig,
    nodes: Vec<NodeId>,
    affected: Vec<NodeId>,
    stats: MoveStats,
    state: MoveState,
}

impl MetropolisHastingsMove {
    /// Creates a move over the nodes declared by `proposal`.
    ///
    /// Every node must be an unclamped stochastic node of `graph`.
    pub fn new<P: Proposal + 'static>(
        graph: &ModelGraph,
        proposal: P,
        config: MoveConfig,
    ) -> Result<Self, ModelError> {
        let config = config.validate()?;
        let mut nodes = proposal.nodes();
        let mut seen = FxHashSet::default();
        nodes.retain(|id| seen.insert(*id));
        if nodes.is_empty() {
            return Err(ModelError::Validation(format!(
                "move: proposal '{}' declares no nodes",
                proposal.name()
            )));
        }
        for &id in &nodes {
            if graph.kind(id)? != NodeKind::Stochastic {
                return Err(ModelError::Misuse(format!(
                    "move: node {} is not stochastic",
                    id
                )));
            }
            if graph.is_clamped(id)? {
                return Err(ModelError::Misuse(format!(
                    "move: node {} is clamped to observed data",
                    id
                )));
            }
        }
        let affected = collect_affected(graph, &nodes)?;

        Ok(Self {
            proposal: Box::new(proposal),
            config,
            nodes,
            affected,
            stats: MoveStats::default(),
            state: MoveState::Idle,
        })
    }

    pub fn name(&self) -> &'static str {
        self.proposal.name()
    }

    pub fn proposal(&self) -> &dyn Proposal {
        self.proposal.as_ref()
    }

    pub fn weight(&self) -> f64 {
        self.config.weight
    }

    pub fn config(&self) -> MoveConfig {
        self.config
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Stochastic nodes whose log-probability the last `perform` re-evaluated,
    /// excluding the mutated nodes themselves.
    pub fn affected_nodes(&self) -> &[NodeId] {
        &self.affected
    }

    pub fn stats(&self) -> MoveStats {
        self.stats
    }

    pub fn state(&self) -> MoveState {
        self.state
    }

    /// Fraction of all tried proposals that were accepted.
    pub fn acceptance_probability(&self) -> f64 {
        self.stats.acceptance_rate()
    }

    /// Runs the proposal and evaluates the change.
    ///
    /// On success the move is `Proposed` and the graph carries the proposed
    /// state until `accept` or `reject`. On failure the graph is rolled back
    /// and the move stays `Idle`.
    ///
    /// Refuses with `Misuse` while any of its nodes or affected nodes carries
    /// another outstanding change.
    pub fn perform(
        &mut self,
        graph: &mut ModelGraph,
        rng: &mut dyn RngCore,
    ) -> Result<MoveRatios, ModelError> {
        if self.state != MoveState::Idle {
            return Err(ModelError::Misuse(format!(
                "move '{}': perform called while a proposal is outstanding",
                self.name()
            )));
        }
        self.affected = collect_affected(graph, &self.nodes)?;
        for &id in self.nodes.iter().chain(&self.affected) {
            if graph.is_touched(id)? {
                return Err(ModelError::Misuse(format!(
                    "move '{}': node {} already has an outstanding change",
                    self.name(),
                    id
                )));
            }
        }
        self.stats.tried_total += 1;
        self.stats.tried_period += 1;

        match self.propose_and_evaluate(graph, rng) {
            Ok(ratios) => {
                self.state = MoveState::Proposed;
                Ok(ratios)
            }
            Err(err) => {
                if let Err(_rollback) = self.roll_back(graph) {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        "move '{}': rollback after failed proposal also failed: {}",
                        self.name(),
                        _rollback
                    );
                }
                Err(err)
            }
        }
    }

    fn propose_and_evaluate(
        &mut self,
        graph: &mut ModelGraph,
        rng: &mut dyn RngCore,
    ) -> Result<MoveRatios, ModelError> {
        self.proposal.prepare(graph, rng)?;
        let ln_hastings_ratio = self.proposal.propose(graph, rng)?;
        for &id in &self.nodes {
            graph.touch(id)?;
        }

        let mut ln_prior_ratio = 0.0;
        let mut ln_likelihood_ratio = 0.0;
        for &id in self.nodes.iter().chain(&self.affected) {
            let ratio = graph.ln_probability_ratio(id)?;
            if graph.is_clamped(id)? {
                ln_likelihood_ratio += ratio;
            } else {
                ln_prior_ratio += ratio;
            }
        }

        Ok(MoveRatios {
            ln_prior_ratio,
            ln_likelihood_ratio,
            ln_hastings_ratio,
        })
    }

    /// Commits the outstanding proposal.
    pub fn accept(&mut self, graph: &mut ModelGraph) -> Result<(), ModelError> {
        self.expect_proposed("accept")?;
        for &id in &self.nodes {
            graph.keep(id)?;
        }
        self.proposal.clean();
        self.stats.accepted_total += 1;
        self.stats.accepted_period += 1;
        self.state = MoveState::Idle;
        Ok(())
    }

    /// Undoes the outstanding proposal and restores every touched node.
    pub fn reject(&mut self, graph: &mut ModelGraph) -> Result<(), ModelError> {
        self.expect_proposed("reject")?;
        self.state = MoveState::Idle;
        self.roll_back(graph)
    }

    fn roll_back(&mut self, graph: &mut ModelGraph) -> Result<(), ModelError> {
        let undone = self.proposal.undo(graph);
        let mut restored = Ok(());
        for &id in &self.nodes {
            if let Err(err) = graph.restore(id) {
                restored = Err(err);
            }
        }
        self.proposal.clean();
        undone.and(restored)
    }

    fn expect_proposed(&self, operation: &str) -> Result<(), ModelError> {
        if self.state != MoveState::Proposed {
            return Err(ModelError::Misuse(format!(
                "move '{}': {} called without an outstanding proposal",
                self.name(),
                operation
            )));
        }
        Ok(())
    }

    /// One complete Metropolis-Hastings step. Returns whether the proposal was accepted.
    pub fn perform_mcmc_step(
        &mut self,
        graph: &mut ModelGraph,
        heats: Heats,
        rng: &mut dyn RngCore,
    ) -> Result<bool, ModelError> {
        let ratios = self.perform(graph, rng)?;
        let accepted = if ratios.is_computable() {
            metropolis_hastings_accepts(ratios.ln_acceptance(&heats), rng)
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                "move '{}': non-computable ratios {:?}, rejecting",
                self.name(),
                ratios
            );
            false
        };
        self.finish(graph, accepted)?;
        Ok(accepted)
    }

    /// Greedy step: accepts iff the heated posterior does not decrease.
    pub fn perform_hill_climbing_step(
        &mut self,
        graph: &mut ModelGraph,
        heats: Heats,
        rng: &mut dyn RngCore,
    ) -> Result<bool, ModelError> {
        let ratios = self.perform(graph, rng)?;
        let ln_posterior = ratios.ln_posterior_ratio(&heats);
        let accepted = ratios.is_computable() && ln_posterior.is_finite() && ln_posterior >= 0.0;
        self.finish(graph, accepted)?;
        Ok(accepted)
    }

    fn finish(&mut self, graph: &mut ModelGraph, accepted: bool) -> Result<(), ModelError> {
        if accepted {
            self.accept(graph)
        } else {
            self.reject(graph)
        }
    }

    /// Adapts the proposal to an explicit acceptance rate.
    pub fn tune(&mut self, acceptance_rate: f64) {
        self.proposal.tune(acceptance_rate);
    }

    /// Adapts the proposal to the current period's acceptance rate (when
    /// auto-tuning is enabled) and starts a new period.
    pub fn auto_tune(&mut self) {
        if self.config.auto_tune && self.stats.tried_period > 0 {
            let rate = self.stats.period_acceptance_rate();
            self.proposal.tune(rate);
            #[cfg(feature = "tracing")]
            tracing::debug!(
                "move '{}': tuned to {:?} at acceptance rate {:.3}",
                self.name(),
                self.proposal.tuning_parameter(),
                rate
            );
        }
        self.reset_period();
    }

    pub fn reset_period(&mut self) {
        self.stats.tried_period = 0;
        self.stats.accepted_period = 0;
    }

    pub fn reset_counters(&mut self) {
        self.stats = MoveStats::default();
    }
}

/// Union of the affected sets of `nodes`, excluding `nodes`, in discovery order.
fn collect_affected(graph: &ModelGraph, nodes: &[NodeId]) -> Result<Vec<NodeId>, ModelError> {
    let mut seen: FxHashSet<NodeId> = nodes.iter().copied().collect();
    let mut affected = Vec::new();
    for &id in nodes {
        for node in graph.affected_nodes(id)? {
            if seen.insert(node) {
                affected.push(node);
            }
        }
    }
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{Exponential, Normal, Sum};
    use crate::moves::{ScaleProposal, SlideProposal};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn normal_model() -> (ModelGraph, crate::Handle<f64>, crate::Handle<f64>) {
        let mut g = ModelGraph::new();
        let zero = g.add_constant("zero", 0.0_f64).expect("zero");
        let one = g.add_constant("one", 1.0_f64).expect("one");
        let mu = g.add_stochastic("mu", Normal::new(zero, one), 0.0).expect("mu");
        let y = g.add_stochastic("y", Normal::new(mu, one), 1.5).expect("y");
        g.clamp(y, &1.5).expect("clamp");
        g.keep(y.id()).expect("keep");
        (g, mu, y)
    }

    #[test]
    fn construction_validates_nodes_and_weight() {
        let (g, mu, y) = normal_model();
        let on_clamped = MetropolisHastingsMove::new(
            &g,
            SlideProposal::new(y, 1.0).expect("slide"),
            MoveConfig::default(),
        );
        assert!(matches!(on_clamped, Err(ModelError::Misuse(_))));

        let bad_weight = MetropolisHastingsMove::new(
            &g,
            SlideProposal::new(mu, 1.0).expect("slide"),
            MoveConfig {
                weight: 0.0,
                ..MoveConfig::default()
            },
        );
        assert!(matches!(bad_weight, Err(ModelError::Validation(_))));

        let mv = MetropolisHastingsMove::new(
            &g,
            SlideProposal::new(mu, 1.0).expect("slide"),
            MoveConfig::default(),
        )
        .expect("move");
        assert_eq!(mv.nodes(), &[mu.id()]);
        assert_eq!(mv.affected_nodes(), &[y.id()]);
    }

    #[test]
    fn ratios_split_prior_and_likelihood() {
        let mut rng = StdRng::seed_from_u64(17);
        let (mut g, mu, y) = normal_model();
        let prior_before = g.ln_probability(mu.id()).expect("prior");
        let lik_before = g.ln_probability(y.id()).expect("likelihood");

        let mut mv = MetropolisHastingsMove::new(
            &g,
            SlideProposal::new(mu, 1.0).expect("slide"),
            MoveConfig::default(),
        )
        .expect("move");
        let ratios = mv.perform(&mut g, &mut rng).expect("perform");
        assert_eq!(mv.state(), MoveState::Proposed);

        let prior_after = g.ln_probability(mu.id()).expect("prior");
        let lik_after = g.ln_probability(y.id()).expect("likelihood");
        assert!((ratios.ln_prior_ratio - (prior_after - prior_before)).abs() < 1e-12);
        assert!((ratios.ln_likelihood_ratio - (lik_after - lik_before)).abs() < 1e-12);
        assert_eq!(ratios.ln_hastings_ratio, 0.0);

        mv.reject(&mut g).expect("reject");
        assert_eq!(*g.value(mu).expect("mu"), 0.0);
        assert!(g.touched_nodes().is_empty());
        assert_eq!(mv.stats().tried_total, 1);
        assert_eq!(mv.stats().accepted_total, 0);
    }

    #[test]
    fn state_machine_rejects_out_of_order_calls() {
        let mut rng = StdRng::seed_from_u64(2);
        let (mut g, mu, _y) = normal_model();
        let mut mv = MetropolisHastingsMove::new(
            &g,
            ScaleProposal::new(mu, 0.5).expect("scale"),
            MoveConfig::default(),
        )
        .expect("move");

        assert!(matches!(mv.accept(&mut g), Err(ModelError::Misuse(_))));
        assert!(matches!(mv.reject(&mut g), Err(ModelError::Misuse(_))));
        mv.perform(&mut g, &mut rng).expect("perform");
        assert!(matches!(
            mv.perform(&mut g, &mut rng),
            Err(ModelError::Misuse(_))
        ));
        mv.accept(&mut g).expect("accept");
        assert_eq!(mv.state(), MoveState::Idle);
        assert_eq!(mv.acceptance_probability(), 1.0);
    }

    #[test]
    fn failed_proposal_rolls_back() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut g = ModelGraph::new();
        let rate = g.add_constant("rate", 1.0_f64).expect("rate");
        let x = g.add_stochastic("x", Exponential::new(rate), 1.0).expect("x");
        let mut mv = MetropolisHastingsMove::new(
            &g,
            ScaleProposal::new(x, 0.5).expect("scale"),
            MoveConfig::default(),
        )
        .expect("move");

        g.clamp(x, &1.0).expect("clamp after construction");
        g.keep(x.id()).expect("keep");
        let err = mv.perform(&mut g, &mut rng).unwrap_err();
        assert!(matches!(err, ModelError::Misuse(_)));
        assert_eq!(mv.state(), MoveState::Idle);
        assert!(g.touched_nodes().is_empty());
        assert_eq!(*g.value(x).expect("x"), 1.0);
    }

    #[test]
    fn affected_set_follows_rewiring() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut g = ModelGraph::new();
        let rate = g.add_constant("rate", 1.0_f64).expect("rate");
        let x = g.add_stochastic("x", Exponential::new(rate), 1.0).expect("x");
        let s = g.add_deterministic("s", Sum::new(vec![x])).expect("s");
        let y = g.add_stochastic("y", Exponential::new(rate), 1.0).expect("y");
        let mut mv = MetropolisHastingsMove::new(
            &g,
            ScaleProposal::new(x, 0.5).expect("scale"),
            MoveConfig::default(),
        )
        .expect("move");
        assert!(mv.affected_nodes().is_empty());

        g.swap_parameter(y.id(), rate.id(), s.id()).expect("swap");
        g.keep(y.id()).expect("keep");
        mv.perform(&mut g, &mut rng).expect("perform");
        assert_eq!(mv.affected_nodes(), &[y.id()]);
        mv.reject(&mut g).expect("reject");
    }

    #[test]
    fn auto_tune_uses_period_rate_and_resets_period() {
        let mut rng = StdRng::seed_from_u64(13);
        let (mut g, mu, _y) = normal_model();
        let mut mv = MetropolisHastingsMove::new(
            &g,
            ScaleProposal::new(mu, 1.0).expect("scale"),
            MoveConfig::default(),
        )
        .expect("move");

        for _ in 0..10 {
            mv.perform(&mut g, &mut rng).expect("perform");
            mv.accept(&mut g).expect("accept");
        }
        mv.auto_tune();
        assert!(mv.proposal().tuning_parameter().expect("lambda") > 1.0);
        assert_eq!(mv.stats().tried_period, 0);
        assert_eq!(mv.stats().tried_total, 10);
    }
}
