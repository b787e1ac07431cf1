//! Shared fixtures for probgraph integration and property tests.

use std::cell::Cell;
use std::rc::Rc;

use probgraph_core::library::{Exponential, Normal, Sum};
use probgraph_core::{Function, Handle, ModelError, ModelGraph, NodeId, Params};

/// Sum that counts how often it is evaluated.
#[derive(Debug, Clone)]
pub struct CountingSum {
    terms: Vec<Handle<f64>>,
    evaluations: Rc<Cell<usize>>,
}

impl CountingSum {
    pub fn new(terms: Vec<Handle<f64>>) -> (Self, Rc<Cell<usize>>) {
        let evaluations = Rc::new(Cell::new(0));
        (
            Self {
                terms,
                evaluations: evaluations.clone(),
            },
            evaluations,
        )
    }
}

impl Function for CountingSum {
    type Value = f64;

    fn name(&self) -> &'static str {
        "counting-sum"
    }

    fn parameters(&self) -> Vec<NodeId> {
        self.terms.iter().map(Handle::id).collect()
    }

    fn remap_parameters(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId) {
        for term in &mut self.terms {
            term.remap(remap);
        }
    }

    fn update(&self, params: &Params<'_>) -> Result<f64, ModelError> {
        self.evaluations.set(self.evaluations.get() + 1);
        let mut total = 0.0;
        for &term in &self.terms {
            total += params.scalar(term)?;
        }
        Ok(total)
    }
}

/// Returns `first` and declares itself insensitive to `ignored`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstOf {
    pub first: Handle<f64>,
    pub ignored: Handle<f64>,
}

impl Function for FirstOf {
    type Value = f64;

    fn name(&self) -> &'static str {
        "first-of"
    }

    fn parameters(&self) -> Vec<NodeId> {
        vec![self.first.id(), self.ignored.id()]
    }

    fn remap_parameters(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId) {
        self.first.remap(remap);
        self.ignored.remap(remap);
    }

    fn update(&self, params: &Params<'_>) -> Result<f64, ModelError> {
        params.scalar(self.first)
    }

    fn is_sensitive_to(&self, parameter: NodeId) -> bool {
        parameter != self.ignored.id()
    }
}

/// Diamond `a → b, a → c, b → d, c → d` with a stochastic root and counting
/// functions on every deterministic node.
pub struct Diamond {
    pub graph: ModelGraph,
    pub a: Handle<f64>,
    pub b: Handle<f64>,
    pub c: Handle<f64>,
    pub d: Handle<f64>,
    pub b_evaluations: Rc<Cell<usize>>,
    pub c_evaluations: Rc<Cell<usize>>,
    pub d_evaluations: Rc<Cell<usize>>,
}

pub fn diamond() -> Result<Diamond, ModelError> {
    let mut graph = ModelGraph::new();
    let rate = graph.add_constant("rate", 1.0_f64)?;
    let a = graph.add_stochastic("a", Exponential::new(rate), 1.0)?;
    let (b_fn, b_evaluations) = CountingSum::new(vec![a]);
    let b = graph.add_deterministic("b", b_fn)?;
    let (c_fn, c_evaluations) = CountingSum::new(vec![a, a]);
    let c = graph.add_deterministic("c", c_fn)?;
    let (d_fn, d_evaluations) = CountingSum::new(vec![b, c]);
    let d = graph.add_deterministic("d", d_fn)?;
    Ok(Diamond {
        graph,
        a,
        b,
        c,
        d,
        b_evaluations,
        c_evaluations,
        d_evaluations,
    })
}

/// Hierarchical normal model: `mu ~ N(0, 10)`, `y_i ~ N(mu + shift, 1)` observed.
pub struct NormalMean {
    pub graph: ModelGraph,
    pub mu: Handle<f64>,
    pub shift: Handle<f64>,
    pub location: Handle<f64>,
    pub observations: Vec<Handle<f64>>,
}

pub fn normal_mean(data: &[f64]) -> Result<NormalMean, ModelError> {
    let mut graph = ModelGraph::new();
    let zero = graph.add_constant("zero", 0.0_f64)?;
    let ten = graph.add_constant("ten", 10.0_f64)?;
    let one = graph.add_constant("one", 1.0_f64)?;
    let shift = graph.add_constant("shift", 0.0_f64)?;
    let mu = graph.add_stochastic("mu", Normal::new(zero, ten), 0.0)?;
    let location = graph.add_deterministic("location", Sum::new(vec![mu, shift]))?;

    let mut observations = Vec::with_capacity(data.len());
    for (i, &value) in data.iter().enumerate() {
        let y = graph.add_stochastic(&format!("y{}", i), Normal::new(location, one), value)?;
        graph.clamp(y, &value)?;
        graph.keep(y.id())?;
        observations.push(y);
    }
    Ok(NormalMean {
        graph,
        mu,
        shift,
        location,
        observations,
    })
}

/// Closed-form exponential log density.
pub fn exponential_ln_pdf(rate: f64, x: f64) -> f64 {
    if x < 0.0 {
        f64::NEG_INFINITY
    } else {
        rate.ln() - rate * x
    }
}
