//! Scalar reference functions for deterministic nodes.

use crate::engine::collaborators::{Function, Params};
use crate::engine::errors::ModelError;
use crate::engine::value::{Handle, NodeId};

/// Sum of scalar terms. A term listed twice counts twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sum {
    terms: Vec<Handle<f64>>,
}

impl Sum {
    pub fn new(terms: Vec<Handle<f64>>) -> Self {
        Self { terms }
    }
}

impl Function for Sum {
    type Value = f64;

    fn name(&self) -> &'static str {
        "sum"
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
        let mut total = 0.0;
        for &term in &self.terms {
            total += params.scalar(term)?;
        }
        Ok(total)
    }
}

/// Product of scalar factors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    factors: Vec<Handle<f64>>,
}

impl Product {
    pub fn new(factors: Vec<Handle<f64>>) -> Self {
        Self { factors }
    }
}

impl Function for Product {
    type Value = f64;

    fn name(&self) -> &'static str {
        "product"
    }

    fn parameters(&self) -> Vec<NodeId> {
        self.factors.iter().map(Handle::id).collect()
    }

    fn remap_parameters(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId) {
        for factor in &mut self.factors {
            factor.remap(remap);
        }
    }

    fn update(&self, params: &Params<'_>) -> Result<f64, ModelError> {
        let mut total = 1.0;
        for &factor in &self.factors {
            total *= params.scalar(factor)?;
        }
        Ok(total)
    }
}

/// `e^x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exp {
    arg: Handle<f64>,
}

impl Exp {
    pub fn new(arg: Handle<f64>) -> Self {
        Self { arg }
    }
}

impl Function for Exp {
    type Value = f64;

    fn name(&self) -> &'static str {
        "exp"
    }

    fn parameters(&self) -> Vec<NodeId> {
        vec![self.arg.id()]
    }

    fn remap_parameters(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId) {
        self.arg.remap(remap);
    }

    fn update(&self, params: &Params<'_>) -> Result<f64, ModelError> {
        Ok(params.scalar(self.arg)?.exp())
    }
}

/// `slope * x + intercept` with fixed coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    x: Handle<f64>,
    slope: f64,
    intercept: f64,
}

impl Affine {
    pub fn new(x: Handle<f64>, slope: f64, intercept: f64) -> Self {
        Self {
            x,
            slope,
            intercept,
        }
    }
}

impl Function for Affine {
    type Value = f64;

    fn name(&self) -> &'static str {
        "affine"
    }

    fn parameters(&self) -> Vec<NodeId> {
        vec![self.x.id()]
    }

    fn remap_parameters(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId) {
        self.x.remap(remap);
    }

    fn update(&self, params: &Params<'_>) -> Result<f64, ModelError> {
        Ok(self.slope * params.scalar(self.x)? + self.intercept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graph::ModelGraph;

    #[test]
    fn functions_compose_through_layers() {
        let mut g = ModelGraph::new();
        let a = g.add_constant("a", 2.0_f64).expect("a");
        let b = g.add_constant("b", 3.0_f64).expect("b");
        let sum = g.add_deterministic("sum", Sum::new(vec![a, b])).expect("sum");
        let prod = g.add_deterministic("prod", Product::new(vec![sum, a])).expect("prod");
        let lin = g.add_deterministic("lin", Affine::new(prod, 0.5, -1.0)).expect("lin");
        let e = g.add_deterministic("e", Exp::new(lin)).expect("e");

        assert_eq!(*g.value(sum).expect("sum"), 5.0);
        assert_eq!(*g.value(prod).expect("prod"), 10.0);
        assert_eq!(*g.value(lin).expect("lin"), 4.0);
        assert!((*g.value(e).expect("e") - 4.0_f64.exp()).abs() < 1e-12);

        g.set_constant(b, 1.0).expect("rebind");
        assert!((*g.value(e).expect("e") - 2.0_f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn parameter_type_mismatch_surfaces_on_read() {
        let mut g = ModelGraph::new();
        let n = g.add_constant("n", 4_i64).expect("n");
        let bad = g
            .add_deterministic("bad", Exp::new(Handle::from_id(n.id())))
            .expect("construction does not evaluate");
        assert!(matches!(g.value(bad), Err(ModelError::TypeMismatch(_))));
    }
}
