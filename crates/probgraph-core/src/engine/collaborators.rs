//! # Collaborator Contracts
//!
//! Distributions and functions plug into the graph through the two traits in
//! this module. They own no topology: their parameters are node ids that the
//! graph mirrors as parent edges, and they read parent values through a
//! read-only [`Params`] view that the graph prepares before every call.
//!
//! ## Key Components
//!
//! - **Distribution**: log density and random draws for a stochastic node
//! - **Function**: derived value for a deterministic node
//! - **Params**: read access to the current values of parameter nodes

use std::any::TypeId;
use std::fmt;

use rand::RngCore;

use crate::engine::errors::ModelError;
use crate::engine::graph::ModelGraph;
use crate::engine::value::{downcast, DynValue, Handle, NodeId, Value};

/// Read-only view of parameter values handed to collaborators.
///
/// Every parent of the node being evaluated is up to date when a `Params`
/// is constructed.
#[derive(Clone, Copy)]
pub struct Params<'g> {
    graph: &'g ModelGraph,
}

impl<'g> Params<'g> {
    pub(crate) fn new(graph: &'g ModelGraph) -> Self {
        Self { graph }
    }

    /// Current value of a parameter node.
    pub fn value<T: Value>(&self, handle: Handle<T>) -> Result<&'g T, ModelError> {
        let id = handle.id();
        let value = self.graph.cached_value(id)?;
        downcast::<T>(value, id)
    }

    /// Current value of a parameter node as `f64`, the common case for scalar parameters.
    pub fn scalar(&self, handle: Handle<f64>) -> Result<f64, ModelError> {
        self.value(handle).copied()
    }
}

impl fmt::Debug for Params<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Params").finish_non_exhaustive()
    }
}

/// Probability distribution attached to a stochastic node.
///
/// Implementations must return `f64::NEG_INFINITY` for values outside the
/// support (or invalid parameter values) and must never return `NaN` for
/// in-support values.
pub trait Distribution: Clone + fmt::Debug + 'static {
    type Value: Value;

    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Parameter nodes, in declaration order.
    fn parameters(&self) -> Vec<NodeId>;

    /// Rewrites every parameter id through `remap`.
    fn remap_parameters(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId);

    /// Log density of `value` under the current parameter values.
    fn ln_probability(&self, value: &Self::Value, params: &Params<'_>) -> Result<f64, ModelError>;

    /// Draws a fresh value under the current parameter values.
    fn draw(&self, params: &Params<'_>, rng: &mut dyn RngCore) -> Result<Self::Value, ModelError>;

    /// Replaces one parameter with another node of the same value type.
    fn swap_parameter(&mut self, old: NodeId, new: NodeId) {
        self.remap_parameters(&mut |id| if id == old { new } else { id });
    }

    /// Whether a change of `parameter` can change the log density.
    fn is_sensitive_to(&self, _parameter: NodeId) -> bool {
        true
    }
}

/// Deterministic function attached to a deterministic node.
///
/// `update` must be pure in the parameter values: calling it twice without a
/// parameter change yields equal values.
pub trait Function: Clone + fmt::Debug + 'static {
    type Value: Value;

    fn name(&self) -> &'static str;

    fn parameters(&self) -> Vec<NodeId>;

    fn remap_parameters(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId);

    /// Computes the derived value from the current parameter values.
    fn update(&self, params: &Params<'_>) -> Result<Self::Value, ModelError>;

    fn swap_parameter(&mut self, old: NodeId, new: NodeId) {
        self.remap_parameters(&mut |id| if id == old { new } else { id });
    }

    /// Whether a change of `parameter` can change the derived value.
    fn is_sensitive_to(&self, _parameter: NodeId) -> bool {
        true
    }
}

/// Object-safe distribution stored inside stochastic nodes.
pub(crate) trait DynDistribution: fmt::Debug {
    fn label(&self) -> &'static str;
    fn value_type(&self) -> TypeId;
    fn remap(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId);
    fn ln_probability_of(
        &self,
        value: &dyn DynValue,
        node: NodeId,
        params: &Params<'_>,
    ) -> Result<f64, ModelError>;
    fn draw_value(
        &self,
        params: &Params<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Box<dyn DynValue>, ModelError>;
    fn sensitive_to(&self, parameter: NodeId) -> bool;
    fn clone_boxed(&self) -> Box<dyn DynDistribution>;
}

impl<D: Distribution> DynDistribution for D {
    fn label(&self) -> &'static str {
        Distribution::name(self)
    }

    fn value_type(&self) -> TypeId {
        TypeId::of::<D::Value>()
    }

    fn remap(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId) {
        Distribution::remap_parameters(self, remap)
    }

    fn ln_probability_of(
        &self,
        value: &dyn DynValue,
        node: NodeId,
        params: &Params<'_>,
    ) -> Result<f64, ModelError> {
        let value = downcast::<D::Value>(value, node)?;
        Distribution::ln_probability(self, value, params)
    }

    fn draw_value(
        &self,
        params: &Params<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Box<dyn DynValue>, ModelError> {
        let value = Distribution::draw(self, params, rng)?;
        Ok(Box::new(value))
    }

    fn sensitive_to(&self, parameter: NodeId) -> bool {
        Distribution::is_sensitive_to(self, parameter)
    }

    fn clone_boxed(&self) -> Box<dyn DynDistribution> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn DynDistribution> {
    fn clone(&self) -> Self {
        (**self).clone_boxed()
    }
}

/// Object-safe function stored inside deterministic nodes.
pub(crate) trait DynFunction: fmt::Debug {
    fn label(&self) -> &'static str;
    fn value_type(&self) -> TypeId;
    fn remap(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId);
    fn compute(&self, params: &Params<'_>) -> Result<Box<dyn DynValue>, ModelError>;
    fn sensitive_to(&self, parameter: NodeId) -> bool;
    fn clone_boxed(&self) -> Box<dyn DynFunction>;
}

impl<F: Function> DynFunction for F {
    fn label(&self) -> &'static str {
        Function::name(self)
    }

    fn value_type(&self) -> TypeId {
        TypeId::of::<F::Value>()
    }

    fn remap(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId) {
        Function::remap_parameters(self, remap)
    }

    fn compute(&self, params: &Params<'_>) -> Result<Box<dyn DynValue>, ModelError> {
        let value = Function::update(self, params)?;
        Ok(Box::new(value))
    }

    fn sensitive_to(&self, parameter: NodeId) -> bool {
        Function::is_sensitive_to(self, parameter)
    }

    fn clone_boxed(&self) -> Box<dyn DynFunction> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn DynFunction> {
    fn clone(&self) -> Self {
        (**self).clone_boxed()
    }
}
