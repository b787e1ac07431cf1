//! Scalar reference distributions.
//!
//! Invalid parameter values and out-of-support values yield a log density of
//! `-inf`; drawing under invalid parameters is a numerical error.

use std::f64::consts::PI;

use rand::RngCore;
use rand_distr::Distribution as _;

use crate::engine::collaborators::{Distribution, Params};
use crate::engine::errors::ModelError;
use crate::engine::value::{Handle, NodeId};

/// Exponential distribution with a rate parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential {
    rate: Handle<f64>,
}

impl Exponential {
    pub fn new(rate: Handle<f64>) -> Self {
        Self { rate }
    }

    pub fn rate(&self) -> Handle<f64> {
        self.rate
    }
}

impl Distribution for Exponential {
    type Value = f64;

    fn name(&self) -> &'static str {
        "exponential"
    }

    fn parameters(&self) -> Vec<NodeId> {
        vec![self.rate.id()]
    }

    fn remap_parameters(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId) {
        self.rate.remap(remap);
    }

    fn ln_probability(&self, value: &f64, params: &Params<'_>) -> Result<f64, ModelError> {
        let rate = params.scalar(self.rate)?;
        if !(rate > 0.0) || !rate.is_finite() || *value < 0.0 {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(rate.ln() - rate * value)
    }

    fn draw(&self, params: &Params<'_>, rng: &mut dyn RngCore) -> Result<f64, ModelError> {
        let rate = params.scalar(self.rate)?;
        if !(rate > 0.0) || !rate.is_finite() {
            return Err(ModelError::Numerical(format!(
                "exponential: rate must be finite and > 0, got {}",
                rate
            )));
        }
        let exp = rand_distr::Exp::new(rate)
            .map_err(|e| ModelError::Numerical(format!("exponential: {}", e)))?;
        Ok(exp.sample(rng))
    }
}

/// Normal distribution with mean and standard deviation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normal {
    mean: Handle<f64>,
    sd: Handle<f64>,
}

impl Normal {
    pub fn new(mean: Handle<f64>, sd: Handle<f64>) -> Self {
        Self { mean, sd }
    }
}

impl Distribution for Normal {
    type Value = f64;

    fn name(&self) -> &'static str {
        "normal"
    }

    fn parameters(&self) -> Vec<NodeId> {
        vec![self.mean.id(), self.sd.id()]
    }

    fn remap_parameters(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId) {
        self.mean.remap(remap);
        self.sd.remap(remap);
    }

    fn ln_probability(&self, value: &f64, params: &Params<'_>) -> Result<f64, ModelError> {
        let mean = params.scalar(self.mean)?;
        let sd = params.scalar(self.sd)?;
        if !(sd > 0.0) || !sd.is_finite() || !value.is_finite() {
            return Ok(f64::NEG_INFINITY);
        }
        let z = (value - mean) / sd;
        Ok(-0.5 * (2.0 * PI).ln() - sd.ln() - 0.5 * z * z)
    }

    fn draw(&self, params: &Params<'_>, rng: &mut dyn RngCore) -> Result<f64, ModelError> {
        let mean = params.scalar(self.mean)?;
        let sd = params.scalar(self.sd)?;
        if !(sd > 0.0) || !sd.is_finite() || !mean.is_finite() {
            return Err(ModelError::Numerical(format!(
                "normal: invalid parameters mean = {}, sd = {}",
                mean, sd
            )));
        }
        let normal = rand_distr::Normal::new(mean, sd)
            .map_err(|e| ModelError::Numerical(format!("normal: {}", e)))?;
        Ok(normal.sample(rng))
    }
}

/// Continuous uniform distribution on `[lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uniform {
    lower: Handle<f64>,
    upper: Handle<f64>,
}

impl Uniform {
    pub fn new(lower: Handle<f64>, upper: Handle<f64>) -> Self {
        Self { lower, upper }
    }
}

impl Distribution for Uniform {
    type Value = f64;

    fn name(&self) -> &'static str {
        "uniform"
    }

    fn parameters(&self) -> Vec<NodeId> {
        vec![self.lower.id(), self.upper.id()]
    }

    fn remap_parameters(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId) {
        self.lower.remap(remap);
        self.upper.remap(remap);
    }

    fn ln_probability(&self, value: &f64, params: &Params<'_>) -> Result<f64, ModelError> {
        let lower = params.scalar(self.lower)?;
        let upper = params.scalar(self.upper)?;
        if !(lower < upper) || !(upper - lower).is_finite() {
            return Ok(f64::NEG_INFINITY);
        }
        if *value < lower || *value > upper {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(-(upper - lower).ln())
    }

    fn draw(&self, params: &Params<'_>, rng: &mut dyn RngCore) -> Result<f64, ModelError> {
        let lower = params.scalar(self.lower)?;
        let upper = params.scalar(self.upper)?;
        if !(lower < upper) || !(upper - lower).is_finite() {
            return Err(ModelError::Numerical(format!(
                "uniform: invalid bounds [{}, {}]",
                lower, upper
            )));
        }
        Ok(rand_distr::Uniform::new_inclusive(lower, upper).sample(rng))
    }
}
