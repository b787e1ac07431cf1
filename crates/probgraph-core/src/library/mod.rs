//! Reference distributions and functions.
//!
//! A small scalar set that exercises the engine end to end; richer catalogues
//! implement [`Distribution`](crate::engine::collaborators::Distribution) and
//! [`Function`](crate::engine::collaborators::Function) outside this crate.

mod distributions;
mod functions;

pub use distributions::{Exponential, Normal, Uniform};
pub use functions::{Affine, Exp, Product, Sum};
