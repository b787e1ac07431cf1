//! The model graph engine.
//!
//! This module provides:
//! - **errors**: Error types for construction, evaluation and move failures
//! - **value**: Node ids, typed handles and type-erased value slots
//! - **collaborators**: Distribution and function contracts
//! - **graph**: Node arena, construction, typed access and mutation
//! - **protocol**: Touch / keep / restore propagation and lazy evaluation
//! - **model**: Assembly of an independent model from sink nodes

pub mod collaborators;
pub mod errors;
pub mod graph;
pub mod model;
pub mod protocol;
pub mod value;
