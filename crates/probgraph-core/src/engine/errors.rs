//! Error types for model construction, evaluation and moves.

use thiserror::Error;

use crate::engine::value::NodeId;

/// Errors that can occur while building, evaluating or updating a model graph.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in the future without breaking changes.
///
/// Domain violations of a distribution (a value outside its support) are not
/// errors: they surface as a `-inf` log-probability and are consumed by the
/// acceptance arithmetic. All public APIs return `Result<T, ModelError>` to
/// avoid panics in library code.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ModelError {
    /// Structural error while wiring the graph (cycles, duplicate names, bad parameters).
    #[error("construction error: {0}")]
    Construction(String),

    /// A typed access or assignment disagreed with the node's value type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// An operation was invoked in a state where it is not allowed
    /// (e.g., redrawing a clamped node, accepting a move that was never performed).
    #[error("misuse: {0}")]
    Misuse(String),

    /// A collaborator failed to produce a number or a value.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Invalid configuration (weights, tuning parameters, heats).
    #[error("validation error: {0}")]
    Validation(String),

    /// The node id does not refer to a live node.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Internal invariant failure (programmer error, not user error).
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_category_prefix() {
        let err = ModelError::Construction("cycle through #3".into());
        assert_eq!(err.to_string(), "construction error: cycle through #3");

        let err = ModelError::UnknownNode(NodeId(7));
        assert_eq!(err.to_string(), "unknown node #7");
    }
}
