//! Errors raised while executing an operation.

use crate::asg::{AsgError, NodeId, Shape};
use thiserror::Error;

/// Failure of a single operation. Raised at the operation site; nothing is
/// retried and no partial result is kept.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Graph error: {0}")]
    Asg(#[from] AsgError),

    #[error("Incompatible shapes for operation '{op}': left operand {lhs:?}, right operand {rhs:?}.")]
    IncompatibleShapes {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    #[error("Invalid tensor rank for '{op}': expected {expected}D, got {actual}D.")]
    InvalidRank {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Shape error: {0}")]
    ShapeError(String),

    #[error("Expected a single-element tensor, got shape {0:?}")]
    NotAScalar(Shape),

    #[error("Operands belong to different graph contexts")]
    ContextMismatch,

    #[error("Node {0} requires grad and cannot be modified in place while gradients are tracked")]
    InPlaceOnGradTensor(NodeId),

    #[error("Node {0} is not a leaf; only leaves can change requires_grad")]
    NotALeaf(NodeId),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
