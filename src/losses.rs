//! Loss functions.
//!
//! Loss functions here are regular Rust functions over `Tensor`s. They run
//! eagerly and record their operations, so the returned 0-d tensor can be
//! backpropagated directly.

use crate::runtime::{RuntimeError, RuntimeResult};
use crate::tensor::Tensor;

fn squared_error(y_pred: &Tensor, y_true: &Tensor) -> RuntimeResult<Tensor> {
    let (pred_shape, true_shape) = (y_pred.shape()?, y_true.shape()?);
    if pred_shape != true_shape {
        return Err(RuntimeError::IncompatibleShapes {
            op: "mse_loss",
            lhs: pred_shape,
            rhs: true_shape,
        });
    }
    let error = (y_pred - y_true)?;
    &error * &error
}

/// Mean Squared Error.
///
/// Formula: `MSE = mean((y_pred - y_true)^2)`.
///
/// The shapes must match exactly; broadcasting a target against the
/// prediction is rejected rather than silently averaged.
pub fn mse_loss(y_pred: &Tensor, y_true: &Tensor) -> RuntimeResult<Tensor> {
    squared_error(y_pred, y_true)?.mean()
}

/// Summed squared error, `sum((y_pred - y_true)^2)`.
pub fn mse_loss_sum(y_pred: &Tensor, y_true: &Tensor) -> RuntimeResult<Tensor> {
    squared_error(y_pred, y_true)?.sum()
}
