//! Module defining the core `Module` trait for all neural network layers.

use crate::asg::AsgResult;
use crate::runtime::RuntimeResult;
use crate::tensor::Tensor;

/// Trait defining the common interface for all layers/modules.
///
/// A module owns its parameters as named leaf tensors. `forward` runs the
/// layer eagerly and, when parameters require grad, records the operations
/// needed to backpropagate through it.
pub trait Module {
    /// Applies the layer to `inputs`.
    ///
    /// Shape problems (wrong rank, mismatched widths) are returned as a
    /// `RuntimeError` from the offending operation.
    fn forward(&self, inputs: &Tensor) -> RuntimeResult<Tensor>;

    /// Returns all trainable parameters that belong to this module.
    fn parameters(&self) -> Vec<Tensor>;

    /// Parameters paired with their names. Unnamed parameters get a
    /// positional `param{i}` name.
    fn named_parameters(&self) -> AsgResult<Vec<(String, Tensor)>> {
        self.parameters()
            .into_iter()
            .enumerate()
            .map(|(i, p)| -> AsgResult<(String, Tensor)> {
                let name = p.name()?.unwrap_or_else(|| format!("param{}", i));
                Ok((name, p))
            })
            .collect()
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> AsgResult<usize> {
        self.parameters().iter().map(Tensor::numel).sum()
    }

    /// Sets the gradient of every parameter to zeros.
    fn zero_grad(&self) -> AsgResult<()> {
        self.parameters().iter().try_for_each(Tensor::zero_grad)
    }
}
