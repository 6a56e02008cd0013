use crate::nn::module::Module;
use crate::runtime::RuntimeResult;
use crate::tensor::Tensor;

/// Collapses every dimension from `start_dim` on into one.
///
/// The default `start_dim` of 1 keeps the batch dimension, turning
/// `[N, C, H, W]` into `[N, C*H*W]`.
#[derive(Debug, Clone, Copy)]
pub struct Flatten {
    pub start_dim: usize,
}

impl Flatten {
    pub fn new(start_dim: usize) -> Self {
        Self { start_dim }
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Module for Flatten {
    fn forward(&self, inputs: &Tensor) -> RuntimeResult<Tensor> {
        inputs.flatten(self.start_dim)
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}
