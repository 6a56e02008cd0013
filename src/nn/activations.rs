//! Activation layers.

use crate::nn::module::Module;
use crate::runtime::RuntimeResult;
use crate::tensor::Tensor;

/// ReLU (Rectified Linear Unit) activation layer.
///
/// Applies elementwise `max(0, x)`. Has no trainable parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

impl ReLU {
    pub fn new() -> Self {
        ReLU
    }
}

impl Module for ReLU {
    fn forward(&self, inputs: &Tensor) -> RuntimeResult<Tensor> {
        inputs.relu()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

/// Sigmoid activation layer, `1 / (1 + exp(-x))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl Module for Sigmoid {
    fn forward(&self, inputs: &Tensor) -> RuntimeResult<Tensor> {
        inputs.sigmoid()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}
