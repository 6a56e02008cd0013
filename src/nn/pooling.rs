//! Pooling layers for CNNs.

use crate::nn::module::Module;
use crate::runtime::RuntimeResult;
use crate::tensor::Tensor;

/// Max Pooling 2D layer.
///
/// Applies max pooling to input tensor of shape [N, C, H, W].
/// Selects maximum value from each window; the gradient flows back to that
/// maximum only.
///
/// # Example
///
/// ```
/// use blitz::nn::{MaxPool2d, Module};
/// use blitz::tensor::{GraphContext, Tensor};
///
/// let ctx = GraphContext::shared();
/// let pool = MaxPool2d::square(2);
/// let out = pool.forward(&Tensor::zeros(&ctx, &[1, 6, 28, 28])).unwrap();
/// assert_eq!(out.shape().unwrap(), vec![1, 6, 14, 14]);
/// ```
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    /// Window size (kH, kW).
    pub kernel_size: (usize, usize),
    /// Stride (stride_h, stride_w).
    pub stride: (usize, usize),
}

impl MaxPool2d {
    /// Creates MaxPool2d layer.
    ///
    /// # Arguments
    ///
    /// * `kernel_size` - Pooling window size
    /// * `stride` - Pooling stride (usually equals kernel_size)
    pub fn new(kernel_size: (usize, usize), stride: (usize, usize)) -> Self {
        Self { kernel_size, stride }
    }

    /// Creates MaxPool2d with equal kernel_size and stride.
    pub fn square(size: usize) -> Self {
        Self {
            kernel_size: (size, size),
            stride: (size, size),
        }
    }
}

impl Module for MaxPool2d {
    fn forward(&self, inputs: &Tensor) -> RuntimeResult<Tensor> {
        inputs.max_pool2d(self.kernel_size, self.stride)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![] // Pooling layers have no trainable parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::GraphContext;

    #[test]
    fn odd_sizes_floor() {
        let ctx = GraphContext::shared();
        let pool = MaxPool2d::square(2);
        let y = pool.forward(&Tensor::zeros(&ctx, &[1, 16, 5, 5])).unwrap();
        assert_eq!(y.shape().unwrap(), vec![1, 16, 2, 2]);
    }

    #[test]
    fn rejects_non_4d_input() {
        let ctx = GraphContext::shared();
        assert!(MaxPool2d::square(2).forward(&Tensor::zeros(&ctx, &[4, 4])).is_err());
    }
}
