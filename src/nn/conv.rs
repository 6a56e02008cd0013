//! 2D convolution layer for image inputs.

use crate::nn::init;
use crate::nn::module::Module;
use crate::runtime::RuntimeResult;
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

/// Configuration for Conv2d layer.
#[derive(Debug, Clone)]
pub struct Conv2dConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of output channels (filters).
    pub out_channels: usize,
    /// Convolution kernel size.
    pub kernel_size: (usize, usize),
    /// Convolution stride.
    pub stride: (usize, usize),
    /// Zero padding added on each side.
    pub padding: (usize, usize),
    /// Use bias.
    pub bias: bool,
}

impl Default for Conv2dConfig {
    fn default() -> Self {
        Self {
            in_channels: 1,
            out_channels: 1,
            kernel_size: (3, 3),
            stride: (1, 1),
            padding: (0, 0),
            bias: true,
        }
    }
}

impl Conv2dConfig {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: (usize, usize)) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            ..Default::default()
        }
    }

    pub fn with_stride(mut self, stride: (usize, usize)) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: (usize, usize)) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Inputs feeding one output value: `in_channels * kH * kW`.
    pub fn fan_in(&self) -> usize {
        self.in_channels * self.kernel_size.0 * self.kernel_size.1
    }
}

/// 2D Convolutional layer.
///
/// Applies 2D convolution to input tensor of shape [N, C_in, H, W].
/// Output tensor has shape [N, C_out, H_out, W_out] with
/// `H_out = (H + 2*pad_h - kH) / stride_h + 1` (same for W).
///
/// # Example
///
/// ```
/// use blitz::nn::{Conv2d, Module};
/// use blitz::tensor::{GraphContext, Tensor};
///
/// let ctx = GraphContext::shared_with_seed(0);
/// let conv = Conv2d::new(&ctx, "conv1", 1, 6, (5, 5));
/// let out = conv.forward(&Tensor::randn(&ctx, &[1, 1, 32, 32])).unwrap();
/// assert_eq!(out.shape().unwrap(), vec![1, 6, 28, 28]);
/// ```
pub struct Conv2d {
    /// Weight tensor [C_out, C_in, kH, kW].
    pub weight: Tensor,
    /// Optional bias [C_out].
    pub bias: Option<Tensor>,
    /// Layer configuration.
    pub config: Conv2dConfig,
}

impl Conv2d {
    /// Creates a new Conv2d layer with stride 1, no padding and a bias.
    ///
    /// # Arguments
    ///
    /// * `context` - Reference to GraphContext
    /// * `name` - Base name for parameters
    /// * `in_channels` - Number of input channels
    /// * `out_channels` - Number of output channels
    /// * `kernel_size` - Kernel size (kH, kW)
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        name: &str,
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
    ) -> Self {
        let config = Conv2dConfig::new(in_channels, out_channels, kernel_size);
        Self::from_config(context, name, config)
    }

    /// Creates Conv2d layer from configuration.
    pub fn from_config(context: &Rc<RefCell<GraphContext>>, name: &str, config: Conv2dConfig) -> Self {
        let (kh, kw) = config.kernel_size;
        let fan_in = config.fan_in();
        let weight = init::parameter(
            context,
            &format!("{}.weight", name),
            &[config.out_channels, config.in_channels, kh, kw],
            fan_in,
        );

        let bias = config.bias.then(|| {
            init::parameter(context, &format!("{}.bias", name), &[config.out_channels], fan_in)
        });

        Self { weight, bias, config }
    }

    pub fn with_stride(mut self, stride: (usize, usize)) -> Self {
        self.config.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: (usize, usize)) -> Self {
        self.config.padding = padding;
        self
    }
}

impl Module for Conv2d {
    fn forward(&self, inputs: &Tensor) -> RuntimeResult<Tensor> {
        inputs.conv2d(
            &self.weight,
            self.bias.as_ref(),
            self.config.stride,
            self.config.padding,
        )
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = vec![self.weight.clone()];
        if let Some(ref bias) = self.bias {
            params.push(bias.clone());
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_shape_with_padding_and_stride() {
        let ctx = GraphContext::shared_with_seed(1);
        let conv = Conv2d::new(&ctx, "c", 3, 4, (3, 3))
            .with_padding((1, 1))
            .with_stride((2, 2));
        let y = conv.forward(&Tensor::zeros(&ctx, &[2, 3, 8, 8])).unwrap();
        assert_eq!(y.shape().unwrap(), vec![2, 4, 4, 4]);
    }

    #[test]
    fn bias_is_optional() {
        let ctx = GraphContext::shared_with_seed(1);
        let conv = Conv2d::from_config(&ctx, "c", Conv2dConfig::new(1, 2, (2, 2)).with_bias(false));
        assert!(conv.bias.is_none());
        assert_eq!(conv.parameters().len(), 1);
        assert_eq!(conv.num_parameters().unwrap(), 8);
    }

    #[test]
    fn channel_mismatch_is_an_error() {
        let ctx = GraphContext::shared_with_seed(1);
        let conv = Conv2d::new(&ctx, "c", 3, 4, (3, 3));
        assert!(conv.forward(&Tensor::zeros(&ctx, &[1, 1, 8, 8])).is_err());
    }
}
