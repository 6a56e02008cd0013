//! Fully connected (linear) layer.

use crate::nn::init;
use crate::nn::module::Module;
use crate::runtime::RuntimeResult;
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

/// Fully connected layer computing `y = x·Wᵀ + b`.
///
/// The layer owns its weight (`[out_features, in_features]`) and bias
/// (`[out_features]`) as named parameters in the graph context.
pub struct Linear {
    pub weight: Tensor,
    pub bias: Tensor,
    pub in_features: usize,
    pub out_features: usize,
}

impl Linear {
    /// Creates a new layer with parameters named `{name}.weight` and
    /// `{name}.bias`, both drawn from `U(-1/sqrt(in), 1/sqrt(in))`.
    ///
    /// # Arguments
    ///
    /// * `context` - Graph context that will own the parameters.
    /// * `in_features` - Width of the input.
    /// * `out_features` - Width of the output.
    /// * `name` - Base name for the parameters (e.g. "fc1").
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        in_features: usize,
        out_features: usize,
        name: &str,
    ) -> Self {
        let weight = init::parameter(
            context,
            &format!("{}.weight", name),
            &[out_features, in_features],
            in_features,
        );
        let bias = init::parameter(context, &format!("{}.bias", name), &[out_features], in_features);

        Self {
            weight,
            bias,
            in_features,
            out_features,
        }
    }
}

impl Module for Linear {
    /// Expects a `[N, in_features]` input and returns `[N, out_features]`.
    fn forward(&self, inputs: &Tensor) -> RuntimeResult<Tensor> {
        let product = inputs.matmul(&self.weight.t()?)?;
        &product + &self.bias
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeError;

    #[test]
    fn forward_shape_and_value() {
        let ctx = GraphContext::shared_with_seed(0);
        let fc = Linear::new(&ctx, 3, 2, "fc");
        fc.weight.shared().unwrap().fill(1.0);
        fc.bias.shared().unwrap().fill(0.5);

        let x = Tensor::from_vec(&ctx, &[1, 3], vec![1.0, 2.0, 3.0]).unwrap();
        let y = fc.forward(&x).unwrap();
        assert_eq!(y.shape().unwrap(), vec![1, 2]);
        assert_eq!(y.to_array().unwrap()[[0, 1]], 6.5);
    }

    #[test]
    fn wrong_width_is_an_error() {
        let ctx = GraphContext::shared_with_seed(0);
        let fc = Linear::new(&ctx, 3, 2, "fc");
        let x = Tensor::zeros(&ctx, &[1, 4]);
        assert!(matches!(
            fc.forward(&x),
            Err(RuntimeError::IncompatibleShapes { op: "matmul", .. })
        ));
    }

    #[test]
    fn named_parameters_follow_layer_name() {
        let ctx = GraphContext::shared_with_seed(0);
        let fc = Linear::new(&ctx, 4, 3, "fc1");
        let names: Vec<String> = fc.named_parameters().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["fc1.weight", "fc1.bias"]);
        assert_eq!(fc.num_parameters().unwrap(), 15);
    }
}
