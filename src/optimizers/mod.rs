//! Optimizers that update parameters from their accumulated gradients.
//!
//! Updates happen in place on the parameter buffers and are never recorded
//! in the graph.

use crate::asg::AsgResult;
use crate::tensor::Tensor;
use log::warn;

/// Common interface for all optimizers.
pub trait Optimizer {
    /// Performs one update of every parameter from its current gradient.
    fn step(&mut self) -> AsgResult<()>;

    /// The parameters this optimizer updates.
    fn parameters(&self) -> &[Tensor];

    /// Sets the gradient of every parameter to zeros.
    fn zero_grad(&self) -> AsgResult<()> {
        self.parameters().iter().try_for_each(Tensor::zero_grad)
    }
}

/// Stochastic Gradient Descent: `p = p - lr * grad`.
pub struct Sgd {
    params: Vec<Tensor>,
    /// Learning rate.
    lr: f32,
}

impl Sgd {
    pub fn new(params: Vec<Tensor>, lr: f32) -> Self {
        Self { params, lr }
    }

    pub fn learning_rate(&self) -> f32 {
        self.lr
    }

    pub fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}

impl Optimizer for Sgd {
    fn step(&mut self) -> AsgResult<()> {
        for param in &self.params {
            // A parameter that no backward pass reached keeps its value.
            let Some(grad) = param.grad()? else {
                warn!(
                    "skipping update of '{}': gradient was never computed",
                    param.name()?.unwrap_or_else(|| format!("node {}", param.node_id))
                );
                continue;
            };
            let lr = self.lr;
            param
                .shared()?
                .update(|value| ndarray::azip!((p in value, &g in &grad) *p = *p - lr * g));
        }
        Ok(())
    }

    fn parameters(&self) -> &[Tensor] {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::GraphContext;
    use ndarray::arr1;

    #[test]
    fn step_moves_against_gradient() {
        let ctx = GraphContext::shared();
        let p = Tensor::new_parameter(&ctx, "p", arr1(&[1.0, 2.0]).into_dyn());
        let loss = p.mul_scalar(3.0).unwrap().sum().unwrap();
        loss.backward().unwrap();

        let mut sgd = Sgd::new(vec![p.clone()], 0.1);
        sgd.step().unwrap();
        let value = p.to_array().unwrap();
        assert!((value[[0]] - 0.7).abs() < 1e-6);
        assert!((value[[1]] - 1.7).abs() < 1e-6);
    }

    #[test]
    fn missing_gradient_leaves_parameter_untouched() {
        let ctx = GraphContext::shared();
        let p = Tensor::new_parameter(&ctx, "p", arr1(&[1.0]).into_dyn());
        let mut sgd = Sgd::new(vec![p.clone()], 0.5);
        sgd.step().unwrap();
        assert_eq!(p.to_array().unwrap()[[0]], 1.0);

        sgd.zero_grad().unwrap();
        sgd.step().unwrap();
        assert_eq!(p.to_array().unwrap()[[0]], 1.0);
        assert_eq!(p.grad().unwrap(), Some(arr1(&[0.0]).into_dyn()));
    }
}
