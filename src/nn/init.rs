//! Parameter initialisation.

use crate::tensor::{GraphContext, Tensor};
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use std::cell::RefCell;
use std::rc::Rc;

/// Samples `U(-1/sqrt(fan_in), 1/sqrt(fan_in))` from the context generator.
pub fn uniform_fan_in(context: &Rc<RefCell<GraphContext>>, shape: &[usize], fan_in: usize) -> ArrayD<f32> {
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    ArrayD::random_using(
        IxDyn(shape),
        Uniform::new(-bound, bound),
        context.borrow_mut().rng_mut(),
    )
}

/// Creates a named parameter initialised with [`uniform_fan_in`].
pub fn parameter(
    context: &Rc<RefCell<GraphContext>>,
    name: &str,
    shape: &[usize],
    fan_in: usize,
) -> Tensor {
    let data = uniform_fan_in(context, shape, fan_in);
    Tensor::new_parameter(context, name, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_within_bound() {
        let ctx = GraphContext::shared_with_seed(3);
        let data = uniform_fan_in(&ctx, &[16, 25], 25);
        assert!(data.iter().all(|v| v.abs() < 0.2));
        assert!(data.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn parameter_is_named_and_tracked() {
        let ctx = GraphContext::shared_with_seed(3);
        let p = parameter(&ctx, "fc.weight", &[2, 3], 3);
        assert_eq!(p.name().unwrap().as_deref(), Some("fc.weight"));
        assert!(p.requires_grad().unwrap());
        assert_eq!(p.grad().unwrap(), None);
    }
}
