//! The LeNet-style network, the loss and the update step end to end.

use assert_approx_eq::assert_approx_eq;
use blitz::config::TrainConfig;
use blitz::losses::mse_loss;
use blitz::nn::{Flatten, Linear, Module, Net, ReLU};
use blitz::optimizers::{Optimizer, Sgd};
use blitz::runtime::{RuntimeError, RuntimeResult};
use blitz::tensor::{GraphContext, Tensor};
use blitz::training::{fit, train_step};
use ndarray::arr1;

#[test]
fn net_forward_shape() {
    let ctx = GraphContext::shared_with_seed(1);
    let net = Net::new(&ctx);
    let out = net.forward(&Tensor::randn(&ctx, &[1, 1, 32, 32])).unwrap();
    assert_eq!(out.shape().unwrap(), vec![1, 10]);

    let batch = net.forward(&Tensor::randn(&ctx, &[3, 1, 32, 32])).unwrap();
    assert_eq!(batch.shape().unwrap(), vec![3, 10]);
}

#[test]
fn net_requires_batch_dimension() {
    let ctx = GraphContext::shared_with_seed(1);
    let net = Net::new(&ctx);
    assert!(matches!(
        net.forward(&Tensor::randn(&ctx, &[1, 32, 32])),
        Err(RuntimeError::InvalidRank { expected: 4, actual: 3, .. })
    ));
}

#[test]
fn every_parameter_receives_a_gradient() {
    let ctx = GraphContext::shared_with_seed(2);
    let net = Net::new(&ctx);
    net.zero_grad().unwrap();

    let out = net.forward(&Tensor::randn(&ctx, &[1, 1, 32, 32])).unwrap();
    let loss = mse_loss(&out, &Tensor::randn(&ctx, &[1, 10])).unwrap();
    loss.backward().unwrap();

    for (name, param) in net.named_parameters().unwrap() {
        let grad = param.grad().unwrap().unwrap();
        assert_eq!(grad.shape(), param.shape().unwrap().as_slice(), "{}", name);
    }
    let fc3_bias = net.fc3.bias.grad().unwrap().unwrap();
    assert!(fc3_bias.iter().any(|&g| g != 0.0));
}

/// A pipeline whose flatten width does not match the next layer.
struct Mismatched {
    relu: ReLU,
    flatten: Flatten,
    fc: Linear,
}

impl Module for Mismatched {
    fn forward(&self, inputs: &Tensor) -> RuntimeResult<Tensor> {
        let x = self.flatten.forward(&self.relu.forward(inputs)?)?;
        self.fc.forward(&x)
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.fc.parameters()
    }
}

#[test]
fn mismatched_widths_fail_at_the_layer() {
    let ctx = GraphContext::shared_with_seed(3);
    let model = Mismatched {
        relu: ReLU,
        flatten: Flatten::default(),
        fc: Linear::new(&ctx, 10, 2, "fc"),
    };
    let err = model.forward(&Tensor::randn(&ctx, &[1, 3, 2, 2])).unwrap_err();
    assert_eq!(
        err,
        RuntimeError::IncompatibleShapes {
            op: "matmul",
            lhs: vec![1, 12],
            rhs: vec![10, 2]
        }
    );

    let x = Tensor::randn(&ctx, &[1, 3, 2, 2]);
    assert!(matches!(x.reshape(&[5, -1]), Err(RuntimeError::ShapeError(_))));
}

/// Identity network with one scalar parameter: y = p * x.
struct Scale {
    p: Tensor,
}

impl Module for Scale {
    fn forward(&self, inputs: &Tensor) -> RuntimeResult<Tensor> {
        inputs * &self.p
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.p.clone()]
    }
}

#[test]
fn one_step_is_gradient_descent() {
    let ctx = GraphContext::shared();
    let model = Scale {
        p: Tensor::new_parameter(&ctx, "p", arr1(&[0.5]).into_dyn()),
    };
    let x = Tensor::from_vec(&ctx, &[2], vec![1.0, 2.0]).unwrap();
    let target = Tensor::from_vec(&ctx, &[2], vec![2.0, 4.0]).unwrap();
    let lr = 0.1;

    // loss = mean((p*x - t)^2), d/dp = mean(2 * (p*x - t) * x)
    //      = ((0.5 - 2) * 1 + (1 - 4) * 2) = -7.5
    let p_old = 0.5;
    let grad = -7.5;

    let mut optimizer = Sgd::new(model.parameters(), lr);
    let loss = train_step(&model, &mut optimizer, &x, &target).unwrap();
    assert_approx_eq!(loss, (1.5f32 * 1.5 + 3.0 * 3.0) / 2.0, 1e-6);
    assert_approx_eq!(model.p.item().unwrap(), p_old - lr * grad, 1e-6);
}

#[test]
fn training_reduces_loss() {
    let ctx = GraphContext::shared_with_seed(4);
    let net = Net::new(&ctx);
    let input = Tensor::randn(&ctx, &[1, 1, 32, 32]);
    let target = Tensor::randn(&ctx, &[1, 10]);
    let mut optimizer = Sgd::new(net.parameters(), 0.01);

    let config = TrainConfig {
        learning_rate: 0.01,
        epochs: 20,
        seed: Some(4),
        log_every: 0,
    };
    let history = fit(&net, &mut optimizer, &input, &target, &config).unwrap();

    assert_eq!(history.len(), 20);
    assert!(history[19] < history[0]);
    // Intermediates are released after every step; only leaves remain.
    assert!(ctx.borrow().main_graph().nodes.values().all(|n| n.is_leaf()));
}

#[test]
fn arena_stays_bounded_with_fresh_batches() {
    let ctx = GraphContext::shared_with_seed(5);
    let model = Linear::new(&ctx, 4, 2, "fc");
    let mut optimizer = Sgd::new(model.parameters(), 0.01);
    let parameters = ctx.borrow().main_graph().len();
    assert_eq!(parameters, 2);

    for _ in 0..100 {
        let x = Tensor::randn(&ctx, &[8, 4]);
        let y = Tensor::randn(&ctx, &[8, 2]);
        train_step(&model, &mut optimizer, &x, &y).unwrap();
    }
    assert_eq!(ctx.borrow().main_graph().len(), parameters);

    for _ in 0..100 {
        let x = Tensor::randn(&ctx, &[8, 4]);
        let out = GraphContext::no_grad(&ctx, || model.forward(&x)).unwrap();
        assert_eq!(out.shape().unwrap(), vec![8, 2]);
    }
    assert_eq!(ctx.borrow().main_graph().len(), parameters);
}
