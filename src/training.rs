//! The training loop: zero grads, forward, loss, backward, update.

use crate::asg::AsgError;
use crate::autograd::AutogradError;
use crate::config::TrainConfig;
use crate::losses::mse_loss;
use crate::nn::Module;
use crate::optimizers::Optimizer;
use crate::runtime::RuntimeError;
use crate::tensor::Tensor;
use log::{debug, info};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Autograd(#[from] AutogradError),
    #[error(transparent)]
    Asg(#[from] AsgError),
}

/// Runs one update of `model` on a single `(input, target)` pair and
/// returns the loss measured before the update.
///
/// Gradients are cleared first, so the update uses this step's gradients
/// only.
pub fn train_step<M, O>(model: &M, optimizer: &mut O, input: &Tensor, target: &Tensor) -> Result<f32, TrainError>
where
    M: Module + ?Sized,
    O: Optimizer + ?Sized,
{
    optimizer.zero_grad()?;
    let output = model.forward(input)?;
    let loss = mse_loss(&output, target)?;
    loss.backward()?;
    optimizer.step()?;
    Ok(loss.item()?)
}

/// Repeats [`train_step`] `config.epochs` times on the same pair, releasing
/// the recorded operations after every step. Returns the loss of each step.
pub fn fit<M, O>(
    model: &M,
    optimizer: &mut O,
    input: &Tensor,
    target: &Tensor,
    config: &TrainConfig,
) -> Result<Vec<f32>, TrainError>
where
    M: Module + ?Sized,
    O: Optimizer + ?Sized,
{
    let mut history = Vec::with_capacity(config.epochs);
    for epoch in 0..config.epochs {
        let loss = train_step(model, optimizer, input, target)?;
        let released = input.context.borrow_mut().release_intermediates();
        debug!("epoch {}: released {} nodes", epoch, released);

        if config.log_every > 0 && (epoch % config.log_every == 0 || epoch + 1 == config.epochs) {
            info!("epoch {:>4}/{}: loss = {:.6}", epoch + 1, config.epochs, loss);
        }
        history.push(loss);
    }
    Ok(history)
}
