//! # Blitz: eager tensors and reverse-mode autograd in Rust
//!
//! **Blitz** is a small define-by-run deep learning library. Every operation
//! on a [`Tensor`](tensor::Tensor) runs immediately on the CPU and, when a
//! gradient is needed, appends a record to an operation arena. Calling
//! `backward()` walks that arena in reverse and accumulates gradients into
//! the leaves.
//!
//! ## Usage Example
//!
//! ```
//! use blitz::losses::mse_loss;
//! use blitz::nn::{Module, Net};
//! use blitz::optimizers::{Optimizer, Sgd};
//! use blitz::tensor::{GraphContext, Tensor};
//!
//! // 1. Create graph context
//! let context = GraphContext::shared_with_seed(0);
//!
//! // 2. Build the network and a random sample
//! let net = Net::new(&context);
//! let input = Tensor::randn(&context, &[1, 1, 32, 32]);
//! let target = Tensor::randn(&context, &[1, 10]);
//!
//! // 3. Forward, loss, backward, update
//! let mut optimizer = Sgd::new(net.parameters(), 0.01);
//! optimizer.zero_grad().unwrap();
//! let loss = mse_loss(&net.forward(&input).unwrap(), &target).unwrap();
//! loss.backward().unwrap();
//! optimizer.step().unwrap();
//! ```

// Declare public modules that constitute the core library API.
pub mod asg;
pub mod autograd;
pub mod bridge;
pub mod config;
pub mod losses;
pub mod nn;
pub mod optimizers;
pub mod runtime;
pub mod serialization;
pub mod tensor;
pub mod training;
