//! # Neural Network Layers Module
//!
//! Building blocks for feed-forward networks. Each layer owns its parameters
//! as named leaf tensors and runs eagerly in `forward`.
//!
//! ## Available Layers
//!
//! - [`Linear`]: Fully connected layer, `y = x·Wᵀ + b`
//! - [`Conv2d`]: 2D convolution with configurable stride and padding
//! - [`MaxPool2d`]: Max pooling
//! - [`ReLU`], [`Sigmoid`]: Activations
//! - [`Flatten`]: Collapses trailing dimensions
//! - [`Net`]: The LeNet-style classifier assembled from the above
//!
//! ## Example
//!
//! ```
//! use blitz::nn::{Linear, Module, ReLU};
//! use blitz::tensor::{GraphContext, Tensor};
//!
//! let ctx = GraphContext::shared_with_seed(42);
//! let linear = Linear::new(&ctx, 784, 128, "fc1");
//! let relu = ReLU;
//!
//! let x = Tensor::randn(&ctx, &[1, 784]);
//! let h = relu.forward(&linear.forward(&x).unwrap()).unwrap();
//! assert_eq!(h.shape().unwrap(), vec![1, 128]);
//! ```

pub mod activations;
pub mod conv;
pub mod flatten;
pub mod init;
pub mod linear;
pub mod module;
pub mod net;
pub mod pooling;

pub use activations::{ReLU, Sigmoid};
pub use conv::{Conv2d, Conv2dConfig};
pub use flatten::Flatten;
pub use linear::Linear;
pub use net::Net;
pub use pooling::MaxPool2d;

// Base trait
pub use module::Module;
