//! CPU execution of tensor operations.
//!
//! [`cpu_backend`] holds the forward kernels run when an operation is
//! recorded and the backward kernels used by [`crate::autograd`].

pub mod cpu_backend;
pub mod error;

pub use error::{RuntimeError, RuntimeResult};
