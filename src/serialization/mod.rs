//! Model parameter persistence.
//!
//! # Examples
//!
//! ```no_run
//! use blitz::nn::Net;
//! use blitz::serialization::{load_parameters, save_parameters};
//! use blitz::tensor::GraphContext;
//!
//! let ctx = GraphContext::shared();
//! let net = Net::new(&ctx);
//! save_parameters("net.safetensors", &net)?;
//! load_parameters("net.safetensors", &net)?;
//! # Ok::<(), blitz::serialization::SafeTensorsError>(())
//! ```

pub mod safetensors_io;

pub use safetensors_io::{
    list_tensors, load_parameters, load_safetensors, save_parameters, save_safetensors, SafeTensorsError,
};
