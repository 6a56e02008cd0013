//! Reading and writing parameters in the SafeTensors format.
//!
//! Tensors are stored as little-endian F32 under the parameter names
//! reported by [`Module::named_parameters`]. Loading accepts F32 and F64
//! files; F64 values are narrowed to f32.

use crate::asg::AsgError;
use crate::nn::Module;
use log::{debug, info};
use ndarray::{ArrayD, IxDyn};
use safetensors::serialize_to_file;
use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SafeTensorsError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SafeTensors error: {0}")]
    SafeTensorsError(#[from] safetensors::SafeTensorError),

    #[error("Graph error: {0}")]
    Asg(#[from] AsgError),

    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Shape mismatch for '{name}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Tensor '{0}' not found")]
    TensorNotFound(String),
}

type Result<T> = std::result::Result<T, SafeTensorsError>;

/// Writes named arrays to `path`.
pub fn save_safetensors<P: AsRef<Path>>(path: P, tensors: &BTreeMap<String, ArrayD<f32>>) -> Result<()> {
    let bytes: Vec<(&str, &[usize], Vec<u8>)> = tensors
        .iter()
        .map(|(name, arr)| {
            let data = arr.iter().flat_map(|&x| x.to_le_bytes()).collect();
            (name.as_str(), arr.shape(), data)
        })
        .collect();

    let mut views = Vec::with_capacity(bytes.len());
    for (name, shape, data) in &bytes {
        views.push((*name, TensorView::new(Dtype::F32, shape.to_vec(), data)?));
    }

    serialize_to_file(views, &None, path.as_ref())?;
    Ok(())
}

fn decode(name: &str, tensor: &TensorView<'_>) -> Result<ArrayD<f32>> {
    let shape = tensor.shape().to_vec();
    let floats: Vec<f32> = match tensor.dtype() {
        Dtype::F32 => tensor
            .data()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::F64 => tensor
            .data()
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
            .collect(),
        other => return Err(SafeTensorsError::UnsupportedDtype(format!("{:?}", other))),
    };

    let len = floats.len();
    ArrayD::from_shape_vec(IxDyn(&shape), floats).map_err(|_| SafeTensorsError::ShapeMismatch {
        name: name.to_string(),
        expected: shape.clone(),
        actual: vec![len],
    })
}

/// Reads every tensor stored in `path`.
pub fn load_safetensors<P: AsRef<Path>>(path: P) -> Result<BTreeMap<String, ArrayD<f32>>> {
    let buffer = std::fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;

    tensors
        .tensors()
        .into_iter()
        .map(|(name, tensor)| -> Result<(String, ArrayD<f32>)> {
            let arr = decode(&name, &tensor)?;
            Ok((name, arr))
        })
        .collect()
}

/// Names of the tensors stored in `path`.
pub fn list_tensors<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let buffer = std::fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;
    let mut names: Vec<String> = tensors.names().into_iter().cloned().collect();
    names.sort();
    Ok(names)
}

/// Saves the current values of `model`'s parameters.
pub fn save_parameters<P: AsRef<Path>, M: Module + ?Sized>(path: P, model: &M) -> Result<()> {
    let mut tensors = BTreeMap::new();
    for (name, param) in model.named_parameters()? {
        tensors.insert(name, param.to_array()?);
    }
    save_safetensors(path.as_ref(), &tensors)?;
    info!("saved {} parameters to {}", tensors.len(), path.as_ref().display());
    Ok(())
}

/// Overwrites `model`'s parameters in place with the values stored in
/// `path`. Every parameter must be present with its exact shape; extra
/// tensors in the file are ignored.
pub fn load_parameters<P: AsRef<Path>, M: Module + ?Sized>(path: P, model: &M) -> Result<()> {
    let mut stored = load_safetensors(path.as_ref())?;
    let named = model.named_parameters()?;

    // Validate everything before touching any parameter.
    let mut updates = Vec::with_capacity(named.len());
    for (name, param) in named {
        let value = stored
            .remove(&name)
            .ok_or_else(|| SafeTensorsError::TensorNotFound(name.clone()))?;
        let expected = param.shape()?;
        if value.shape() != expected.as_slice() {
            return Err(SafeTensorsError::ShapeMismatch {
                name,
                expected,
                actual: value.shape().to_vec(),
            });
        }
        updates.push((param, value));
    }

    for (param, value) in &updates {
        param.shared()?.update(|data| data.assign(value));
    }
    debug!("{} unused tensors in file", stored.len());
    info!("loaded {} parameters from {}", updates.len(), path.as_ref().display());
    Ok(())
}
