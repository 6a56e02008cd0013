//! CPU kernels over `ndarray`.
//!
//! Forward kernels validate their operands and return a `RuntimeError` on any
//! shape problem instead of letting `ndarray` panic. Backward kernels assume
//! the shapes already passed the forward checks.

use super::error::{RuntimeError, RuntimeResult};
use crate::asg::Shape;
use ndarray::{s, Array4, ArrayD, ArrayView2, ArrayView4, Axis, Ix2, Ix4, IxDyn, Zip};

fn mismatch(op: &'static str, lhs: &[usize], rhs: &[usize]) -> RuntimeError {
    RuntimeError::IncompatibleShapes {
        op,
        lhs: lhs.to_vec(),
        rhs: rhs.to_vec(),
    }
}

fn as_matrix<'a>(op: &'static str, a: &'a ArrayD<f32>) -> RuntimeResult<ArrayView2<'a, f32>> {
    a.view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| RuntimeError::InvalidRank { op, expected: 2, actual: a.ndim() })
}

fn as_4d<'a>(op: &'static str, a: &'a ArrayD<f32>) -> RuntimeResult<ArrayView4<'a, f32>> {
    a.view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| RuntimeError::InvalidRank { op, expected: 4, actual: a.ndim() })
}

// --- Broadcasting ---

/// NumPy-style broadcast of two shapes (trailing dimensions aligned).
pub fn broadcast_shape(op: &'static str, lhs: &[usize], rhs: &[usize]) -> RuntimeResult<Shape> {
    let rank = lhs.len().max(rhs.len());
    let dim_at = |shape: &[usize], i: usize| {
        let offset = rank - shape.len();
        if i < offset { 1 } else { shape[i - offset] }
    };
    (0..rank)
        .map(|i| match (dim_at(lhs, i), dim_at(rhs, i)) {
            (l, r) if l == r => Ok(l),
            (1, r) => Ok(r),
            (l, 1) => Ok(l),
            _ => Err(mismatch(op, lhs, rhs)),
        })
        .collect()
}

fn op_binary<F>(op: &'static str, a: &ArrayD<f32>, b: &ArrayD<f32>, f: F) -> RuntimeResult<ArrayD<f32>>
where
    F: Fn(f32, f32) -> f32,
{
    let shape = broadcast_shape(op, a.shape(), b.shape())?;
    let lhs = a
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| mismatch(op, a.shape(), b.shape()))?;
    let rhs = b
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| mismatch(op, a.shape(), b.shape()))?;
    Ok(Zip::from(&lhs).and(&rhs).map_collect(|&x, &y| f(x, y)))
}

pub fn op_add(a: &ArrayD<f32>, b: &ArrayD<f32>) -> RuntimeResult<ArrayD<f32>> {
    op_binary("add", a, b, |x, y| x + y)
}

pub fn op_subtract(a: &ArrayD<f32>, b: &ArrayD<f32>) -> RuntimeResult<ArrayD<f32>> {
    op_binary("sub", a, b, |x, y| x - y)
}

pub fn op_multiply(a: &ArrayD<f32>, b: &ArrayD<f32>) -> RuntimeResult<ArrayD<f32>> {
    op_binary("mul", a, b, |x, y| x * y)
}

pub fn op_divide(a: &ArrayD<f32>, b: &ArrayD<f32>) -> RuntimeResult<ArrayD<f32>> {
    op_binary("div", a, b, |x, y| x / y)
}

/// Expands `source` to `shape` (the adjoint of [`reduce_sum_to`]).
pub fn broadcast_to(source: &ArrayD<f32>, shape: &[usize]) -> RuntimeResult<ArrayD<f32>> {
    source
        .broadcast(IxDyn(shape))
        .map(|view| view.to_owned())
        .ok_or_else(|| mismatch("broadcast", source.shape(), shape))
}

/// Sums a broadcast gradient back down to the operand's shape.
pub fn reduce_sum_to(source: ArrayD<f32>, target: &[usize]) -> RuntimeResult<ArrayD<f32>> {
    let mut reduced = source;
    while reduced.ndim() > target.len() {
        reduced = reduced.sum_axis(Axis(0));
    }
    for (axis, &dim) in target.iter().enumerate() {
        if dim == 1 && reduced.shape().get(axis).is_some_and(|&d| d != 1) {
            reduced = reduced.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }
    if reduced.shape() != target {
        return Err(mismatch("reduce_sum_to", reduced.shape(), target));
    }
    Ok(reduced)
}

// --- Elementwise ---

pub fn op_relu(a: &ArrayD<f32>) -> ArrayD<f32> {
    a.mapv(|x| x.max(0.0))
}

pub fn op_sigmoid(a: &ArrayD<f32>) -> ArrayD<f32> {
    a.mapv(|x| 1.0 / (1.0 + (-x).exp()))
}

// --- Linear algebra and layout ---

pub fn op_matmul(a: &ArrayD<f32>, b: &ArrayD<f32>) -> RuntimeResult<ArrayD<f32>> {
    let lhs = as_matrix("matmul", a)?;
    let rhs = as_matrix("matmul", b)?;
    if lhs.ncols() != rhs.nrows() {
        return Err(mismatch("matmul", a.shape(), b.shape()));
    }
    Ok(lhs.dot(&rhs).into_dyn())
}

pub fn op_transpose(a: &ArrayD<f32>, axis1: usize, axis2: usize) -> RuntimeResult<ArrayD<f32>> {
    let ndim = a.ndim();
    if axis1 >= ndim || axis2 >= ndim {
        return Err(RuntimeError::ShapeError(format!(
            "transpose axes ({}, {}) out of range for a {}D tensor",
            axis1, axis2, ndim
        )));
    }
    let mut axes: Vec<usize> = (0..ndim).collect();
    axes.swap(axis1, axis2);
    Ok(a.view().permuted_axes(axes).as_standard_layout().into_owned())
}

/// Resolves a requested shape with at most one `-1` against an element count.
pub fn resolve_shape(numel: usize, requested: &[isize]) -> RuntimeResult<Shape> {
    let mut inferred = None;
    let mut known = 1usize;
    for (i, &dim) in requested.iter().enumerate() {
        match dim {
            -1 => {
                if inferred.replace(i).is_some() {
                    return Err(RuntimeError::ShapeError(
                        "only one dimension can be inferred".to_string(),
                    ));
                }
            }
            d if d < 0 => {
                return Err(RuntimeError::ShapeError(format!("invalid dimension {} in {:?}", d, requested)));
            }
            d => {
                known = known.checked_mul(d as usize).ok_or_else(|| {
                    RuntimeError::ShapeError(format!("shape {:?} overflows usize", requested))
                })?;
            }
        }
    }

    let mut shape: Shape = requested.iter().map(|&d| d.max(0) as usize).collect();
    let invalid = || {
        RuntimeError::ShapeError(format!(
            "shape {:?} is invalid for input of size {}",
            requested, numel
        ))
    };
    match inferred {
        Some(i) => {
            if known == 0 || numel % known != 0 {
                return Err(invalid());
            }
            shape[i] = numel / known;
        }
        None if known != numel => return Err(invalid()),
        None => {}
    }
    Ok(shape)
}

pub fn op_reshape(a: &ArrayD<f32>, shape: &[usize]) -> RuntimeResult<ArrayD<f32>> {
    a.to_shape(shape)
        .map(|view| view.into_owned())
        .map_err(|e| RuntimeError::ShapeError(e.to_string()))
}

// --- Convolution ---

fn conv_output_size(
    input: (usize, usize),
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
) -> Option<(usize, usize)> {
    let axis = |len: usize, k: usize, s: usize, p: usize| {
        let padded = len + 2 * p;
        if k == 0 || s == 0 || padded < k {
            None
        } else {
            Some((padded - k) / s + 1)
        }
    };
    Some((
        axis(input.0, kernel.0, stride.0, padding.0)?,
        axis(input.1, kernel.1, stride.1, padding.1)?,
    ))
}

/// Direct 2D convolution.
/// Input: [N, C_in, H, W], weight: [C_out, C_in, kH, kW], bias: [C_out].
pub fn op_conv2d(
    input: &ArrayD<f32>,
    weight: &ArrayD<f32>,
    bias: Option<&ArrayD<f32>>,
    stride: (usize, usize),
    padding: (usize, usize),
) -> RuntimeResult<ArrayD<f32>> {
    let input_arr = as_4d("conv2d", input)?;
    let weight_arr = as_4d("conv2d", weight)?;

    let (batch_size, in_channels, in_h, in_w) = input_arr.dim();
    let (out_channels, weight_in_channels, kernel_h, kernel_w) = weight_arr.dim();

    if in_channels != weight_in_channels {
        return Err(mismatch("conv2d", input.shape(), weight.shape()));
    }
    if let Some(b) = bias {
        if b.shape() != [out_channels].as_slice() {
            return Err(mismatch("conv2d bias", b.shape(), &[out_channels]));
        }
    }
    let (out_h, out_w) = conv_output_size((in_h, in_w), (kernel_h, kernel_w), stride, padding)
        .ok_or_else(|| {
            RuntimeError::ShapeError(format!(
                "conv2d: kernel {}x{} with stride {:?} and padding {:?} does not fit input {}x{}",
                kernel_h, kernel_w, stride, padding, in_h, in_w
            ))
        })?;

    let (stride_h, stride_w) = stride;
    let (pad_h, pad_w) = padding;
    let mut output = Array4::<f32>::zeros((batch_size, out_channels, out_h, out_w));

    for n in 0..batch_size {
        for oc in 0..out_channels {
            let b = bias.map_or(0.0, |b| b[[oc]]);
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut sum = b;
                    for ic in 0..in_channels {
                        for kh in 0..kernel_h {
                            let ih = (oh * stride_h + kh) as isize - pad_h as isize;
                            if ih < 0 || ih >= in_h as isize {
                                continue;
                            }
                            for kw in 0..kernel_w {
                                let iw = (ow * stride_w + kw) as isize - pad_w as isize;
                                if iw < 0 || iw >= in_w as isize {
                                    continue;
                                }
                                sum += input_arr[[n, ic, ih as usize, iw as usize]]
                                    * weight_arr[[oc, ic, kh, kw]];
                            }
                        }
                    }
                    output[[n, oc, oh, ow]] = sum;
                }
            }
        }
    }

    Ok(output.into_dyn())
}

/// Gradients of [`op_conv2d`] with respect to its input and weight.
pub fn conv2d_backward(
    input: &ArrayD<f32>,
    weight: &ArrayD<f32>,
    grad_output: &ArrayD<f32>,
    stride: (usize, usize),
    padding: (usize, usize),
) -> RuntimeResult<(ArrayD<f32>, ArrayD<f32>)> {
    let input_arr = as_4d("conv2d backward", input)?;
    let weight_arr = as_4d("conv2d backward", weight)?;
    let grad_arr = as_4d("conv2d backward", grad_output)?;

    let (batch_size, in_channels, in_h, in_w) = input_arr.dim();
    let (out_channels, _, kernel_h, kernel_w) = weight_arr.dim();
    let (_, _, out_h, out_w) = grad_arr.dim();
    let (stride_h, stride_w) = stride;
    let (pad_h, pad_w) = padding;

    let mut grad_input = Array4::<f32>::zeros(input_arr.raw_dim());
    let mut grad_weight = Array4::<f32>::zeros(weight_arr.raw_dim());

    for n in 0..batch_size {
        for oc in 0..out_channels {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let g = grad_arr[[n, oc, oh, ow]];
                    for ic in 0..in_channels {
                        for kh in 0..kernel_h {
                            let ih = (oh * stride_h + kh) as isize - pad_h as isize;
                            if ih < 0 || ih >= in_h as isize {
                                continue;
                            }
                            for kw in 0..kernel_w {
                                let iw = (ow * stride_w + kw) as isize - pad_w as isize;
                                if iw < 0 || iw >= in_w as isize {
                                    continue;
                                }
                                let (ih, iw) = (ih as usize, iw as usize);
                                grad_input[[n, ic, ih, iw]] += g * weight_arr[[oc, ic, kh, kw]];
                                grad_weight[[oc, ic, kh, kw]] += g * input_arr[[n, ic, ih, iw]];
                            }
                        }
                    }
                }
            }
        }
    }

    Ok((grad_input.into_dyn(), grad_weight.into_dyn()))
}

/// Bias gradient of [`op_conv2d`]: the output gradient summed over N, H and W.
pub fn conv2d_bias_grad(grad_output: &ArrayD<f32>) -> RuntimeResult<ArrayD<f32>> {
    let grad_arr = as_4d("conv2d backward", grad_output)?;
    Ok(grad_arr
        .sum_axis(Axis(3))
        .sum_axis(Axis(2))
        .sum_axis(Axis(0))
        .into_dyn())
}

// --- Pooling ---

pub fn op_max_pool2d(
    input: &ArrayD<f32>,
    kernel_size: (usize, usize),
    stride: (usize, usize),
) -> RuntimeResult<ArrayD<f32>> {
    let input_arr = as_4d("max_pool2d", input)?;
    let (n, c, h, w) = input_arr.dim();
    let (kh, kw) = kernel_size;
    let (sh, sw) = stride;
    let (out_h, out_w) = conv_output_size((h, w), kernel_size, stride, (0, 0)).ok_or_else(|| {
        RuntimeError::ShapeError(format!(
            "max_pool2d: window {:?} with stride {:?} does not fit input {}x{}",
            kernel_size, stride, h, w
        ))
    })?;

    let mut output_arr = Array4::<f32>::zeros((n, c, out_h, out_w));
    for n_idx in 0..n {
        for c_idx in 0..c {
            for oh_idx in 0..out_h {
                for ow_idx in 0..out_w {
                    let h_start = oh_idx * sh;
                    let w_start = ow_idx * sw;
                    let window =
                        input_arr.slice(s![n_idx, c_idx, h_start..h_start + kh, w_start..w_start + kw]);
                    let max_val = window.iter().fold(f32::NEG_INFINITY, |max, &val| max.max(val));
                    output_arr[[n_idx, c_idx, oh_idx, ow_idx]] = max_val;
                }
            }
        }
    }
    Ok(output_arr.into_dyn())
}

/// Routes each pooled gradient back to the first maximum of its window.
pub fn max_unpool2d(
    grad_output: &ArrayD<f32>,
    original_input: &ArrayD<f32>,
    kernel_size: (usize, usize),
    stride: (usize, usize),
) -> RuntimeResult<ArrayD<f32>> {
    let grad_arr = as_4d("max_pool2d backward", grad_output)?;
    let original = as_4d("max_pool2d backward", original_input)?;
    let (kh, kw) = kernel_size;
    let (sh, sw) = stride;
    let (n, c, out_h, out_w) = grad_arr.dim();

    let mut output_arr = Array4::<f32>::zeros(original.raw_dim());
    for n_idx in 0..n {
        for c_idx in 0..c {
            for oh_idx in 0..out_h {
                for ow_idx in 0..out_w {
                    let h_start = oh_idx * sh;
                    let w_start = ow_idx * sw;
                    let window =
                        original.slice(s![n_idx, c_idx, h_start..h_start + kh, w_start..w_start + kw]);
                    let mut max_val = f32::NEG_INFINITY;
                    let mut max_pos = (0, 0);
                    for r in 0..kh {
                        for col in 0..kw {
                            if window[[r, col]] > max_val {
                                max_val = window[[r, col]];
                                max_pos = (r, col);
                            }
                        }
                    }
                    output_arr[[n_idx, c_idx, h_start + max_pos.0, w_start + max_pos.1]] +=
                        grad_arr[[n_idx, c_idx, oh_idx, ow_idx]];
                }
            }
        }
    }
    Ok(output_arr.into_dyn())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array};

    #[test]
    fn broadcast_rules() {
        assert_eq!(broadcast_shape("add", &[4, 3], &[3]).unwrap(), vec![4, 3]);
        assert_eq!(broadcast_shape("add", &[4, 1], &[1, 5]).unwrap(), vec![4, 5]);
        assert_eq!(broadcast_shape("add", &[], &[2, 2]).unwrap(), vec![2, 2]);
        assert!(matches!(
            broadcast_shape("add", &[2, 3], &[4]),
            Err(RuntimeError::IncompatibleShapes { op: "add", .. })
        ));
    }

    #[test]
    fn add_broadcasts_bias_over_rows() {
        let a = Array::from_elem(IxDyn(&[2, 3]), 1.0);
        let b = arr1(&[1.0, 2.0, 3.0]).into_dyn();
        let out = op_add(&a, &b).unwrap();
        assert_eq!(out, arr2(&[[2.0, 3.0, 4.0], [2.0, 3.0, 4.0]]).into_dyn());
    }

    #[test]
    fn reduce_sum_to_undoes_broadcast() {
        let g = Array::from_elem(IxDyn(&[2, 3]), 1.0);
        assert_eq!(reduce_sum_to(g.clone(), &[3]).unwrap(), arr1(&[2.0, 2.0, 2.0]).into_dyn());
        assert_eq!(reduce_sum_to(g.clone(), &[2, 1]).unwrap().shape(), &[2, 1]);
        assert_eq!(reduce_sum_to(g, &[]).unwrap().sum(), 6.0);
    }

    #[test]
    fn matmul_checks_inner_dims() {
        let a = Array::from_elem(IxDyn(&[2, 3]), 1.0);
        let b = Array::from_elem(IxDyn(&[3, 4]), 2.0);
        assert_eq!(op_matmul(&a, &b).unwrap().shape(), &[2, 4]);
        assert!(op_matmul(&b, &a).is_err());
        let v = Array::from_elem(IxDyn(&[3]), 1.0);
        assert_eq!(
            op_matmul(&a, &v).unwrap_err(),
            RuntimeError::InvalidRank { op: "matmul", expected: 2, actual: 1 }
        );
    }

    #[test]
    fn resolve_shape_infers_one_dim() {
        assert_eq!(resolve_shape(400, &[1, -1]).unwrap(), vec![1, 400]);
        assert_eq!(resolve_shape(16, &[-1, 4, 2]).unwrap(), vec![2, 4, 2]);
        assert!(resolve_shape(400, &[-1, 300]).is_err());
        assert!(resolve_shape(400, &[1, 300]).is_err());
        assert!(resolve_shape(16, &[-1, -1]).is_err());
        assert!(resolve_shape(16, &[-2, 8]).is_err());
        assert!(matches!(
            resolve_shape(16, &[isize::MAX, isize::MAX, -1]),
            Err(RuntimeError::ShapeError(_))
        ));
    }

    #[test]
    fn conv2d_identity_kernel() {
        let input = Array::from_shape_vec(IxDyn(&[1, 1, 3, 3]), (1..=9).map(|x| x as f32).collect())
            .unwrap();
        let mut weight = Array::zeros(IxDyn(&[1, 1, 3, 3]));
        weight[[0, 0, 1, 1]] = 1.0;
        let bias = arr1(&[0.5]).into_dyn();

        let out = op_conv2d(&input, &weight, Some(&bias), (1, 1), (1, 1)).unwrap();
        assert_eq!(out.shape(), &[1, 1, 3, 3]);
        assert_eq!(out[[0, 0, 0, 0]], 1.5);
        assert_eq!(out[[0, 0, 2, 2]], 9.5);
    }

    #[test]
    fn conv2d_rejects_oversized_kernel() {
        let input = Array::zeros(IxDyn(&[1, 1, 2, 2]));
        let weight = Array::zeros(IxDyn(&[1, 1, 3, 3]));
        assert!(matches!(
            op_conv2d(&input, &weight, None, (1, 1), (0, 0)),
            Err(RuntimeError::ShapeError(_))
        ));
    }

    #[test]
    fn max_pool_and_unpool() {
        let input = Array::from_shape_vec(
            IxDyn(&[1, 1, 2, 4]),
            vec![1.0, 5.0, 2.0, 0.0, 3.0, 4.0, 8.0, 7.0],
        )
        .unwrap();
        let pooled = op_max_pool2d(&input, (2, 2), (2, 2)).unwrap();
        assert_eq!(pooled.iter().copied().collect::<Vec<_>>(), vec![5.0, 8.0]);

        let grad = Array::from_elem(IxDyn(&[1, 1, 1, 2]), 1.0);
        let routed = max_unpool2d(&grad, &input, (2, 2), (2, 2)).unwrap();
        assert_eq!(routed[[0, 0, 0, 1]], 1.0);
        assert_eq!(routed[[0, 0, 1, 2]], 1.0);
        assert_eq!(routed.sum(), 2.0);
    }
}
