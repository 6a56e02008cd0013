//! Reverse-mode differentiation over the operation arena.
//!
//! Algorithm:
//!  - collect every node reachable from the root that requires grad;
//!  - visit them in descending id order (a reverse topological order, since
//!    operands always have smaller ids than their consumers);
//!  - for each operation, turn the pending dL/dY into contributions for its
//!    operands and sum them;
//!  - at leaves, add the final dL/dX into `Node::grad`.
//!
//! Gradients of leaves accumulate across calls until the caller zeroes them.
//! The graph itself is left intact, so a second backward pass through the
//! same nodes is allowed as long as no buffer it reads was written since the
//! operations were recorded.

use crate::asg::{Asg, AsgError, NodeId, NodeType, Shape};
use crate::bridge::SharedArray;
use crate::runtime::cpu_backend as cpu;
use crate::runtime::RuntimeError;
use log::debug;
use ndarray::{azip, ArrayD, IxDyn};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutogradError {
    #[error("ASG: {0}")]
    Asg(#[from] AsgError),
    #[error("Runtime: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("backward() without an explicit gradient needs a single-element root, got shape {0:?}")]
    NonScalarRoot(Shape),
    #[error("Upstream gradient has shape {actual:?}, expected {expected:?}")]
    GradientShape { expected: Shape, actual: Shape },
    #[error("Node {0} does not require grad and has no recorded history")]
    NoGradRequired(NodeId),
    #[error("Node {node} was modified in place after being recorded by '{op}' (node {consumer})")]
    ModifiedInPlace {
        node: NodeId,
        consumer: NodeId,
        op: &'static str,
    },
}

pub type AutogradResult<T> = Result<T, AutogradError>;

/// Runs a backward pass from `root`.
///
/// Without `seed` the root must hold exactly one element and is seeded with
/// 1. With `seed` the gradient must match the root's shape.
pub fn backward(graph: &mut Asg, root: NodeId, seed: Option<ArrayD<f32>>) -> AutogradResult<()> {
    let root_node = graph.get_node(root)?;
    if !root_node.requires_grad {
        return Err(AutogradError::NoGradRequired(root));
    }
    let shape = root_node.shape();
    let seed = match seed {
        Some(g) if g.shape() != shape.as_slice() => {
            return Err(AutogradError::GradientShape {
                expected: shape,
                actual: g.shape().to_vec(),
            })
        }
        Some(g) => g,
        None if root_node.data.len() != 1 => return Err(AutogradError::NonScalarRoot(shape)),
        None => ArrayD::ones(IxDyn(&shape)),
    };

    let order = reachable(graph, root)?;
    check_versions(graph, &order)?;
    debug!("backward from node {}: {} nodes to visit", root, order.len());

    let mut backprop = Backprop {
        graph,
        pending: HashMap::new(),
    };
    backprop.pending.insert(root, seed);

    for &id in order.iter().rev() {
        backprop.visit(id)?;
    }
    Ok(())
}

/// Nodes reachable from `root` through operands that require grad.
fn reachable(graph: &Asg, root: NodeId) -> AutogradResult<BTreeSet<NodeId>> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        for operand in graph.get_node(id)?.node_type.operands() {
            if graph.get_node(operand)?.requires_grad {
                stack.push(operand);
            }
        }
    }
    Ok(seen)
}

/// Every buffer an operation reads must be the one it saw when recorded.
fn check_versions(graph: &Asg, order: &BTreeSet<NodeId>) -> AutogradResult<()> {
    for &id in order {
        let node = graph.get_node(id)?;
        if node.is_leaf() {
            continue;
        }
        let modified = |node_id: NodeId| AutogradError::ModifiedInPlace {
            node: node_id,
            consumer: id,
            op: node.node_type.op_name(),
        };
        if node.data.version() != node.version {
            return Err(modified(id));
        }
        for (operand, &saved) in node.node_type.operands().into_iter().zip(&node.operand_versions) {
            if graph.get_node(operand)?.data.version() != saved {
                return Err(modified(operand));
            }
        }
    }
    Ok(())
}

struct Backprop<'a> {
    graph: &'a mut Asg,
    /// dL/dY not yet propagated, by node.
    pending: HashMap<NodeId, ArrayD<f32>>,
}

impl<'a> Backprop<'a> {
    fn visit(&mut self, id: NodeId) -> AutogradResult<()> {
        let Some(g_out) = self.pending.remove(&id) else {
            return Ok(());
        };
        let node = self.graph.get_node(id)?;

        if node.is_leaf() {
            let node = self.graph.get_node_mut(id)?;
            match node.grad.as_mut() {
                Some(grad) => *grad += &g_out,
                None => node.grad = Some(g_out),
            }
            return Ok(());
        }

        let node_type = node.node_type.clone();
        let output = node.data.clone();
        for (operand, grad) in self.local_gradients(&node_type, &output, g_out)? {
            self.acc(operand, grad)?;
        }
        Ok(())
    }

    /// Adds `grad` to the pending gradient of `id`, skipping operands that do
    /// not require grad.
    fn acc(&mut self, id: NodeId, grad: ArrayD<f32>) -> AutogradResult<()> {
        if !self.graph.get_node(id)?.requires_grad {
            return Ok(());
        }
        match self.pending.get_mut(&id) {
            Some(existing) => *existing += &grad,
            None => {
                self.pending.insert(id, grad);
            }
        }
        Ok(())
    }

    fn data(&self, id: NodeId) -> AutogradResult<SharedArray> {
        Ok(self.graph.get_node(id)?.data.clone())
    }

    fn reduce_to(&self, grad: ArrayD<f32>, id: NodeId) -> AutogradResult<ArrayD<f32>> {
        Ok(cpu::reduce_sum_to(grad, &self.data(id)?.shape())?)
    }

    /// Vector-Jacobian products of one operation: for each operand, the
    /// gradient it receives given `g_out` = dL/d(output).
    fn local_gradients(
        &self,
        node_type: &NodeType,
        output: &SharedArray,
        g_out: ArrayD<f32>,
    ) -> AutogradResult<Vec<(NodeId, ArrayD<f32>)>> {
        let grads = match *node_type {
            NodeType::Leaf => vec![],

            // -------- Binary --------
            NodeType::Add(a, b) => vec![
                (a, self.reduce_to(g_out.clone(), a)?),
                (b, self.reduce_to(g_out, b)?),
            ],
            NodeType::Subtract(a, b) => {
                let neg = g_out.mapv(|x| -x);
                vec![(a, self.reduce_to(g_out, a)?), (b, self.reduce_to(neg, b)?)]
            }
            NodeType::Multiply(a, b) => {
                let (a_data, b_data) = (self.data(a)?, self.data(b)?);
                let g_a = cpu::op_multiply(&g_out, &b_data.borrow())?;
                let g_b = cpu::op_multiply(&g_out, &a_data.borrow())?;
                vec![(a, self.reduce_to(g_a, a)?), (b, self.reduce_to(g_b, b)?)]
            }
            NodeType::Divide(a, b) => {
                let (a_data, b_data) = (self.data(a)?, self.data(b)?);
                let b_ref = b_data.borrow();
                // g_a = g / b
                let g_a = cpu::op_divide(&g_out, &b_ref)?;
                // g_b = -g * a / b^2
                let num = cpu::op_multiply(&g_out, &a_data.borrow())?;
                let g_b = cpu::op_divide(&num, &b_ref.mapv(|x| -x * x))?;
                vec![(a, self.reduce_to(g_a, a)?), (b, self.reduce_to(g_b, b)?)]
            }
            NodeType::MatrixMultiply(a, b) => {
                let (a_data, b_data) = (self.data(a)?, self.data(b)?);
                let b_t = cpu::op_transpose(&b_data.borrow(), 0, 1)?;
                let a_t = cpu::op_transpose(&a_data.borrow(), 0, 1)?;
                vec![
                    (a, cpu::op_matmul(&g_out, &b_t)?),
                    (b, cpu::op_matmul(&a_t, &g_out)?),
                ]
            }

            // -------- With a scalar --------
            NodeType::AddScalar(a, _) => vec![(a, g_out)],
            NodeType::MulScalar(a, s) => vec![(a, g_out * s)],
            NodeType::PowScalar(a, p) => {
                let a_data = self.data(a)?;
                let mut grad = g_out;
                azip!((g in &mut grad, &x in &*a_data.borrow()) *g *= p * x.powf(p - 1.0));
                vec![(a, grad)]
            }

            // -------- Unary --------
            NodeType::Negate(a) => vec![(a, g_out.mapv(|x| -x))],
            NodeType::ReLU(a) => {
                let a_data = self.data(a)?;
                let mut grad = g_out;
                azip!((g in &mut grad, &x in &*a_data.borrow()) if x <= 0.0 { *g = 0.0 });
                vec![(a, grad)]
            }
            NodeType::Sigmoid(a) => {
                let mut grad = g_out;
                azip!((g in &mut grad, &s in &*output.borrow()) *g *= s * (1.0 - s));
                vec![(a, grad)]
            }

            // -------- Reductions --------
            NodeType::Sum(a) => {
                let shape = self.data(a)?.shape();
                vec![(a, cpu::broadcast_to(&g_out, &shape)?)]
            }
            NodeType::Mean(a) => {
                let a_data = self.data(a)?;
                let n = a_data.len().max(1) as f32;
                vec![(a, cpu::broadcast_to(&(g_out / n), &a_data.shape())?)]
            }

            // -------- Transformations --------
            NodeType::Reshape(a) => {
                let shape = self.data(a)?.shape();
                vec![(a, cpu::op_reshape(&g_out, &shape)?)]
            }
            NodeType::Transpose(a, axis1, axis2) => {
                vec![(a, cpu::op_transpose(&g_out, axis1, axis2)?)]
            }

            // -------- Convolution and pooling --------
            NodeType::Conv2d {
                input,
                weight,
                bias,
                stride,
                padding,
            } => {
                let (in_data, w_data) = (self.data(input)?, self.data(weight)?);
                let (g_in, g_w) =
                    cpu::conv2d_backward(&in_data.borrow(), &w_data.borrow(), &g_out, stride, padding)?;
                let mut grads = vec![(input, g_in), (weight, g_w)];
                if let Some(b) = bias {
                    grads.push((b, cpu::conv2d_bias_grad(&g_out)?));
                }
                grads
            }
            NodeType::MaxPool2d {
                input,
                kernel_size,
                stride,
            } => {
                let in_data = self.data(input)?;
                let g_in = cpu::max_unpool2d(&g_out, &in_data.borrow(), kernel_size, stride)?;
                vec![(input, g_in)]
            }
        };
        Ok(grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr0, arr1};

    fn leaf(graph: &mut Asg, data: ArrayD<f32>, requires_grad: bool) -> NodeId {
        graph.add_node(None, NodeType::Leaf, SharedArray::new(data), requires_grad)
    }

    #[test]
    fn shared_operand_accumulates() {
        // y = x * x, dy/dx = 2x
        let mut graph = Asg::new();
        let x = leaf(&mut graph, arr1(&[3.0]).into_dyn(), true);
        let y = graph.add_node(
            None,
            NodeType::Multiply(x, x),
            SharedArray::new(arr1(&[9.0]).into_dyn()),
            true,
        );

        backward(&mut graph, y, None).unwrap();
        assert_eq!(graph.get_node(x).unwrap().grad, Some(arr1(&[6.0]).into_dyn()));
    }

    #[test]
    fn root_checks() {
        let mut graph = Asg::new();
        let frozen = leaf(&mut graph, arr0(1.0).into_dyn(), false);
        assert_eq!(
            backward(&mut graph, frozen, None),
            Err(AutogradError::NoGradRequired(frozen))
        );

        let v = leaf(&mut graph, arr1(&[1.0, 2.0]).into_dyn(), true);
        assert_eq!(
            backward(&mut graph, v, None),
            Err(AutogradError::NonScalarRoot(vec![2]))
        );
        assert_eq!(
            backward(&mut graph, v, Some(arr1(&[1.0]).into_dyn())),
            Err(AutogradError::GradientShape {
                expected: vec![2],
                actual: vec![1]
            })
        );
    }

    #[test]
    fn frozen_operands_receive_nothing() {
        let mut graph = Asg::new();
        let w = leaf(&mut graph, arr1(&[2.0]).into_dyn(), true);
        let x = leaf(&mut graph, arr1(&[5.0]).into_dyn(), false);
        let y = graph.add_node(
            None,
            NodeType::Multiply(w, x),
            SharedArray::new(arr1(&[10.0]).into_dyn()),
            true,
        );

        backward(&mut graph, y, None).unwrap();
        assert_eq!(graph.get_node(w).unwrap().grad, Some(arr1(&[5.0]).into_dyn()));
        assert_eq!(graph.get_node(x).unwrap().grad, None);
    }

    #[test]
    fn rejects_operand_written_after_recording() {
        let mut graph = Asg::new();
        let w = leaf(&mut graph, arr1(&[1.0]).into_dyn(), true);
        let x_data = SharedArray::new(arr1(&[2.0]).into_dyn());
        let x = graph.add_node(None, NodeType::Leaf, x_data.clone(), false);
        let y = graph.add_node(
            None,
            NodeType::Multiply(w, x),
            SharedArray::new(arr1(&[2.0]).into_dyn()),
            true,
        );

        x_data.update(|data| data[[0]] += 100.0);
        assert_eq!(
            backward(&mut graph, y, None),
            Err(AutogradError::ModifiedInPlace {
                node: x,
                consumer: y,
                op: "mul"
            })
        );
        assert_eq!(graph.get_node(w).unwrap().grad, None);
    }
}
