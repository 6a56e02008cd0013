//! `Tensor` handles and the `GraphContext` that owns them.
//!
//! A `Tensor` is a lightweight handle: a node id plus a shared reference to
//! the `GraphContext` whose arena ([`Asg`]) holds the actual data. Operations
//! run eagerly on the CPU and, when gradients are tracked, append an
//! operation record to the arena so that [`Tensor::backward`] can walk it
//! in reverse.
//!
//! Dropping the last handle to a node releases it from the arena unless a
//! recorded operation still needs it.
//!
//! ```
//! use blitz::tensor::{GraphContext, Tensor};
//!
//! let ctx = GraphContext::shared();
//! let x = Tensor::ones(&ctx, &[2, 2]).with_requires_grad(true).unwrap();
//! let y = x.add_scalar(2.0).unwrap();
//! let z = (&y * &y).unwrap().mul_scalar(3.0).unwrap();
//! let out = z.mean().unwrap();
//!
//! out.backward().unwrap();
//! assert_eq!(x.grad().unwrap().unwrap()[[0, 0]], 4.5);
//! ```

use crate::asg::{Asg, AsgResult, Node, NodeId, NodeType, Shape};
use crate::autograd::{self, AutogradResult};
use crate::bridge::SharedArray;
use crate::runtime::cpu_backend as cpu;
use crate::runtime::{RuntimeError, RuntimeResult};
use log::debug;
use ndarray::{arr0, ArrayD, IxDyn};
use ndarray_rand::rand_distr::{StandardNormal, Uniform};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;

/// Owns the operation arena, the grad-mode switch and the random generator
/// used by the random constructors and layer initialisation.
///
/// Shared between tensors as `Rc<RefCell<GraphContext>>`.
#[derive(Debug)]
pub struct GraphContext {
    main_graph: Asg,
    grad_enabled: bool,
    rng: StdRng,
}

impl GraphContext {
    /// Creates an empty context with an entropy-seeded generator.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Creates an empty context whose random constructors are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            main_graph: Asg::new(),
            grad_enabled: true,
            rng,
        }
    }

    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn shared_with_seed(seed: u64) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::with_seed(seed)))
    }

    pub fn main_graph(&self) -> &Asg {
        &self.main_graph
    }

    pub fn main_graph_mut(&mut self) -> &mut Asg {
        &mut self.main_graph
    }

    pub fn is_grad_enabled(&self) -> bool {
        self.grad_enabled
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Ends a forward/backward cycle by dropping all non-leaf nodes and any
    /// leaf that lost its last handle while the context was borrowed.
    /// Handles to released nodes report `AsgError::NodeNotFound`.
    pub fn release_intermediates(&mut self) -> usize {
        let released = self.main_graph.release_intermediates();
        debug!(
            "released {} intermediate nodes, {} leaves remain",
            released,
            self.main_graph.len()
        );
        released
    }

    /// Runs `f` with gradient tracking disabled: operations inside produce
    /// plain leaves and record no history.
    pub fn no_grad<R, F>(context: &Rc<RefCell<Self>>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let previous = std::mem::replace(&mut context.borrow_mut().grad_enabled, false);
        let result = f();
        context.borrow_mut().grad_enabled = previous;
        result
    }
}

impl Default for GraphContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one node of a `GraphContext`.
#[derive(Clone)]
pub struct Tensor {
    /// ID of the node in the arena.
    pub node_id: NodeId,
    /// Shared reference to the owning context.
    pub context: Rc<RefCell<GraphContext>>,
    /// Keeps the node alive; shared by every clone of this handle.
    handle: Option<Rc<()>>,
}

impl Drop for Tensor {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if Rc::strong_count(&handle) > 1 {
            return;
        }
        drop(handle);
        // If the context is busy the node is swept by release_intermediates.
        if let Ok(mut ctx) = self.context.try_borrow_mut() {
            ctx.main_graph_mut().release_node(self.node_id);
        }
    }
}

impl Tensor {
    // --- Construction ---

    fn leaf(
        context: &Rc<RefCell<GraphContext>>,
        name: Option<String>,
        data: SharedArray,
        requires_grad: bool,
    ) -> Self {
        let mut ctx = context.borrow_mut();
        let graph = ctx.main_graph_mut();
        let node_id = graph.add_node(name, NodeType::Leaf, data, requires_grad);
        Self {
            node_id,
            context: Rc::clone(context),
            handle: graph.handle(node_id),
        }
    }

    /// Wraps an owned array in a new leaf.
    pub fn from_array(context: &Rc<RefCell<GraphContext>>, data: ArrayD<f32>) -> Self {
        Self::leaf(context, None, SharedArray::new(data), false)
    }

    /// Creates a leaf that views `array`; writes through either handle are
    /// visible through the other.
    pub fn from_shared(context: &Rc<RefCell<GraphContext>>, array: &SharedArray) -> Self {
        Self::leaf(context, None, array.clone(), false)
    }

    pub fn from_vec(
        context: &Rc<RefCell<GraphContext>>,
        shape: &[usize],
        data: Vec<f32>,
    ) -> RuntimeResult<Self> {
        let array = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
        Ok(Self::from_array(context, array))
    }

    pub fn scalar(context: &Rc<RefCell<GraphContext>>, value: f32) -> Self {
        Self::from_array(context, arr0(value).into_dyn())
    }

    pub fn zeros(context: &Rc<RefCell<GraphContext>>, shape: &[usize]) -> Self {
        Self::from_array(context, ArrayD::zeros(IxDyn(shape)))
    }

    pub fn ones(context: &Rc<RefCell<GraphContext>>, shape: &[usize]) -> Self {
        Self::from_array(context, ArrayD::ones(IxDyn(shape)))
    }

    pub fn full(context: &Rc<RefCell<GraphContext>>, shape: &[usize], value: f32) -> Self {
        Self::from_array(context, ArrayD::from_elem(IxDyn(shape), value))
    }

    /// Samples from U[0, 1) using the context generator.
    pub fn rand(context: &Rc<RefCell<GraphContext>>, shape: &[usize]) -> Self {
        Self::uniform(context, shape, 0.0, 1.0)
    }

    /// Samples from N(0, 1) using the context generator.
    pub fn randn(context: &Rc<RefCell<GraphContext>>, shape: &[usize]) -> Self {
        let data = ArrayD::random_using(IxDyn(shape), StandardNormal, context.borrow_mut().rng_mut());
        Self::from_array(context, data)
    }

    /// Samples from U[low, high). Requires `low < high`.
    fn uniform(
        context: &Rc<RefCell<GraphContext>>,
        shape: &[usize],
        low: f32,
        high: f32,
    ) -> Self {
        let data = ArrayD::random_using(
            IxDyn(shape),
            Uniform::new(low, high),
            context.borrow_mut().rng_mut(),
        );
        Self::from_array(context, data)
    }

    /// Creates a named leaf that requires grad.
    pub fn new_parameter(context: &Rc<RefCell<GraphContext>>, name: &str, data: ArrayD<f32>) -> Self {
        Self::leaf(context, Some(name.to_string()), SharedArray::new(data), true)
    }

    pub fn zeros_like(&self) -> AsgResult<Self> {
        Ok(Self::zeros(&self.context, &self.shape()?))
    }

    pub fn ones_like(&self) -> AsgResult<Self> {
        Ok(Self::ones(&self.context, &self.shape()?))
    }

    pub fn randn_like(&self) -> AsgResult<Self> {
        Ok(Self::randn(&self.context, &self.shape()?))
    }

    // --- Queries ---

    fn with_node<R, F>(&self, f: F) -> AsgResult<R>
    where
        F: FnOnce(&Node) -> R,
    {
        let ctx = self.context.borrow();
        ctx.main_graph().get_node(self.node_id).map(f)
    }

    pub fn shape(&self) -> AsgResult<Shape> {
        self.with_node(|n| n.shape())
    }

    pub fn ndim(&self) -> AsgResult<usize> {
        self.with_node(|n| n.data.borrow().ndim())
    }

    pub fn numel(&self) -> AsgResult<usize> {
        self.with_node(|n| n.data.len())
    }

    /// The buffer behind this tensor (an alias, not a copy).
    pub fn shared(&self) -> AsgResult<SharedArray> {
        self.with_node(|n| n.data.clone())
    }

    /// A copy of the current data.
    pub fn to_array(&self) -> AsgResult<ArrayD<f32>> {
        self.with_node(|n| n.data.to_owned_array())
    }

    /// The value of a single-element tensor.
    pub fn item(&self) -> RuntimeResult<f32> {
        let data = self.shared()?;
        let data = data.borrow();
        match data.len() {
            1 => Ok(data.iter().copied().next().unwrap_or_default()),
            _ => Err(RuntimeError::NotAScalar(data.shape().to_vec())),
        }
    }

    pub fn grad(&self) -> AsgResult<Option<ArrayD<f32>>> {
        self.with_node(|n| n.grad.clone())
    }

    pub fn requires_grad(&self) -> AsgResult<bool> {
        self.with_node(|n| n.requires_grad)
    }

    pub fn is_leaf(&self) -> AsgResult<bool> {
        self.with_node(|n| n.is_leaf())
    }

    pub fn name(&self) -> AsgResult<Option<String>> {
        self.with_node(|n| n.name.clone())
    }

    // --- Leaf controls ---

    pub fn set_requires_grad(&self, requires_grad: bool) -> RuntimeResult<()> {
        let mut ctx = self.context.borrow_mut();
        let node = ctx.main_graph_mut().get_node_mut(self.node_id)?;
        if !node.is_leaf() {
            return Err(RuntimeError::NotALeaf(self.node_id));
        }
        node.requires_grad = requires_grad;
        Ok(())
    }

    pub fn with_requires_grad(self, requires_grad: bool) -> RuntimeResult<Self> {
        self.set_requires_grad(requires_grad)?;
        Ok(self)
    }

    /// Resets the accumulated gradient to zeros.
    pub fn zero_grad(&self) -> AsgResult<()> {
        let mut ctx = self.context.borrow_mut();
        let node = ctx.main_graph_mut().get_node_mut(self.node_id)?;
        node.grad = Some(ArrayD::zeros(IxDyn(&node.shape())));
        Ok(())
    }

    /// A new leaf over the same buffer, cut off from the history.
    pub fn detach(&self) -> AsgResult<Self> {
        let data = self.shared()?;
        Ok(Self::leaf(&self.context, None, data, false))
    }

    /// In-place `self += other` (broadcasting `other`). Not recorded.
    pub fn add_(&self, other: &Tensor) -> RuntimeResult<()> {
        self.same_context(other)?;
        let (grad_enabled, requires_grad) = {
            let ctx = self.context.borrow();
            (ctx.is_grad_enabled(), ctx.main_graph().get_node(self.node_id)?.requires_grad)
        };
        if grad_enabled && requires_grad {
            return Err(RuntimeError::InPlaceOnGradTensor(self.node_id));
        }

        let (a, b) = (self.shared()?, other.shared()?);
        let sum = cpu::op_add(&a.borrow(), &b.borrow())?;
        if sum.shape() != a.borrow().shape() {
            return Err(RuntimeError::IncompatibleShapes {
                op: "add_",
                lhs: a.shape(),
                rhs: b.shape(),
            });
        }
        a.update(|data| *data = sum);
        Ok(())
    }

    // --- Recording ---

    fn same_context(&self, other: &Tensor) -> RuntimeResult<()> {
        if Rc::ptr_eq(&self.context, &other.context) {
            Ok(())
        } else {
            Err(RuntimeError::ContextMismatch)
        }
    }

    /// Appends the result of an operation. History is kept only when grad
    /// mode is on and at least one operand requires grad; otherwise the
    /// result is a plain leaf.
    fn record(&self, node_type: NodeType, data: ArrayD<f32>) -> Tensor {
        let mut ctx = self.context.borrow_mut();
        let grad_enabled = ctx.is_grad_enabled();
        let graph = ctx.main_graph_mut();
        let requires_grad = grad_enabled
            && node_type
                .operands()
                .iter()
                .any(|id| graph.get_node(*id).map(|n| n.requires_grad).unwrap_or(false));
        let node_type = if requires_grad { node_type } else { NodeType::Leaf };
        let node_id = graph.add_node(None, node_type, SharedArray::new(data), requires_grad);
        Tensor {
            node_id,
            context: Rc::clone(&self.context),
            handle: graph.handle(node_id),
        }
    }

    fn binary(
        &self,
        other: &Tensor,
        make: fn(NodeId, NodeId) -> NodeType,
        kernel: fn(&ArrayD<f32>, &ArrayD<f32>) -> RuntimeResult<ArrayD<f32>>,
    ) -> RuntimeResult<Tensor> {
        self.same_context(other)?;
        let (a, b) = (self.shared()?, other.shared()?);
        let data = kernel(&a.borrow(), &b.borrow())?;
        Ok(self.record(make(self.node_id, other.node_id), data))
    }

    fn unary<F>(&self, node_type: NodeType, kernel: F) -> RuntimeResult<Tensor>
    where
        F: FnOnce(&ArrayD<f32>) -> RuntimeResult<ArrayD<f32>>,
    {
        let a = self.shared()?;
        let data = kernel(&a.borrow())?;
        Ok(self.record(node_type, data))
    }

    // --- Arithmetic ---

    pub fn add(&self, other: &Tensor) -> RuntimeResult<Tensor> {
        self.binary(other, NodeType::Add, cpu::op_add)
    }

    pub fn sub(&self, other: &Tensor) -> RuntimeResult<Tensor> {
        self.binary(other, NodeType::Subtract, cpu::op_subtract)
    }

    pub fn mul(&self, other: &Tensor) -> RuntimeResult<Tensor> {
        self.binary(other, NodeType::Multiply, cpu::op_multiply)
    }

    pub fn div(&self, other: &Tensor) -> RuntimeResult<Tensor> {
        self.binary(other, NodeType::Divide, cpu::op_divide)
    }

    pub fn matmul(&self, other: &Tensor) -> RuntimeResult<Tensor> {
        self.binary(other, NodeType::MatrixMultiply, cpu::op_matmul)
    }

    pub fn add_scalar(&self, value: f32) -> RuntimeResult<Tensor> {
        self.unary(NodeType::AddScalar(self.node_id, value), |a| Ok(a.mapv(|x| x + value)))
    }

    pub fn mul_scalar(&self, value: f32) -> RuntimeResult<Tensor> {
        self.unary(NodeType::MulScalar(self.node_id, value), |a| Ok(a.mapv(|x| x * value)))
    }

    pub fn powf(&self, exponent: f32) -> RuntimeResult<Tensor> {
        self.unary(NodeType::PowScalar(self.node_id, exponent), |a| {
            Ok(a.mapv(|x| x.powf(exponent)))
        })
    }

    pub fn neg(&self) -> RuntimeResult<Tensor> {
        self.unary(NodeType::Negate(self.node_id), |a| Ok(a.mapv(|x| -x)))
    }

    // --- Activations ---

    pub fn relu(&self) -> RuntimeResult<Tensor> {
        self.unary(NodeType::ReLU(self.node_id), |a| Ok(cpu::op_relu(a)))
    }

    pub fn sigmoid(&self) -> RuntimeResult<Tensor> {
        self.unary(NodeType::Sigmoid(self.node_id), |a| Ok(cpu::op_sigmoid(a)))
    }

    // --- Reductions ---

    /// Sum of all elements as a 0-d tensor.
    pub fn sum(&self) -> RuntimeResult<Tensor> {
        self.unary(NodeType::Sum(self.node_id), |a| Ok(arr0(a.sum()).into_dyn()))
    }

    /// Mean of all elements as a 0-d tensor.
    pub fn mean(&self) -> RuntimeResult<Tensor> {
        self.unary(NodeType::Mean(self.node_id), |a| {
            a.mean()
                .map(|m| arr0(m).into_dyn())
                .ok_or_else(|| RuntimeError::ShapeError("mean of an empty tensor".to_string()))
        })
    }

    // --- Layout ---

    /// Reshapes to `shape`; one dimension may be `-1` and is inferred.
    /// The element count must match exactly.
    pub fn reshape(&self, shape: &[isize]) -> RuntimeResult<Tensor> {
        let target = cpu::resolve_shape(self.numel()?, shape)?;
        self.unary(NodeType::Reshape(self.node_id), |a| cpu::op_reshape(a, &target))
    }

    /// Alias of [`Tensor::reshape`].
    pub fn view(&self, shape: &[isize]) -> RuntimeResult<Tensor> {
        self.reshape(shape)
    }

    /// Collapses every dimension from `start_dim` on into one.
    pub fn flatten(&self, start_dim: usize) -> RuntimeResult<Tensor> {
        let shape = self.shape()?;
        if start_dim >= shape.len() {
            return Err(RuntimeError::ShapeError(format!(
                "flatten: start_dim {} out of range for shape {:?}",
                start_dim, shape
            )));
        }
        let mut target: Vec<isize> = shape[..start_dim].iter().map(|&d| d as isize).collect();
        target.push(shape[start_dim..].iter().product::<usize>() as isize);
        self.reshape(&target)
    }

    pub fn transpose(&self, axis1: usize, axis2: usize) -> RuntimeResult<Tensor> {
        self.unary(NodeType::Transpose(self.node_id, axis1, axis2), |a| {
            cpu::op_transpose(a, axis1, axis2)
        })
    }

    /// Matrix transpose of a 2-D tensor.
    pub fn t(&self) -> RuntimeResult<Tensor> {
        let ndim = self.ndim()?;
        if ndim != 2 {
            return Err(RuntimeError::InvalidRank { op: "t", expected: 2, actual: ndim });
        }
        self.transpose(0, 1)
    }

    // --- Convolution and pooling ---

    /// 2D convolution over a `[N, C_in, H, W]` input with a
    /// `[C_out, C_in, kH, kW]` weight and optional `[C_out]` bias.
    pub fn conv2d(
        &self,
        weight: &Tensor,
        bias: Option<&Tensor>,
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> RuntimeResult<Tensor> {
        self.same_context(weight)?;
        if let Some(b) = bias {
            self.same_context(b)?;
        }
        let input = self.shared()?;
        let w = weight.shared()?;
        let b = bias.map(Tensor::shared).transpose()?;
        let data = {
            let b_ref = b.as_ref().map(|b| b.borrow());
            cpu::op_conv2d(&input.borrow(), &w.borrow(), b_ref.as_deref(), stride, padding)?
        };
        Ok(self.record(
            NodeType::Conv2d {
                input: self.node_id,
                weight: weight.node_id,
                bias: bias.map(|b| b.node_id),
                stride,
                padding,
            },
            data,
        ))
    }

    pub fn max_pool2d(&self, kernel_size: (usize, usize), stride: (usize, usize)) -> RuntimeResult<Tensor> {
        self.unary(
            NodeType::MaxPool2d {
                input: self.node_id,
                kernel_size,
                stride,
            },
            |a| cpu::op_max_pool2d(a, kernel_size, stride),
        )
    }

    // --- Differentiation ---

    /// Backpropagates from this single-element tensor, accumulating into
    /// the `grad` of every reachable leaf that requires grad.
    pub fn backward(&self) -> AutogradResult<()> {
        let mut ctx = self.context.borrow_mut();
        autograd::backward(ctx.main_graph_mut(), self.node_id, None)
    }

    /// Backpropagates an explicit upstream gradient of this tensor's shape.
    pub fn backward_with(&self, gradient: ArrayD<f32>) -> AutogradResult<()> {
        let mut ctx = self.context.borrow_mut();
        autograd::backward(ctx.main_graph_mut(), self.node_id, Some(gradient))
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("node_id", &self.node_id)
            .field("shape", &self.shape().ok())
            .finish()
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctx = self.context.borrow();
        match ctx.main_graph().get_node(self.node_id) {
            Ok(node) => {
                write!(f, "tensor({}", node.data.borrow())?;
                if !node.is_leaf() {
                    write!(f, ", grad_fn=<{}>", node.node_type.op_name())?;
                } else if node.requires_grad {
                    write!(f, ", requires_grad=true")?;
                }
                write!(f, ")")
            }
            Err(e) => write!(f, "tensor(<{}>)", e),
        }
    }
}

// Operators for `&a + &b` style. Every operation can fail on shapes, so the
// output is a `Result`.

impl Add<&Tensor> for &Tensor {
    type Output = RuntimeResult<Tensor>;
    fn add(self, rhs: &Tensor) -> Self::Output {
        Tensor::add(self, rhs)
    }
}

impl Sub<&Tensor> for &Tensor {
    type Output = RuntimeResult<Tensor>;
    fn sub(self, rhs: &Tensor) -> Self::Output {
        Tensor::sub(self, rhs)
    }
}

impl Mul<&Tensor> for &Tensor {
    type Output = RuntimeResult<Tensor>;
    fn mul(self, rhs: &Tensor) -> Self::Output {
        Tensor::mul(self, rhs)
    }
}

impl Div<&Tensor> for &Tensor {
    type Output = RuntimeResult<Tensor>;
    fn div(self, rhs: &Tensor) -> Self::Output {
        Tensor::div(self, rhs)
    }
}

impl Add<f32> for &Tensor {
    type Output = RuntimeResult<Tensor>;
    fn add(self, rhs: f32) -> Self::Output {
        self.add_scalar(rhs)
    }
}

impl Sub<f32> for &Tensor {
    type Output = RuntimeResult<Tensor>;
    fn sub(self, rhs: f32) -> Self::Output {
        self.add_scalar(-rhs)
    }
}

impl Mul<f32> for &Tensor {
    type Output = RuntimeResult<Tensor>;
    fn mul(self, rhs: f32) -> Self::Output {
        self.mul_scalar(rhs)
    }
}

impl Div<f32> for &Tensor {
    type Output = RuntimeResult<Tensor>;
    fn div(self, rhs: f32) -> Self::Output {
        self.mul_scalar(1.0 / rhs)
    }
}

impl Neg for &Tensor {
    type Output = RuntimeResult<Tensor>;
    fn neg(self) -> Self::Output {
        Tensor::neg(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::AsgError;
    use ndarray::arr2;

    #[test]
    fn constructors_report_shape() {
        let ctx = GraphContext::shared_with_seed(0);
        assert_eq!(Tensor::zeros(&ctx, &[5, 3]).shape().unwrap(), vec![5, 3]);
        assert_eq!(Tensor::randn(&ctx, &[4, 4]).numel().unwrap(), 16);
        assert_eq!(Tensor::scalar(&ctx, 3.5).item().unwrap(), 3.5);

        let r = Tensor::rand(&ctx, &[100]).to_array().unwrap();
        assert!(r.iter().all(|&v| (0.0..1.0).contains(&v)));

        assert!(Tensor::from_vec(&ctx, &[2, 2], vec![1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn seeded_contexts_are_reproducible() {
        let a = Tensor::randn(&GraphContext::shared_with_seed(7), &[3, 3]).to_array().unwrap();
        let b = Tensor::randn(&GraphContext::shared_with_seed(7), &[3, 3]).to_array().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn operators_compute_eagerly() {
        let ctx = GraphContext::shared();
        let x = Tensor::from_vec(&ctx, &[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let y = Tensor::ones(&ctx, &[2, 2]);

        let sum = (&x + &y).unwrap();
        assert_eq!(sum.to_array().unwrap(), arr2(&[[2.0, 3.0], [4.0, 5.0]]).into_dyn());
        assert_eq!((&x * 2.0).unwrap().to_array().unwrap()[[1, 1]], 8.0);
        assert_eq!((&x - 1.0).unwrap().to_array().unwrap()[[0, 0]], 0.0);
        assert_eq!((-&x).unwrap().to_array().unwrap()[[0, 1]], -2.0);
        assert_eq!(x.t().unwrap().to_array().unwrap()[[0, 1]], 3.0);
    }

    #[test]
    fn item_rejects_multi_element() {
        let ctx = GraphContext::shared();
        let x = Tensor::ones(&ctx, &[2]);
        assert_eq!(x.item().unwrap_err(), RuntimeError::NotAScalar(vec![2]));
    }

    #[test]
    fn view_infers_dimension() {
        let ctx = GraphContext::shared();
        let x = Tensor::randn(&ctx, &[4, 4]);
        assert_eq!(x.view(&[16]).unwrap().shape().unwrap(), vec![16]);
        assert_eq!(x.view(&[-1, 8]).unwrap().shape().unwrap(), vec![2, 8]);
        assert!(x.view(&[-1, 5]).is_err());
    }

    #[test]
    fn flatten_keeps_batch_dim() {
        let ctx = GraphContext::shared();
        let x = Tensor::zeros(&ctx, &[2, 16, 5, 5]);
        assert_eq!(x.flatten(1).unwrap().shape().unwrap(), vec![2, 400]);
        assert!(x.flatten(4).is_err());
    }

    #[test]
    fn history_is_pruned_without_grad() {
        let ctx = GraphContext::shared();
        let x = Tensor::ones(&ctx, &[2]);
        let w = Tensor::ones(&ctx, &[2]).with_requires_grad(true).unwrap();

        let plain = x.add_scalar(1.0).unwrap();
        assert!(plain.is_leaf().unwrap());
        assert!(!plain.requires_grad().unwrap());

        let tracked = (&x * &w).unwrap();
        assert!(!tracked.is_leaf().unwrap());
        assert!(tracked.requires_grad().unwrap());
        assert_eq!(tracked.to_string(), "tensor([1, 1], grad_fn=<mul>)");

        let untracked = GraphContext::no_grad(&ctx, || (&x * &w).unwrap());
        assert!(untracked.is_leaf().unwrap());
        assert!(ctx.borrow().is_grad_enabled());
    }

    #[test]
    fn requires_grad_only_on_leaves() {
        let ctx = GraphContext::shared();
        let w = Tensor::ones(&ctx, &[2]).with_requires_grad(true).unwrap();
        let y = w.mul_scalar(2.0).unwrap();
        assert_eq!(y.set_requires_grad(false).unwrap_err(), RuntimeError::NotALeaf(y.node_id));
    }

    #[test]
    fn in_place_add_respects_grad_mode() {
        let ctx = GraphContext::shared();
        let x = Tensor::ones(&ctx, &[2, 2]);
        x.add_(&Tensor::scalar(&ctx, 1.0)).unwrap();
        assert_eq!(x.to_array().unwrap().sum(), 8.0);
        assert!(x.add_(&Tensor::ones(&ctx, &[3])).is_err());

        let w = Tensor::ones(&ctx, &[2]).with_requires_grad(true).unwrap();
        let one = Tensor::ones(&ctx, &[2]);
        assert_eq!(w.add_(&one).unwrap_err(), RuntimeError::InPlaceOnGradTensor(w.node_id));
        GraphContext::no_grad(&ctx, || w.add_(&one)).unwrap();
        assert_eq!(w.to_array().unwrap()[[0]], 2.0);
    }

    #[test]
    fn operands_must_share_a_context() {
        let a = Tensor::ones(&GraphContext::shared(), &[2]);
        let b = Tensor::ones(&GraphContext::shared(), &[2]);
        assert_eq!((&a + &b).unwrap_err(), RuntimeError::ContextMismatch);
    }

    #[test]
    fn released_handles_report_missing_node() {
        let ctx = GraphContext::shared();
        let w = Tensor::ones(&ctx, &[2]).with_requires_grad(true).unwrap();
        let y = w.mul_scalar(2.0).unwrap();
        assert_eq!(ctx.borrow_mut().release_intermediates(), 1);
        assert_eq!(y.shape().unwrap_err(), AsgError::NodeNotFound(y.node_id));
        assert!(w.shape().is_ok());
    }

    #[test]
    fn dropped_handles_free_their_nodes() {
        let ctx = GraphContext::shared();
        let w = Tensor::ones(&ctx, &[2]).with_requires_grad(true).unwrap();
        let loss = {
            let x = Tensor::ones(&ctx, &[2]);
            (&x * &w).unwrap().sum().unwrap()
        };
        // x and the product are still needed by the recorded sum.
        assert_eq!(ctx.borrow().main_graph().len(), 4);
        loss.backward().unwrap();

        drop(loss);
        assert_eq!(ctx.borrow().main_graph().len(), 1);

        let alias = w.clone();
        drop(w);
        assert_eq!(alias.grad().unwrap(), Some(ArrayD::ones(IxDyn(&[2]))));

        GraphContext::no_grad(&ctx, || alias.mul_scalar(2.0).unwrap().sum().unwrap());
        assert_eq!(ctx.borrow().main_graph().len(), 1);
    }
}
