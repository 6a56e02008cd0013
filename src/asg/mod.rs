//! ASG: the operation arena behind every `Tensor`.
//!
//! Each node owns its computed value and, for non-leaf nodes, the record of the
//! operation that produced it. Operand ids are always smaller than the id of
//! the node that consumes them, so the arena is acyclic by construction and a
//! descending-id sweep is a valid reverse topological order.
//!
//! A node lives while a `Tensor` handle refers to it or while a recorded
//! operation that is itself alive consumes it. Dropping the last handle of
//! an unconsumed node removes it and, transitively, any operands that were
//! only kept for it.

use crate::bridge::SharedArray;
use ndarray::ArrayD;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use thiserror::Error;

/// Node identifier.
pub type NodeId = usize;
/// Tensor shape.
pub type Shape = Vec<usize>;

pub type AsgResult<T> = std::result::Result<T, AsgError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsgError {
    #[error("Node with ID {0} not found (it may have been released with release_intermediates)")]
    NodeNotFound(NodeId),
}

/// A value in the arena: data, gradient bookkeeping and the producing operation.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: Option<String>,
    pub node_type: NodeType,
    pub data: SharedArray,
    pub requires_grad: bool,
    /// Accumulated gradient. `None` until a backward pass reaches this leaf
    /// or the caller zeroes it.
    pub grad: Option<ArrayD<f32>>,
    /// Version of `data` when the node was recorded.
    pub version: u64,
    /// Version of each operand's data when the node was recorded, in the
    /// order of `NodeType::operands`.
    pub operand_versions: Vec<u64>,
    handle: Weak<()>,
    consumers: usize,
}

impl Node {
    pub fn shape(&self) -> Shape {
        self.data.shape()
    }

    pub fn is_leaf(&self) -> bool {
        self.node_type.is_leaf()
    }

    /// `true` while at least one handle refers to this node.
    pub fn has_handles(&self) -> bool {
        self.handle.strong_count() > 0
    }

    fn is_unreferenced(&self) -> bool {
        self.consumers == 0 && !self.has_handles()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeType {
    /// No recorded producer: user data, parameters and results computed
    /// without gradient tracking.
    Leaf,

    // Binary (broadcasting)
    Add(NodeId, NodeId),
    Subtract(NodeId, NodeId),
    Multiply(NodeId, NodeId),
    Divide(NodeId, NodeId),
    MatrixMultiply(NodeId, NodeId),

    // With a scalar constant
    AddScalar(NodeId, f32),
    MulScalar(NodeId, f32),
    PowScalar(NodeId, f32),

    // Unary
    Negate(NodeId),
    ReLU(NodeId),
    Sigmoid(NodeId),

    // Reductions over every element, producing a 0-d value
    Sum(NodeId),
    Mean(NodeId),

    // Transformations
    Reshape(NodeId),
    Transpose(NodeId, usize, usize),

    // Convolution and pooling, [N, C, H, W] layout
    Conv2d {
        input: NodeId,
        weight: NodeId,
        bias: Option<NodeId>,
        stride: (usize, usize),
        padding: (usize, usize),
    },
    MaxPool2d {
        input: NodeId,
        kernel_size: (usize, usize),
        stride: (usize, usize),
    },
}

impl NodeType {
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeType::Leaf)
    }

    /// Ids of the nodes this operation consumed.
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            NodeType::Leaf => vec![],

            NodeType::Add(a, b)
            | NodeType::Subtract(a, b)
            | NodeType::Multiply(a, b)
            | NodeType::Divide(a, b)
            | NodeType::MatrixMultiply(a, b) => vec![*a, *b],

            NodeType::AddScalar(a, _)
            | NodeType::MulScalar(a, _)
            | NodeType::PowScalar(a, _)
            | NodeType::Negate(a)
            | NodeType::ReLU(a)
            | NodeType::Sigmoid(a)
            | NodeType::Sum(a)
            | NodeType::Mean(a)
            | NodeType::Reshape(a)
            | NodeType::Transpose(a, _, _) => vec![*a],

            NodeType::Conv2d { input, weight, bias, .. } => {
                let mut ids = vec![*input, *weight];
                ids.extend(bias.iter().copied());
                ids
            }
            NodeType::MaxPool2d { input, .. } => vec![*input],
        }
    }

    /// Short operation name used in logs and error messages.
    pub fn op_name(&self) -> &'static str {
        match self {
            NodeType::Leaf => "leaf",
            NodeType::Add(..) => "add",
            NodeType::Subtract(..) => "sub",
            NodeType::Multiply(..) => "mul",
            NodeType::Divide(..) => "div",
            NodeType::MatrixMultiply(..) => "matmul",
            NodeType::AddScalar(..) => "add_scalar",
            NodeType::MulScalar(..) => "mul_scalar",
            NodeType::PowScalar(..) => "powf",
            NodeType::Negate(..) => "neg",
            NodeType::ReLU(..) => "relu",
            NodeType::Sigmoid(..) => "sigmoid",
            NodeType::Sum(..) => "sum",
            NodeType::Mean(..) => "mean",
            NodeType::Reshape(..) => "reshape",
            NodeType::Transpose(..) => "transpose",
            NodeType::Conv2d { .. } => "conv2d",
            NodeType::MaxPool2d { .. } => "max_pool2d",
        }
    }
}

/// The arena itself.
#[derive(Debug, Clone, Default)]
pub struct Asg {
    pub nodes: HashMap<NodeId, Node>,
    next_id: NodeId,
}

impl Asg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        name: Option<String>,
        node_type: NodeType,
        data: SharedArray,
        requires_grad: bool,
    ) -> NodeId {
        // Ids are never reused, even after release_intermediates.
        let id = self.next_id;
        self.next_id += 1;
        let operand_versions = node_type
            .operands()
            .into_iter()
            .map(|operand| match self.nodes.get_mut(&operand) {
                Some(node) => {
                    node.consumers += 1;
                    node.data.version()
                }
                None => 0,
            })
            .collect();
        let node = Node {
            id,
            name,
            node_type,
            version: data.version(),
            data,
            requires_grad,
            grad: None,
            operand_versions,
            handle: Weak::new(),
            consumers: 0,
        };
        self.nodes.insert(id, node);
        id
    }

    /// A liveness token for `id`. The node is kept while any token for it
    /// is alive. Returns `None` for unknown ids.
    pub fn handle(&mut self, id: NodeId) -> Option<Rc<()>> {
        let node = self.nodes.get_mut(&id)?;
        let token = match node.handle.upgrade() {
            Some(token) => token,
            None => {
                let token = Rc::new(());
                node.handle = Rc::downgrade(&token);
                token
            }
        };
        Some(token)
    }

    /// Removes `id` if neither a handle nor a live operation refers to it,
    /// then every operand that this leaves unreferenced.
    ///
    /// Returns the number of released nodes.
    pub fn release_node(&mut self, id: NodeId) -> usize {
        let mut released = 0;
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if !self.nodes.get(&id).is_some_and(Node::is_unreferenced) {
                continue;
            }
            let Some(node) = self.nodes.remove(&id) else {
                continue;
            };
            released += 1;
            for operand in node.node_type.operands() {
                if let Some(consumed) = self.nodes.get_mut(&operand) {
                    consumed.consumers = consumed.consumers.saturating_sub(1);
                    stack.push(operand);
                }
            }
        }
        released
    }

    pub fn get_node(&self, id: NodeId) -> AsgResult<&Node> {
        self.nodes.get(&id).ok_or(AsgError::NodeNotFound(id))
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> AsgResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(AsgError::NodeNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drops every node with a recorded producer, ending one forward/backward
    /// cycle, along with leaves that no handle refers to any more. Leaves
    /// still held (inputs, parameters) keep their data and gradients.
    ///
    /// Returns the number of released nodes.
    pub fn release_intermediates(&mut self) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|_, node| node.is_leaf() && node.has_handles());
        for node in self.nodes.values_mut() {
            node.consumers = 0;
        }
        before - self.nodes.len()
    }
}
