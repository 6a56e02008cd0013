//! Tensor/array bridge.
//!
//! A [`SharedArray`] is an `ndarray` buffer that several owners can view at
//! once. A `Tensor` built with [`Tensor::from_shared`](crate::tensor::Tensor::from_shared)
//! and the array it came from alias one buffer: writing through either side
//! is visible through the other. [`Tensor::shared`](crate::tensor::Tensor::shared)
//! goes the other way and hands out the buffer behind an existing tensor.
//!
//! ```
//! use blitz::bridge::SharedArray;
//! use blitz::tensor::{GraphContext, Tensor};
//!
//! let ctx = GraphContext::shared();
//! let array = SharedArray::new(ndarray::ArrayD::ones(ndarray::IxDyn(&[5])));
//! let tensor = Tensor::from_shared(&ctx, &array);
//!
//! array.update(|a| a.mapv_inplace(|x| x + 1.0));
//! assert_eq!(tensor.to_array().unwrap()[[0]], 2.0);
//! ```

use crate::asg::Shape;
use ndarray::{ArrayD, IxDyn};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

/// Reference-counted, interior-mutable `ArrayD<f32>`.
///
/// Cloning the handle never copies the data. Every write (including each
/// `borrow_mut`) bumps a version counter shared by all aliases, which the
/// backward pass uses to detect buffers changed after they were recorded.
#[derive(Debug, Clone)]
pub struct SharedArray {
    data: Rc<RefCell<ArrayD<f32>>>,
    version: Rc<Cell<u64>>,
}

impl SharedArray {
    pub fn new(data: ArrayD<f32>) -> Self {
        Self {
            data: Rc::new(RefCell::new(data)),
            version: Rc::new(Cell::new(0)),
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(ArrayD::zeros(IxDyn(shape)))
    }

    pub fn shape(&self) -> Shape {
        self.data.borrow().shape().to_vec()
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }

    /// Number of writes made through any alias so far.
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    fn bump(&self) {
        self.version.set(self.version.get().wrapping_add(1));
    }

    pub fn borrow(&self) -> Ref<'_, ArrayD<f32>> {
        self.data.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, ArrayD<f32>> {
        self.bump();
        self.data.borrow_mut()
    }

    /// Copies the current contents out of the shared buffer.
    pub fn to_owned_array(&self) -> ArrayD<f32> {
        self.data.borrow().clone()
    }

    /// Mutates the buffer in place; every alias observes the change.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ArrayD<f32>),
    {
        f(&mut self.borrow_mut());
    }

    pub fn fill(&self, value: f32) {
        self.borrow_mut().fill(value);
    }

    /// `true` when both handles point at the same buffer.
    pub fn aliases(&self, other: &SharedArray) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl From<ArrayD<f32>> for SharedArray {
    fn from(data: ArrayD<f32>) -> Self {
        Self::new(data)
    }
}
