//! LeNet-style classifier for single-channel 32x32 images.

use crate::nn::{Conv2d, Flatten, Linear, MaxPool2d, Module, ReLU};
use crate::runtime::RuntimeResult;
use crate::tensor::{GraphContext, Tensor};
use log::debug;
use std::cell::RefCell;
use std::rc::Rc;

/// Two convolution blocks followed by three fully connected layers:
///
/// ```text
/// [N,1,32,32] conv 5x5 -> [N,6,28,28] relu, pool 2 -> [N,6,14,14]
///             conv 5x5 -> [N,16,10,10] relu, pool 2 -> [N,16,5,5]
///             flatten  -> [N,400] fc -> 120 relu fc -> 84 relu fc -> 10
/// ```
///
/// There is no implicit batching: a single image must still be passed as
/// `[1, 1, 32, 32]`.
pub struct Net {
    pub conv1: Conv2d,
    pub conv2: Conv2d,
    pub fc1: Linear,
    pub fc2: Linear,
    pub fc3: Linear,
    pool: MaxPool2d,
    relu: ReLU,
    flatten: Flatten,
}

impl Net {
    pub fn new(context: &Rc<RefCell<GraphContext>>) -> Self {
        Self {
            conv1: Conv2d::new(context, "conv1", 1, 6, (5, 5)),
            conv2: Conv2d::new(context, "conv2", 6, 16, (5, 5)),
            fc1: Linear::new(context, 16 * 5 * 5, 120, "fc1"),
            fc2: Linear::new(context, 120, 84, "fc2"),
            fc3: Linear::new(context, 84, 10, "fc3"),
            pool: MaxPool2d::square(2),
            relu: ReLU,
            flatten: Flatten::new(1),
        }
    }
}

impl Module for Net {
    fn forward(&self, inputs: &Tensor) -> RuntimeResult<Tensor> {
        let x = self.pool.forward(&self.relu.forward(&self.conv1.forward(inputs)?)?)?;
        let x = self.pool.forward(&self.relu.forward(&self.conv2.forward(&x)?)?)?;
        let x = self.flatten.forward(&x)?;
        debug!("flattened features: {:?}", x.shape()?);
        let x = self.relu.forward(&self.fc1.forward(&x)?)?;
        let x = self.relu.forward(&self.fc2.forward(&x)?)?;
        self.fc3.forward(&x)
    }

    fn parameters(&self) -> Vec<Tensor> {
        [
            self.conv1.parameters(),
            self.conv2.parameters(),
            self.fc1.parameters(),
            self.fc2.parameters(),
            self.fc3.parameters(),
        ]
        .concat()
    }
}
