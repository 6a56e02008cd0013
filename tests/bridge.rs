use blitz::bridge::SharedArray;
use blitz::tensor::{GraphContext, Tensor};
use ndarray::{ArrayD, IxDyn};

#[test]
fn tensor_to_array_aliases() {
    let ctx = GraphContext::shared();
    let a = Tensor::ones(&ctx, &[5]);
    let b = a.shared().unwrap();

    a.add_(&Tensor::scalar(&ctx, 1.0)).unwrap();
    assert!(b.borrow().iter().all(|&v| v == 2.0));

    b.fill(7.0);
    assert_eq!(a.to_array().unwrap()[[4]], 7.0);
}

#[test]
fn array_to_tensor_aliases() {
    let ctx = GraphContext::shared();
    let array = SharedArray::new(ArrayD::ones(IxDyn(&[5])));
    let t = Tensor::from_shared(&ctx, &array);

    array.update(|data| data.mapv_inplace(|v| v + 1.0));
    assert!(t.to_array().unwrap().iter().all(|&v| v == 2.0));

    let round_trip = Tensor::from_shared(&ctx, &t.shared().unwrap());
    assert!(round_trip.shared().unwrap().aliases(&array));
}

#[test]
fn copies_are_independent() {
    let ctx = GraphContext::shared();
    let t = Tensor::from_array(&ctx, ArrayD::zeros(IxDyn(&[3])));
    let mut copy = t.to_array().unwrap();
    copy[[0]] = 5.0;
    assert_eq!(t.to_array().unwrap()[[0]], 0.0);
}

#[test]
fn in_place_update_of_parameter_needs_no_grad() {
    let ctx = GraphContext::shared();
    let p = Tensor::new_parameter(&ctx, "p", ArrayD::zeros(IxDyn(&[2])));
    let step = Tensor::full(&ctx, &[2], 0.5);

    assert!(p.add_(&step).is_err());
    GraphContext::no_grad(&ctx, || p.add_(&step)).unwrap();
    assert_eq!(p.to_array().unwrap()[[1]], 0.5);
}
