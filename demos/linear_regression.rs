//! Linear Regression Example - The simplest possible training example.
//!
//! This example demonstrates the basic training loop:
//! 1. Run forward pass
//! 2. Compute loss and gradients
//! 3. Update parameters
//!
//! We learn the function y = 2*x + 1
//!
//! Run with: `cargo run --example linear_regression`

use blitz::nn::{Linear, Module};
use blitz::optimizers::Sgd;
use blitz::tensor::{GraphContext, Tensor};
use blitz::training::train_step;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Blitz Linear Regression Example ===\n");
    println!("Learning the function: y = 2*x + 1\n");

    // Generate training data: y = 2*x + 1, x in [0, 1)
    let x_data: Vec<f32> = (0..10).map(|i| i as f32 / 10.0).collect();
    let y_data: Vec<f32> = x_data.iter().map(|&x| 2.0 * x + 1.0).collect();

    let context = GraphContext::shared_with_seed(7);
    let x = Tensor::from_vec(&context, &[10, 1], x_data)?;
    let y_true = Tensor::from_vec(&context, &[10, 1], y_data)?;

    // y_pred = x * w + b
    let model = Linear::new(&context, 1, 1, "line");
    let mut optimizer = Sgd::new(model.parameters(), 0.3);

    let epochs = 500;
    println!("Training for {} epochs...\n", epochs);

    for epoch in 0..epochs {
        let loss = train_step(&model, &mut optimizer, &x, &y_true)?;

        if epoch % 50 == 0 || epoch == epochs - 1 {
            println!(
                "Epoch {:3}: Loss = {:8.5}, w = {:6.3}, b = {:6.3}",
                epoch,
                loss,
                model.weight.item()?,
                model.bias.item()?
            );
        }
    }

    let (w_final, b_final) = (model.weight.item()?, model.bias.item()?);
    println!("\n=== Results ===\n");
    println!("Target function:  y = 2.000*x + 1.000");
    println!("Learned function: y = {:.3}*x + {:.3}", w_final, b_final);
    println!("\nError in w: {:.4}", (w_final - 2.0).abs());
    println!("Error in b: {:.4}", (b_final - 1.0).abs());

    Ok(())
}
