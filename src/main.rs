//! Walkthrough binary: tensors, the array bridge, autograd, the network, loss
//! and parameter update, followed by a short training run.

use blitz::bridge::SharedArray;
use blitz::config::TrainConfig;
use blitz::losses::mse_loss;
use blitz::nn::{Module, Net};
use blitz::optimizers::{Optimizer, Sgd};
use blitz::serialization::save_parameters;
use blitz::tensor::{GraphContext, Tensor};
use blitz::training::fit;

use clap::Parser;
use log::info;
use ndarray::{ArrayD, IxDyn};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Blitz: eager tensors and autograd, step by step", long_about = None)]
struct Args {
    /// JSON training configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Learning rate (overrides the config file)
    #[arg(long)]
    lr: Option<f32>,

    /// Number of training steps (overrides the config file)
    #[arg(long)]
    epochs: Option<usize>,

    /// Seed for all random tensors and parameter initialisation
    #[arg(long)]
    seed: Option<u64>,

    /// Write the trained parameters to this SafeTensors file
    #[arg(long)]
    save: Option<PathBuf>,

    /// More log output (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    stderrlog::new()
        .module(module_path!())
        .quiet(args.quiet)
        .verbosity(2 + args.verbose as usize)
        .init()?;

    let mut config = match &args.config {
        Some(path) => TrainConfig::load(path)?,
        None => TrainConfig::default(),
    };
    if let Some(lr) = args.lr {
        config.learning_rate = lr;
    }
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate()?;
    info!("config: {:?}", config);

    let context = match config.seed {
        Some(seed) => GraphContext::shared_with_seed(seed),
        None => GraphContext::shared(),
    };

    tensors(&context)?;
    bridge(&context)?;
    autograd(&context)?;
    let net = network(&context)?;
    loss_and_update(&context, &net, config.learning_rate)?;
    train(&context, &net, &config)?;

    if let Some(path) = &args.save {
        save_parameters(path, &net)?;
    }
    Ok(())
}

fn tensors(ctx: &Rc<RefCell<GraphContext>>) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n--- [1] Tensors ---");
    let x = Tensor::zeros(ctx, &[5, 3]);
    println!("zeros: {}", x);

    let x = Tensor::from_vec(ctx, &[2], vec![5.5, 3.0])?;
    println!("from_vec: {}", x);

    let x = Tensor::ones(ctx, &[5, 3]);
    let y = Tensor::rand(ctx, &[5, 3]);
    println!("ones + rand: {}", (&x + &y)?);

    let x = Tensor::randn(ctx, &[4, 4]);
    println!("view: {:?} -> {:?} -> {:?}", x.shape()?, x.view(&[16])?.shape()?, x.view(&[-1, 8])?.shape()?);

    let x = Tensor::randn(ctx, &[1]);
    println!("item: {}", x.item()?);
    Ok(())
}

fn bridge(ctx: &Rc<RefCell<GraphContext>>) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n--- [2] Tensor/array bridge ---");
    let a = Tensor::ones(ctx, &[5]);
    let b = a.shared()?;
    a.add_(&Tensor::scalar(ctx, 1.0))?;
    println!("tensor {} and its array {} share storage", a, b.borrow());

    let array = SharedArray::new(ArrayD::ones(IxDyn(&[5])));
    let t = Tensor::from_shared(ctx, &array);
    array.update(|data| data.mapv_inplace(|v| v + 1.0));
    println!("array {} and its tensor {} share storage", array.borrow(), t);
    Ok(())
}

fn autograd(ctx: &Rc<RefCell<GraphContext>>) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n--- [3] Autograd ---");
    let x = Tensor::ones(ctx, &[2, 2]).with_requires_grad(true)?;
    let y = x.add_scalar(2.0)?;
    println!("y = {}", y);

    let z = (&(&y * &y)? * 3.0)?;
    let out = z.mean()?;
    println!("z = {}\nout = {}", z, out);

    out.backward()?;
    println!("d(out)/dx = {:?}", x.grad()?);

    let x = Tensor::randn(ctx, &[3]).with_requires_grad(true)?;
    let mut y = x.mul_scalar(2.0)?;
    while y.to_array()?.mapv(|v| v * v).sum().sqrt() < 1000.0 {
        y = y.mul_scalar(2.0)?;
    }
    y.backward_with(ndarray::arr1(&[0.1, 1.0, 0.0001]).into_dyn())?;
    println!("vector-Jacobian product: {:?}", x.grad()?);

    let untracked = GraphContext::no_grad(ctx, || x.powf(2.0))?;
    println!(
        "requires_grad: {} / under no_grad: {}",
        x.powf(2.0)?.requires_grad()?,
        untracked.requires_grad()?
    );
    Ok(())
}

fn network(ctx: &Rc<RefCell<GraphContext>>) -> Result<Net, Box<dyn std::error::Error>> {
    println!("\n--- [4] Network ---");
    let net = Net::new(ctx);
    for (name, param) in net.named_parameters()? {
        println!("{:<12} {:?}", name, param.shape()?);
    }
    println!("total parameters: {}", net.num_parameters()?);

    let input = Tensor::randn(ctx, &[1, 1, 32, 32]);
    let output = net.forward(&input)?;
    println!("output: {}", output);

    net.zero_grad()?;
    output.backward_with(Tensor::randn(ctx, &[1, 10]).to_array()?)?;
    Ok(net)
}

fn loss_and_update(
    ctx: &Rc<RefCell<GraphContext>>,
    net: &Net,
    learning_rate: f32,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n--- [5] Loss and update ---");
    let input = Tensor::randn(ctx, &[1, 1, 32, 32]);
    let target = Tensor::randn(ctx, &[1, 10]);
    let loss = mse_loss(&net.forward(&input)?, &target)?;
    println!("loss: {}", loss);

    let mut optimizer = Sgd::new(net.parameters(), learning_rate);
    optimizer.zero_grad()?;
    let bias = net.conv1.bias.as_ref().ok_or("conv1 has no bias")?;
    println!("conv1.bias.grad before backward: {:?}", bias.grad()?);
    loss.backward()?;
    println!("conv1.bias.grad after backward: {:?}", bias.grad()?);

    optimizer.step()?;
    let released = ctx.borrow_mut().release_intermediates();
    println!("updated parameters, released {} intermediate nodes", released);
    Ok(())
}

fn train(
    ctx: &Rc<RefCell<GraphContext>>,
    net: &Net,
    config: &TrainConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n--- [6] Training ---");
    let input = Tensor::randn(ctx, &[1, 1, 32, 32]);
    let target = Tensor::randn(ctx, &[1, 10]);
    let mut optimizer = Sgd::new(net.parameters(), config.learning_rate);

    let history = fit(net, &mut optimizer, &input, &target, config)?;
    if let (Some(first), Some(last)) = (history.first(), history.last()) {
        println!("loss {:.6} -> {:.6} over {} steps", first, last, history.len());
    }
    Ok(())
}
