use std::time::{Duration, Instant};

use log::info;
use machine_learning::Net;

use super::{MODEL_SEED, model_config, single_device};
use crate::{Result, cli::Flags};

/// The averaged timings of a benchmark.
#[derive(Debug, Clone, PartialEq)]
pub struct Timings {
    pub forward: Vec<Duration>,
    pub backward: Vec<Duration>,
    pub total: Duration,
}

/// Benchmarks the forward and backward step of every layer of `--model`.
pub fn time(flags: &Flags) -> Result<()> {
    single_device(flags)?;
    let model = model_config(flags)?;
    let mut net = Net::new(&model, flags.phase, MODEL_SEED)?;
    benchmark(&mut net, flags.iterations, flags.forward_only).map(|_| ())
}

/// Times `iterations` passes over `net`, layer by layer.
///
/// # Arguments
/// * `net` - The net to benchmark.
/// * `iterations` - The amount of timed passes.
/// * `forward_only` - Skips the backward steps.
///
/// # Returns
/// The average time of each layer's forward and backward step.
pub fn benchmark(net: &mut Net, iterations: usize, forward_only: bool) -> Result<Timings> {
    info!("performing forward");
    let initial_loss = net.forward()?;
    info!("initial loss: {initial_loss}");
    if !forward_only {
        info!("performing backward");
        net.backward()?;
    }

    let layers = net.num_layers();
    let mut forward = vec![Duration::ZERO; layers];
    let mut backward = vec![Duration::ZERO; layers];

    info!("*** benchmark begins ***");
    info!("testing for {iterations} iterations");
    let total = Instant::now();

    for j in 0..iterations {
        let iteration = Instant::now();

        for (i, elapsed) in forward.iter_mut().enumerate() {
            let start = Instant::now();
            net.forward_layer(i)?;
            *elapsed += start.elapsed();
        }

        if !forward_only {
            for (i, elapsed) in backward.iter_mut().enumerate().rev() {
                let start = Instant::now();
                net.backward_layer(i)?;
                *elapsed += start.elapsed();
            }
        }

        let pass = match forward_only {
            true => "forward",
            false => "forward-backward",
        };
        info!("iteration: {} {pass} time: {:?}", j + 1, iteration.elapsed());
    }

    let total = total.elapsed();
    let n = iterations.max(1) as u32;
    let forward: Vec<_> = forward.into_iter().map(|d| d / n).collect();
    let backward: Vec<_> = backward.into_iter().map(|d| d / n).collect();

    info!("average time per layer:");
    for i in 0..layers {
        info!("{:>10}\tforward: {:?}", net.layer_name(i), forward[i]);
        if !forward_only {
            info!("{:>10}\tbackward: {:?}", net.layer_name(i), backward[i]);
        }
    }

    info!("average forward pass: {:?}", forward.iter().sum::<Duration>());
    if !forward_only {
        info!("average backward pass: {:?}", backward.iter().sum::<Duration>());
        info!("average forward-backward: {:?}", total / n);
    }
    info!("total time: {total:?}");
    info!("*** benchmark ends ***");

    Ok(Timings {
        forward,
        backward,
        total,
    })
}
