use log::info;
use machine_learning::{Net, Phase, Scores};

use super::{MODEL_SEED, model_config, single_device};
use crate::{OrchestratorError, Result, cli::Flags, lifecycle::InitSource};

/// Scores a trained model over `--iterations` batches.
pub fn test(flags: &Flags) -> Result<()> {
    score(flags).map(|_| ())
}

/// Runs the scoring loop.
///
/// # Returns
/// The accumulated scores of every batch.
pub fn score(flags: &Flags) -> Result<Scores> {
    let model = model_config(flags)?;
    let InitSource::Finetune(weights) = InitSource::from_flags("", &flags.weights)? else {
        return Err(OrchestratorError::InvalidConfig(
            "need model weights to score".into(),
        ));
    };

    single_device(flags)?;
    let mut net = Net::new(&model, Phase::Test, MODEL_SEED)?;
    for path in &weights {
        net.copy_trained_layers_from(path)?;
    }

    info!("running for {} iterations", flags.iterations);
    let mut scores = Scores::new();
    for i in 0..flags.iterations {
        let loss = net.forward()?;
        scores.accumulate(&net, loss);

        for (name, blob, _) in net.outputs() {
            for value in blob.data() {
                info!("batch {i}, {name} = {value}");
            }
        }
    }

    info!("loss: {}", scores.loss());
    scores.log("");
    Ok(scores)
}
