use machine_learning::{Net, Phase};

use super::{MODEL_SEED, model_config, single_device};
use crate::{Result, cli::Flags, verify};

/// Dumps one training step of `--model` into `--collect_dir`.
pub fn collect(flags: &Flags) -> Result<()> {
    let model = model_config(flags)?;
    let on_device = single_device(flags)?;

    let mut net = Net::new(&model, Phase::Train, MODEL_SEED)?;
    verify::collect(&mut net, &flags.collect_dir, on_device)
}

/// Replays `--model` against the dumps in `--collect_dir` and logs the
/// layers diverging by more than `--epsilon`.
///
/// Divergence is reported, not failed on.
pub fn compare(flags: &Flags) -> Result<()> {
    let model = model_config(flags)?;
    let on_device = single_device(flags)?;

    let mut net = Net::new(&model, Phase::Train, MODEL_SEED)?;
    let errors = verify::compare(
        &mut net,
        &flags.collect_dir,
        &flags.compare_output_dir,
        on_device,
        flags.epsilon,
    )?;

    errors.log();
    Ok(())
}
