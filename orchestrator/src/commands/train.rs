use log::info;
use machine_learning::SolveOutcome;

use super::{devices, solver_config};
use crate::{
    Result,
    cli::Flags,
    lifecycle::{InitSource, SolverLifecycle},
    signal::{ActionToken, SignalBindings, SignalGuard},
    sync::SyncStrategy,
};

/// Trains or finetunes a model.
pub fn train(flags: &Flags) -> Result<()> {
    run(flags).map(|_| ())
}

/// Runs a whole training session.
///
/// # Returns
/// How the root solver's loop ended.
pub fn run(flags: &Flags) -> Result<SolveOutcome> {
    let mut config = solver_config(flags)?;
    let source = InitSource::from_flags(&flags.snapshot, &flags.weights)?;
    let bindings = SignalBindings::parse(&flags.sigint_effect, &flags.sighup_effect)?;

    let devices = devices(flags)?;
    let strategy = SyncStrategy::select(&flags.param_server, &devices, flags.comm_threads)?;
    let options = flags.distributed();
    strategy.prepare(&mut config, &options);

    let mut lifecycle = SolverLifecycle::configure(config, devices)?;
    let token = ActionToken::new();
    let _guard = SignalGuard::install(bindings, token.clone())?;
    lifecycle.initialize(&source, token.action_fn())?;

    info!("training with {strategy} synchronization");
    let outcome = lifecycle.run(&strategy, &options)?;
    info!("optimization done");
    Ok(outcome)
}
