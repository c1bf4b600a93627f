//! The commands of the `orchestra` binary, selected by name.

mod collect;
pub mod data_server;
mod device_query;
pub mod score;
pub mod time;
pub mod train;

use std::collections::BTreeMap;

use log::info;
use machine_learning::{NetConfig, SolverConfig};

pub use collect::{collect, compare};
pub use data_server::data_server;
pub use device_query::device_query;
pub use score::test;
pub use time::time;
pub use train::train;

use crate::{
    OrchestratorError, Result,
    cli::Flags,
    device::{self, HostPlatform},
};

/// The seed of nets built straight from `--model`, so repeated runs start
/// from the same parameters.
pub const MODEL_SEED: u64 = 1701;

/// A command entry point.
pub type CommandFn = fn(&Flags) -> Result<()>;

/// Maps command names to their entry points.
#[derive(Default)]
pub struct Registry {
    commands: BTreeMap<&'static str, CommandFn>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command of the binary.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("train", train);
        registry.register("test", test);
        registry.register("time", time);
        registry.register("data_server", data_server);
        registry.register("device_query", device_query);
        registry.register("collect", collect);
        registry.register("compare", compare);
        registry
    }

    pub fn register(&mut self, name: &'static str, command: CommandFn) {
        self.commands.insert(name, command);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.commands.keys().copied().collect()
    }

    /// Looks up `name`.
    ///
    /// # Returns
    /// An `UnknownCommand` error listing every registered name if there's no such command.
    pub fn get(&self, name: &str) -> Result<CommandFn> {
        self.commands
            .get(name)
            .copied()
            .ok_or_else(|| OrchestratorError::UnknownCommand {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Runs the command named by `flags.command`.
    pub fn run(&self, flags: &Flags) -> Result<()> {
        let command = self.get(&flags.command)?;
        command(flags)
    }
}

/// Reads the solver definition named by `--solver`.
fn solver_config(flags: &Flags) -> Result<SolverConfig> {
    if flags.solver.is_empty() {
        return Err(OrchestratorError::InvalidConfig(
            "need a solver definition to train".into(),
        ));
    }

    Ok(SolverConfig::from_file(&flags.solver)?)
}

/// Reads the net definition named by `--model`.
fn model_config(flags: &Flags) -> Result<NetConfig> {
    if flags.model.is_empty() {
        return Err(OrchestratorError::InvalidConfig("need a model definition".into()));
    }

    Ok(NetConfig::from_file(&flags.model)?)
}

fn devices(flags: &Flags) -> Result<Vec<u32>> {
    device::resolve(&flags.gpu, &HostPlatform)
}

/// Resolves `--gpu` for a single device command, which runs on the first
/// requested device.
///
/// # Returns
/// Whether a device was requested.
fn single_device(flags: &Flags) -> Result<bool> {
    match devices(flags)?.first() {
        Some(id) => {
            info!("use device {id}");
            Ok(true)
        }
        None => {
            info!("use host");
            Ok(false)
        }
    }
}
