use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::error;

use orchestrator::{Flags, OrchestratorError, Registry};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let flags = Flags::parse();
    let registry = Registry::builtin();

    let result = registry
        .run(&flags)
        .with_context(|| format!("{} failed", flags.command));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            let code = e
                .downcast_ref::<OrchestratorError>()
                .map_or(2, OrchestratorError::exit_code);
            ExitCode::from(code)
        }
    }
}
