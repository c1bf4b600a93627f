use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use machine_learning::Phase;

use crate::sync::DistributedOptions;

/// Trains, scores, benchmarks and verifies models.
///
/// commands:
///   train           train or finetune a model
///   test            score a model
///   data_server     serve training batches to remote clients
///   device_query    show device diagnostic information
///   time            benchmark model execution time
///   collect         collect layer data on the selected device
///   compare         collect layer data using the inputs of another device
#[derive(Parser, Debug, Clone)]
#[command(name = "orchestra", version, rename_all = "snake_case")]
pub struct Flags {
    /// The command to run.
    pub command: String,

    /// The solver definition (JSON).
    #[arg(long, default_value = "")]
    pub solver: String,

    /// The model definition (JSON).
    #[arg(long, default_value = "")]
    pub model: String,

    /// A solver snapshot to resume training from.
    #[arg(long, default_value = "")]
    pub snapshot: String,

    /// Comma separated pretrained weights files, applied in order.
    #[arg(long, default_value = "")]
    pub weights: String,

    /// Comma separated device ids, or `all`. Empty runs on the host.
    #[arg(long, default_value = "")]
    pub gpu: String,

    /// The amount of iterations of `test` and `time`.
    #[arg(long, default_value_t = 50)]
    pub iterations: usize,

    /// The net phase `time` runs in.
    #[arg(long, default_value = "TRAIN")]
    pub phase: Phase,

    /// Only time the forward pass.
    #[arg(long)]
    pub forward_only: bool,

    /// Action on SIGINT: `stop`, `snapshot` or `none`.
    #[arg(long, default_value = "stop")]
    pub sigint_effect: String,

    /// Action on SIGHUP: `stop`, `snapshot` or `none`.
    #[arg(long, default_value = "snapshot")]
    pub sighup_effect: String,

    /// The distributed transport: `mpi` or `mlsl`. Empty disables distribution.
    #[arg(long, default_value = "")]
    pub param_server: String,

    /// The root's address for `mpi` and the address `data_server` listens on.
    #[arg(long, env = "ORCHESTRA_LISTEN_ADDRESS", default_value = "127.0.0.1:7070")]
    pub listen_address: SocketAddr,

    /// Threads driving the distributed transport.
    #[arg(long, default_value_t = 1)]
    pub comm_threads: usize,

    /// This process's rank in an `mpi` run.
    #[arg(long, env = "ORCHESTRA_RANK", default_value_t = 0)]
    pub rank: usize,

    /// The amount of ranks in a distributed run.
    #[arg(long, env = "ORCHESTRA_WORLD_SIZE", default_value_t = 1)]
    pub world_size: usize,

    /// Where `collect` writes and `compare` reads the reference dumps.
    #[arg(long, default_value = "collect_out")]
    pub collect_dir: PathBuf,

    /// Where `compare` writes its dumps.
    #[arg(long, default_value = "compare_out")]
    pub compare_output_dir: PathBuf,

    /// The absolute difference `compare` tolerates per element.
    #[arg(long, default_value_t = 1e-3)]
    pub epsilon: f64,
}

impl Flags {
    pub fn distributed(&self) -> DistributedOptions {
        DistributedOptions {
            rank: self.rank,
            world_size: self.world_size,
            listen_address: self.listen_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_use_snake_case_names_and_defaults() {
        let flags = Flags::try_parse_from([
            "orchestra",
            "train",
            "--solver",
            "solver.json",
            "--sigint_effect",
            "snapshot",
            "--comm_threads",
            "4",
        ])
        .unwrap();

        assert_eq!(flags.command, "train");
        assert_eq!(flags.solver, "solver.json");
        assert_eq!(flags.sigint_effect, "snapshot");
        assert_eq!(flags.sighup_effect, "snapshot");
        assert_eq!(flags.comm_threads, 4);
        assert_eq!(flags.iterations, 50);
        assert_eq!(flags.phase, Phase::Train);
        assert_eq!(flags.collect_dir, PathBuf::from("collect_out"));
        assert_eq!(flags.epsilon, 1e-3);
    }

    #[test]
    fn phase_is_parsed_by_name() {
        let flags = Flags::try_parse_from(["orchestra", "time", "--phase", "TEST"]).unwrap();
        assert_eq!(flags.phase, Phase::Test);
    }
}
