//! Selection and execution of the training topology.

mod barrier;
mod distributed;
mod p2p;

use std::{fmt, net::SocketAddr};

use comms::transport::TransportKind;
use log::info;
use machine_learning::{MlErr, NoHooks, SolveOutcome, Solver, SolverConfig};

pub use barrier::{Aborted, GroupBarrier};
pub use distributed::{DistributedSync, run_distributed};
pub use p2p::PeerToPeerSync;

use crate::{OrchestratorError, Result};

/// Identity of this process within a distributed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedOptions {
    pub rank: usize,
    pub world_size: usize,
    pub listen_address: SocketAddr,
}

impl Default for DistributedOptions {
    fn default() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 7070)),
        }
    }
}

/// The topology one training run executes under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStrategy {
    /// The solver's own loop on a single device or the host.
    Local,
    /// One replica per device, gradients averaged every iteration.
    PeerToPeer(Vec<u32>),
    /// One replica per rank, gradients averaged by the root over a transport.
    Distributed {
        kind: TransportKind,
        comm_threads: usize,
    },
}

impl SyncStrategy {
    /// Picks the strategy for a run.
    ///
    /// A transport takes precedence over devices, then more than one device
    /// selects peer to peer, anything else runs locally.
    ///
    /// # Arguments
    /// * `param_server` - The requested transport name, empty for none.
    /// * `devices` - The resolved devices.
    /// * `comm_threads` - The amount of threads driving the transport.
    ///
    /// # Returns
    /// An `UnsupportedTransport` error if `param_server` names no known backend.
    pub fn select(param_server: &str, devices: &[u32], comm_threads: usize) -> Result<Self> {
        if !param_server.is_empty() {
            let kind = param_server.parse::<TransportKind>()?;
            return Ok(Self::Distributed {
                kind,
                comm_threads: comm_threads.max(1),
            });
        }

        match devices {
            [_, _, ..] => Ok(Self::PeerToPeer(devices.to_vec())),
            _ => Ok(Self::Local),
        }
    }

    /// Adjusts the solver definition to the data shard this process trains.
    pub fn prepare(&self, config: &mut SolverConfig, options: &DistributedOptions) {
        if let Self::Distributed { kind, .. } = self {
            config.solver_count = Some(config.solver_count() * options.world_size);
            config.solver_rank = match kind {
                TransportKind::Mpi => options.rank,
                TransportKind::Mlsl => 0,
            };
        }
    }

    /// Runs `solver` to completion under this strategy.
    pub fn run(&self, solver: &mut dyn Solver, options: &DistributedOptions) -> Result<SolveOutcome> {
        match self {
            Self::Local => {
                info!("starting optimization");
                Ok(solver.solve(&mut NoHooks)?)
            }
            Self::PeerToPeer(devices) => PeerToPeerSync::new(devices.clone()).run(solver),
            Self::Distributed { kind, comm_threads } => {
                info!("configuring multinode setup over {kind}");
                run_distributed(*kind, *comm_threads, solver, options)
            }
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::PeerToPeer(devices) => write!(f, "peer to peer over {} devices", devices.len()),
            Self::Distributed { kind, comm_threads } => {
                write!(f, "distributed over {kind} with {comm_threads} comm threads")
            }
        }
    }
}

/// Wraps a synchronization failure so it can leave a solver hook.
pub(crate) fn hook_err(e: impl std::error::Error + Send + Sync + 'static) -> MlErr {
    MlErr::Hook(Box::new(e))
}

/// Reduces the results of every member of a group, root first.
///
/// # Returns
/// The root's outcome if every member succeeded, otherwise the first failure
/// that didn't merely follow from another member aborting the group.
pub(crate) fn combine(results: Vec<machine_learning::Result<SolveOutcome>>) -> Result<SolveOutcome> {
    let is_abort = |e: &MlErr| matches!(e, MlErr::Hook(e) if e.is::<Aborted>());

    let mut outcome = None;
    let mut abort = None;
    for result in results {
        match result {
            Ok(o) => {
                outcome.get_or_insert(o);
            }
            Err(e) if is_abort(&e) => abort = Some(e),
            Err(e) => return Err(e.into()),
        }
    }

    match (abort, outcome) {
        (Some(e), _) => Err(OrchestratorError::Sync(e.to_string())),
        (None, Some(outcome)) => Ok(outcome),
        (None, None) => Err(OrchestratorError::Sync("empty group".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_device_or_none_runs_locally() {
        assert_eq!(SyncStrategy::select("", &[], 1).unwrap(), SyncStrategy::Local);
        assert_eq!(SyncStrategy::select("", &[3], 1).unwrap(), SyncStrategy::Local);
    }

    #[test]
    fn several_devices_run_peer_to_peer() {
        assert_eq!(
            SyncStrategy::select("", &[0, 2], 1).unwrap(),
            SyncStrategy::PeerToPeer(vec![0, 2])
        );
    }

    #[test]
    fn transport_takes_precedence_over_devices() {
        for devices in [&[][..], &[0], &[0, 1, 2]] {
            let strategy = SyncStrategy::select("mlsl", devices, 4).unwrap();
            assert_eq!(
                strategy,
                SyncStrategy::Distributed {
                    kind: TransportKind::Mlsl,
                    comm_threads: 4
                }
            );
        }
    }

    #[test]
    fn unknown_transport_exits_with_one() {
        let err = SyncStrategy::select("nccl", &[0, 1], 1).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnsupportedTransport(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn real_failure_wins_over_aborts() {
        let results = vec![
            Err(hook_err(Aborted)),
            Err(MlErr::InvalidConfig("boom".into())),
            Ok(SolveOutcome::Completed),
        ];

        let err = combine(results).unwrap_err();
        assert!(err.to_string().contains("boom"), "{err}");
    }
}
