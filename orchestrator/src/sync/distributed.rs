//! Data parallel training across ranks connected by a transport.
//!
//! The root broadcasts its initial parameters and every polled action. After
//! each backward pass the leaves send their gradients to the root, which sums
//! them in rank order, averages them and broadcasts the result back, so every
//! rank applies the same update.

use std::thread;

use comms::transport::{Fabric, ROOT_RANK, TcpTransport, Transport, TransportKind};
use log::{debug, info};
use machine_learning::{Net, Result as MlResult, SolveOutcome, Solver, SolverAction, SolverHooks};
use tokio::runtime::{self, Handle};

use super::{DistributedOptions, combine, hook_err};
use crate::{OrchestratorError, Result};

/// Drives one rank's solver over `transport`.
pub struct DistributedSync<T: Transport> {
    transport: T,
    handle: Handle,
    block: Vec<f32>,
    peer: Vec<f32>,
}

impl<T: Transport> DistributedSync<T> {
    /// Creates a new `DistributedSync`.
    ///
    /// # Arguments
    /// * `transport` - This rank's connected transport.
    /// * `handle` - The runtime driving the transport's futures.
    pub fn new(transport: T, handle: Handle) -> Self {
        Self {
            transport,
            handle,
            block: Vec::new(),
            peer: Vec::new(),
        }
    }

    fn is_root(&self) -> bool {
        self.transport.rank() == ROOT_RANK
    }

    /// Runs `solver` to completion in lockstep with every other rank.
    pub fn run(mut self, solver: &mut dyn Solver) -> MlResult<SolveOutcome> {
        debug!(
            rank = self.transport.rank(),
            world_size = self.transport.world_size();
            "rank solving"
        );
        solver.solve(&mut self)
    }

    fn broadcast_block(&mut self) -> MlResult<()> {
        let Self { transport, handle, block, .. } = self;
        handle.block_on(transport.broadcast(ROOT_RANK, block)).map_err(hook_err)
    }

    fn reduce_block(&mut self) -> MlResult<()> {
        let Self {
            transport,
            handle,
            block,
            peer,
        } = self;

        if transport.rank() != ROOT_RANK {
            return handle.block_on(transport.send(ROOT_RANK, block)).map_err(hook_err);
        }

        peer.resize(block.len(), 0.0);
        for from in 1..transport.world_size() {
            handle.block_on(transport.recv(from, peer)).map_err(hook_err)?;
            block.iter_mut().zip(peer.iter()).for_each(|(b, p)| *b += p);
        }

        let n = transport.world_size() as f32;
        block.iter_mut().for_each(|b| *b /= n);
        Ok(())
    }
}

impl<T: Transport> SolverHooks for DistributedSync<T> {
    fn on_start(&mut self, net: &mut Net) -> MlResult<()> {
        net.flatten_data(&mut self.block);
        self.broadcast_block()?;

        if !self.is_root() {
            net.load_data(&self.block)?;
        }

        Ok(())
    }

    fn on_action(&mut self, action: SolverAction) -> MlResult<SolverAction> {
        let mut code = [action.code() as f32];
        let Self { transport, handle, .. } = self;
        handle
            .block_on(transport.broadcast(ROOT_RANK, &mut code))
            .map_err(hook_err)?;

        Ok(SolverAction::from_code(code[0] as u8).unwrap_or_default())
    }

    fn on_gradients_ready(&mut self, net: &mut Net) -> MlResult<()> {
        net.flatten_diff(&mut self.block);
        self.reduce_block()?;
        self.broadcast_block()?;
        net.load_diff(&self.block)
    }
}

/// Runs `solver` as this process's share of a distributed run.
///
/// With `mpi` this process is the single rank `options.rank` and connects to
/// the others over TCP. With `mlsl` every rank of `options.world_size` runs
/// inside this process, `solver` being the root.
///
/// # Arguments
/// * `kind` - The transport backend.
/// * `comm_threads` - The amount of runtime threads driving the transport.
/// * `solver` - This process's root solver, already configured for its shard.
/// * `options` - Rank, world size and root address.
pub fn run_distributed(
    kind: TransportKind,
    comm_threads: usize,
    solver: &mut dyn Solver,
    options: &DistributedOptions,
) -> Result<SolveOutcome> {
    if options.world_size == 0 || options.rank >= options.world_size {
        return Err(OrchestratorError::InvalidConfig(format!(
            "rank {} is outside a world of size {}",
            options.rank, options.world_size
        )));
    }

    let runtime = runtime::Builder::new_multi_thread()
        .worker_threads(comm_threads.max(1))
        .thread_name("comm")
        .enable_all()
        .build()?;

    match kind {
        TransportKind::Mpi => {
            let transport = runtime.block_on(TcpTransport::establish(
                options.rank,
                options.world_size,
                options.listen_address,
            ))?;
            info!("rank {} of {} connected", options.rank, options.world_size);

            let sync = DistributedSync::new(transport, runtime.handle().clone());
            Ok(sync.run(solver)?)
        }
        TransportKind::Mlsl => run_fabric(solver, options.world_size, runtime.handle()),
    }
}

/// Runs every rank of an in-process fabric, `root` on the calling thread.
fn run_fabric(root: &mut dyn Solver, world_size: usize, handle: &Handle) -> Result<SolveOutcome> {
    let device = root.config().device_id;
    let mut replicas = (1..world_size)
        .map(|rank| root.replicate(rank, device))
        .collect::<MlResult<Vec<_>>>()?;

    let mut transports = Fabric::new(world_size).into_iter();
    let root_transport = transports
        .next()
        .ok_or_else(|| OrchestratorError::InvalidConfig("empty fabric".into()))?;

    let results = thread::scope(|s| {
        let mut handles = Vec::with_capacity(replicas.len());
        for (replica, transport) in replicas.iter_mut().zip(transports) {
            let sync = DistributedSync::new(transport, handle.clone());
            let name = format!("rank-{}", sync.transport.rank());
            let spawned = thread::Builder::new()
                .name(name)
                .spawn_scoped(s, move || sync.run(replica.as_mut()));

            handles.push(spawned?);
        }

        let mut results = vec![DistributedSync::new(root_transport, handle.clone()).run(root)];
        for h in handles {
            let result = h
                .join()
                .unwrap_or_else(|_| Err(hook_err(std::io::Error::other("rank panicked"))));
            results.push(result);
        }

        Ok::<_, OrchestratorError>(results)
    })?;

    combine(results)
}
