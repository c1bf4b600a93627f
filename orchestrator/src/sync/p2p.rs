//! Data parallel training of one replica per device inside this process.

use std::{
    io,
    sync::atomic::{AtomicU8, Ordering},
    thread,
};

use log::{debug, info};
use machine_learning::{Net, Result as MlResult, SolveOutcome, Solver, SolverAction, SolverHooks};
use parking_lot::{Mutex, RwLock};

use super::{GroupBarrier, combine, hook_err};
use crate::{OrchestratorError, Result};

/// State shared by every replica of a group.
struct Group {
    barrier: GroupBarrier,
    grads: Vec<Mutex<Vec<f32>>>,
    shared: RwLock<Vec<f32>>,
    action: AtomicU8,
}

impl Group {
    fn new(size: usize) -> Self {
        Self {
            barrier: GroupBarrier::new(size),
            grads: (0..size).map(|_| Mutex::new(Vec::new())).collect(),
            shared: RwLock::new(Vec::new()),
            action: AtomicU8::new(SolverAction::None.code()),
        }
    }

    fn wait(&self) -> MlResult<bool> {
        self.barrier.wait().map_err(hook_err)
    }

    /// Runs the solver of `rank`, aborting the group if it fails.
    fn solve(&self, rank: usize, solver: &mut dyn Solver) -> MlResult<SolveOutcome> {
        let mut hooks = ReplicaHooks { rank, group: self };
        let result = solver.solve(&mut hooks);
        if let Err(e) = &result {
            debug!(rank = rank; "replica failed: {e}");
            self.barrier.abort();
        }

        result
    }

    /// Sums every slot in rank order and averages it into `shared`.
    fn reduce(&self) {
        let mut shared = self.shared.write();
        shared.clear();

        for (rank, slot) in self.grads.iter().enumerate() {
            let grad = slot.lock();
            match rank {
                0 => shared.extend_from_slice(&grad),
                _ => shared.iter_mut().zip(grad.iter()).for_each(|(s, g)| *s += g),
            }
        }

        let n = self.grads.len() as f32;
        shared.iter_mut().for_each(|s| *s /= n);
    }
}

struct ReplicaHooks<'g> {
    rank: usize,
    group: &'g Group,
}

impl SolverHooks for ReplicaHooks<'_> {
    fn on_start(&mut self, net: &mut Net) -> MlResult<()> {
        if self.rank == 0 {
            net.flatten_data(&mut self.group.shared.write());
        }

        self.group.wait()?;
        if self.rank != 0 {
            net.load_data(&self.group.shared.read())?;
        }

        Ok(())
    }

    fn on_action(&mut self, action: SolverAction) -> MlResult<SolverAction> {
        if self.rank == 0 {
            self.group.action.store(action.code(), Ordering::Release);
        }

        self.group.wait()?;
        let code = self.group.action.load(Ordering::Acquire);
        Ok(SolverAction::from_code(code).unwrap_or_default())
    }

    fn on_gradients_ready(&mut self, net: &mut Net) -> MlResult<()> {
        net.flatten_diff(&mut self.group.grads[self.rank].lock());

        if self.group.wait()? {
            self.group.reduce();
        }

        self.group.wait()?;
        net.load_diff(&self.group.shared.read())
    }
}

/// Trains one replica per device, averaging gradients every iteration so all
/// replicas apply the same update.
pub struct PeerToPeerSync {
    devices: Vec<u32>,
}

impl PeerToPeerSync {
    /// Creates a new `PeerToPeerSync`.
    ///
    /// # Arguments
    /// * `devices` - The devices to train on, the root solver runs on the first.
    pub fn new(devices: Vec<u32>) -> Self {
        Self { devices }
    }

    /// Replicates `root` onto every other device and runs the whole group.
    pub fn run(&self, root: &mut dyn Solver) -> Result<SolveOutcome> {
        let mut replicas = self.replicate(root)?;
        self.run_group(root, &mut replicas)
    }

    /// Creates one replica of `root` per device after the first.
    pub fn replicate(&self, root: &dyn Solver) -> Result<Vec<Box<dyn Solver>>> {
        let replicas = self
            .devices
            .iter()
            .enumerate()
            .skip(1)
            .map(|(rank, &device)| root.replicate(rank, Some(device)))
            .collect::<MlResult<_>>()?;

        Ok(replicas)
    }

    /// Runs `root` on the calling thread and each replica on its own thread.
    ///
    /// # Returns
    /// The root's outcome, or the first failure of any member.
    pub fn run_group(&self, root: &mut dyn Solver, replicas: &mut [Box<dyn Solver>]) -> Result<SolveOutcome> {
        let group = Group::new(replicas.len() + 1);
        info!("starting optimization on {} devices", group.grads.len());

        let results = thread::scope(|s| {
            let mut handles = Vec::with_capacity(replicas.len());
            for (i, replica) in replicas.iter_mut().enumerate() {
                let rank = i + 1;
                let device = self.devices.get(rank).copied().unwrap_or_default();
                let group = &group;

                let spawned = thread::Builder::new()
                    .name(format!("device-{device}"))
                    .spawn_scoped(s, move || {
                        info!(device = device, rank = rank; "replica started");
                        group.solve(rank, replica.as_mut())
                    });

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        group.barrier.abort();
                        return Err(OrchestratorError::Io(e));
                    }
                }
            }

            let mut results = vec![group.solve(0, root)];
            for handle in handles {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(hook_err(io::Error::other("replica panicked"))));
                results.push(result);
            }

            Ok(results)
        })?;

        combine(results)
    }
}
