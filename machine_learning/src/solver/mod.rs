mod sgd;
mod snapshot;

use std::{path::Path, path::PathBuf, str::FromStr, sync::Arc};

pub use sgd::SgdSolver;

use crate::{MlErr, Net, Result, SolverConfig};

/// A request made to a running solver from outside its loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SolverAction {
    #[default]
    None = 0,
    Stop = 1,
    Snapshot = 2,
}

impl SolverAction {
    /// The action encoded as a single byte.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decodes an action written by `code`.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Stop),
            2 => Some(Self::Snapshot),
            _ => None,
        }
    }
}

impl FromStr for SolverAction {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stop" => Ok(Self::Stop),
            "snapshot" => Ok(Self::Snapshot),
            "none" => Ok(Self::None),
            other => Err(MlErr::InvalidConfig(format!(
                "invalid signal effect {other:?}, expected stop, snapshot or none"
            ))),
        }
    }
}

/// Queried by the solver once per iteration for a pending action.
pub type ActionFn = Arc<dyn Fn() -> SolverAction + Send + Sync>;

/// How a call to `Solver::solve` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveOutcome {
    /// `max_iter` was reached.
    Completed,
    /// A `Stop` action ended the loop early.
    Stopped,
}

/// Points where a solve loop hands control to whoever drives it.
pub trait SolverHooks {
    /// Called once before the first iteration.
    fn on_start(&mut self, _net: &mut Net) -> Result<()> {
        Ok(())
    }

    /// Called at every iteration boundary with the locally polled action,
    /// returns the action the solver must honour.
    fn on_action(&mut self, action: SolverAction) -> Result<SolverAction> {
        Ok(action)
    }

    /// Called once the gradients of an iteration are computed, before the update.
    fn on_gradients_ready(&mut self, _net: &mut Net) -> Result<()> {
        Ok(())
    }
}

/// Hooks for a solver running on its own.
pub struct NoHooks;

impl SolverHooks for NoHooks {}

/// An iterative optimizer over a net.
pub trait Solver: Send {
    fn config(&self) -> &SolverConfig;

    /// The amount of iterations run so far.
    fn iter(&self) -> usize;

    fn net(&self) -> &Net;

    fn net_mut(&mut self) -> &mut Net;

    fn test_nets_mut(&mut self) -> &mut [Net];

    /// Sets the function polled for actions at every iteration boundary.
    fn set_action_fn(&mut self, action_fn: ActionFn);

    /// Restores the complete solver state from a snapshot.
    fn restore(&mut self, path: &Path) -> Result<()>;

    /// Writes a snapshot of the solver state.
    ///
    /// # Returns
    /// The path of the written snapshot.
    fn snapshot(&mut self) -> Result<PathBuf>;

    /// Creates a copy of this solver, with the same parameters, training the
    /// `rank`th shard of the data on `device`.
    fn replicate(&self, rank: usize, device: Option<u32>) -> Result<Box<dyn Solver>>;

    /// Runs the optimization until `max_iter` or a `Stop` action.
    fn solve(&mut self, hooks: &mut dyn SolverHooks) -> Result<SolveOutcome>;
}
