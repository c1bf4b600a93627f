//! Solver construction, device placement and state initialization.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use log::info;
use machine_learning::{
    ActionFn, SgdSolver, SolveOutcome, Solver, SolverAction, SolverConfig, SolverMode,
};

use crate::{
    OrchestratorError, Result,
    sync::{DistributedOptions, SyncStrategy},
};

/// Where a solver's initial state comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitSource {
    /// Freshly initialized parameters.
    Fresh,
    /// The complete solver state of a snapshot.
    Resume(PathBuf),
    /// Parameters copied from pretrained weight files, applied in order.
    Finetune(Vec<PathBuf>),
}

impl InitSource {
    /// Builds the source from the `--snapshot` and `--weights` flags.
    ///
    /// # Returns
    /// An error if both flags are given.
    pub fn from_flags(snapshot: &str, weights: &str) -> Result<Self> {
        match (snapshot.is_empty(), weights.is_empty()) {
            (false, false) => Err(OrchestratorError::InvalidConfig(
                "give a snapshot to resume training or weights to finetune but not both".into(),
            )),
            (false, true) => Ok(Self::Resume(snapshot.into())),
            (true, false) => Ok(Self::Finetune(
                weights.split(',').map(str::trim).map(PathBuf::from).collect(),
            )),
            (true, true) => Ok(Self::Fresh),
        }
    }
}

/// Where a solver is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Configured,
    Initialized,
    Running,
    /// Reached `max_iter` without a requested snapshot.
    Completed,
    /// Reached `max_iter` after honouring at least one requested snapshot.
    Checkpointed,
    /// Ended early by a `Stop` action.
    Stopped,
    Failed,
}

/// Fixes the device placement of `config` from the requested devices.
///
/// When no devices are requested and the configuration asks for device
/// execution, the configuration's own device (or device `0`) is used.
///
/// # Returns
/// The devices the solver runs on, empty for host execution.
pub fn place(config: &mut SolverConfig, mut devices: Vec<u32>) -> Vec<u32> {
    if devices.is_empty() && config.solver_mode == SolverMode::Device {
        devices.push(config.device_id.unwrap_or(0));
    }

    match devices.first() {
        None => {
            info!("use host");
            config.solver_mode = SolverMode::Host;
        }
        Some(&first) => {
            let list = devices.iter().map(u32::to_string).collect::<Vec<_>>();
            info!("using devices {}", list.join(", "));
            config.solver_mode = SolverMode::Device;
            config.device_id = Some(first);
        }
    }

    if devices.len() > 1 {
        config.solver_count = Some(config.solver_count() * devices.len());
    }

    devices
}

/// Copies the parameters in every weights file into the solver's train net
/// and each of its test nets, later files overwriting earlier ones.
pub fn copy_layers(solver: &mut dyn Solver, sources: &[PathBuf]) -> Result<()> {
    for source in sources {
        info!("finetuning from {}", source.display());
        solver.net_mut().copy_trained_layers_from(source)?;
        for test_net in solver.test_nets_mut() {
            test_net.copy_trained_layers_from(source)?;
        }
    }

    Ok(())
}

/// Drives one solver from construction until its solve loop ends.
pub struct SolverLifecycle {
    solver: Box<dyn Solver>,
    devices: Vec<u32>,
    state: LifecycleState,
    checkpoints: Arc<AtomicUsize>,
}

impl SolverLifecycle {
    /// Places `config` on `devices` and constructs its solver.
    ///
    /// # Arguments
    /// * `config` - The parsed solver definition.
    /// * `devices` - The resolved `--gpu` devices.
    pub fn configure(mut config: SolverConfig, devices: Vec<u32>) -> Result<Self> {
        let devices = place(&mut config, devices);
        let solver = SgdSolver::new(config)?;
        Ok(Self::with_solver(Box::new(solver), devices))
    }

    /// Wraps an already constructed solver.
    pub fn with_solver(solver: Box<dyn Solver>, devices: Vec<u32>) -> Self {
        Self {
            solver,
            devices,
            state: LifecycleState::Configured,
            checkpoints: Arc::default(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn devices(&self) -> &[u32] {
        &self.devices
    }

    /// The amount of snapshot actions the solver has observed.
    pub fn checkpoints(&self) -> usize {
        self.checkpoints.load(Ordering::Relaxed)
    }

    pub fn solver(&self) -> &dyn Solver {
        self.solver.as_ref()
    }

    pub fn solver_mut(&mut self) -> &mut dyn Solver {
        self.solver.as_mut()
    }

    /// Wires the action function and loads the initial state.
    ///
    /// # Arguments
    /// * `source` - The snapshot or weights to start from.
    /// * `action_fn` - Polled by the solver at every iteration boundary.
    pub fn initialize(&mut self, source: &InitSource, action_fn: ActionFn) -> Result<()> {
        self.expect(LifecycleState::Configured)?;

        let checkpoints = Arc::clone(&self.checkpoints);
        self.solver.set_action_fn(Arc::new(move || {
            let action = action_fn();
            if action == SolverAction::Snapshot {
                checkpoints.fetch_add(1, Ordering::Relaxed);
            }
            action
        }));

        let result = match source {
            InitSource::Fresh => Ok(()),
            InitSource::Resume(path) => {
                info!("resuming from {}", path.display());
                self.solver.restore(path).map_err(Into::into)
            }
            InitSource::Finetune(sources) => copy_layers(self.solver.as_mut(), sources),
        };

        self.transition(result.map(|()| LifecycleState::Initialized))
    }

    /// Runs the solver under `strategy` until it completes or is stopped.
    pub fn run(&mut self, strategy: &SyncStrategy, options: &DistributedOptions) -> Result<SolveOutcome> {
        self.expect(LifecycleState::Initialized)?;
        self.state = LifecycleState::Running;

        let outcome = strategy.run(self.solver.as_mut(), options);
        self.state = match &outcome {
            Ok(SolveOutcome::Stopped) => LifecycleState::Stopped,
            Ok(SolveOutcome::Completed) if self.checkpoints() > 0 => LifecycleState::Checkpointed,
            Ok(SolveOutcome::Completed) => LifecycleState::Completed,
            Err(_) => LifecycleState::Failed,
        };

        outcome
    }

    fn expect(&self, state: LifecycleState) -> Result<()> {
        if self.state != state {
            return Err(OrchestratorError::InvalidConfig(format!(
                "solver is {:?}, expected {state:?}",
                self.state
            )));
        }

        Ok(())
    }

    fn transition(&mut self, next: Result<LifecycleState>) -> Result<()> {
        match next {
            Ok(state) => {
                self.state = state;
                Ok(())
            }
            Err(e) => {
                self.state = LifecycleState::Failed;
                Err(e)
            }
        }
    }
}
