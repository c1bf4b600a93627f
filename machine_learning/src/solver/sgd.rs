use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

use log::{info, warn};
use ndarray::{ArrayViewMut1, Zip};

use super::{ActionFn, SolveOutcome, Solver, SolverAction, SolverHooks, snapshot};
use crate::{
    Blob, MlErr, Net, Result, Scores,
    config::{Phase, SolverConfig, SolverKind},
};

/// Stochastic gradient descent with momentum and weight decay.
pub struct SgdSolver {
    config: SolverConfig,
    net: Net,
    test_nets: Vec<Net>,
    history: Vec<Blob>,
    iter: usize,
    action_fn: Option<ActionFn>,
    losses: VecDeque<f32>,
}

impl SgdSolver {
    /// Creates a new `SgdSolver`, building its train net and, on the root
    /// solver, its test nets.
    ///
    /// # Returns
    /// An error if the configuration is invalid or a net fails to build.
    pub fn new(config: SolverConfig) -> Result<Self> {
        config.validate()?;

        let mut net = Net::new(&config.net, Phase::Train, config.random_seed)?;
        net.shard(config.solver_rank, config.solver_count());

        let test_nets = match config.solver_rank {
            0 => config
                .test_nets
                .iter()
                .map(|c| Net::new(c, Phase::Test, config.random_seed))
                .collect::<Result<_>>()?,
            _ => Vec::new(),
        };

        let history = net
            .params()
            .iter()
            .map(|p| Blob::new(p.shape().to_vec()))
            .collect();

        Ok(Self {
            config,
            net,
            test_nets,
            history,
            iter: 0,
            action_fn: None,
            losses: VecDeque::new(),
        })
    }

    fn is_root(&self) -> bool {
        self.config.solver_rank == 0
    }

    /// Only the root consumes pending actions, replicas follow whatever the
    /// root observed through their hooks.
    fn poll_action(&self) -> SolverAction {
        match self.is_root() {
            true => self.action_fn.as_ref().map_or(SolverAction::None, |f| f()),
            false => SolverAction::None,
        }
    }

    /// Snapshots if this is the root solver and a snapshot prefix is set.
    fn snapshot_if_root(&mut self) -> Result<()> {
        if !self.is_root() {
            return Ok(());
        }

        if self.config.snapshot_prefix.is_none() {
            warn!("snapshot requested at iteration {} but no snapshot_prefix is set", self.iter);
            return Ok(());
        }

        self.snapshot().map(|_| ())
    }

    /// Runs every test net over `test_iter` batches with the current parameters.
    pub fn test_all(&mut self) -> Result<Vec<Scores>> {
        let mut all = Vec::with_capacity(self.test_nets.len());

        for (i, test_net) in self.test_nets.iter_mut().enumerate() {
            info!("iteration {}, testing net #{i}", self.iter);
            test_net.share_trained_layers_with(&self.net)?;

            let mut scores = Scores::new();
            for _ in 0..self.config.test_iter {
                let loss = test_net.forward()?;
                scores.accumulate(test_net, loss);
            }

            scores.log("    test net output ");
            all.push(scores);
        }

        Ok(all)
    }

    fn apply_update(&mut self) {
        let rate = self.config.lr_policy.rate(self.config.base_lr, self.iter);
        let momentum = self.config.momentum;
        let decay = self.config.weight_decay;
        let scale = 1.0 / self.config.iter_size as f32;
        let nesterov = self.config.kind == SolverKind::Nesterov;

        for (param, history) in self.net.params_mut().into_iter().zip(&mut self.history) {
            let (data, diff) = param.data_and_diff_mut();

            Zip::from(ArrayViewMut1::from(data))
                .and(ArrayViewMut1::from(diff))
                .and(ArrayViewMut1::from(history.data_mut()))
                .par_for_each(|w, g, v| {
                    *g = *g * scale + decay * *w;
                    let prev = *v;
                    *v = momentum * *v + rate * *g;
                    *w -= match nesterov {
                        true => (1.0 + momentum) * *v - momentum * prev,
                        false => *v,
                    };
                });
        }
    }

    fn display(&mut self, loss: f32) {
        let window = self.config.display.max(1);
        if self.losses.len() == window {
            self.losses.pop_front();
        }
        self.losses.push_back(loss);

        if self.config.display > 0 && self.iter % self.config.display == 0 {
            let smoothed = self.losses.iter().sum::<f32>() / self.losses.len() as f32;
            let rate = self.config.lr_policy.rate(self.config.base_lr, self.iter);
            info!("iteration {}, loss = {smoothed}, lr = {rate}", self.iter);
        }
    }
}

impl Solver for SgdSolver {
    fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn iter(&self) -> usize {
        self.iter
    }

    fn net(&self) -> &Net {
        &self.net
    }

    fn net_mut(&mut self) -> &mut Net {
        &mut self.net
    }

    fn test_nets_mut(&mut self) -> &mut [Net] {
        &mut self.test_nets
    }

    fn set_action_fn(&mut self, action_fn: ActionFn) {
        self.action_fn = Some(action_fn);
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        info!("restoring previous solver status from {}", path.display());
        self.iter = snapshot::load(path, &mut self.net, &mut self.history)?;
        Ok(())
    }

    fn snapshot(&mut self) -> Result<PathBuf> {
        let prefix = self
            .config
            .snapshot_prefix
            .as_deref()
            .ok_or_else(|| MlErr::InvalidConfig("snapshot_prefix is not set".into()))?;

        let weights = snapshot::file_name(prefix, self.iter, "safetensors");
        self.net.save_trained_layers(&weights)?;

        let state = snapshot::file_name(prefix, self.iter, "solverstate");
        snapshot::save(&state, &self.net, &self.history, self.iter)?;
        info!("snapshotting solver state to {}", state.display());
        Ok(state)
    }

    fn replicate(&self, rank: usize, device: Option<u32>) -> Result<Box<dyn Solver>> {
        let mut config = self.config.clone();
        config.solver_rank = rank;
        config.device_id = device;
        config.test_nets.clear();

        let mut replica = SgdSolver::new(config)?;
        let mut params = Vec::with_capacity(self.net.param_count());
        self.net.flatten_data(&mut params);
        replica.net.load_data(&params)?;
        replica.iter = self.iter;
        for (dst, src) in replica.history.iter_mut().zip(&self.history) {
            dst.data_mut().copy_from_slice(src.data());
        }

        Ok(Box::new(replica))
    }

    fn solve(&mut self, hooks: &mut dyn SolverHooks) -> Result<SolveOutcome> {
        if self.is_root() {
            info!("solving {}", self.net.name());
        }

        hooks.on_start(&mut self.net)?;

        let outcome = loop {
            if self.iter >= self.config.max_iter {
                break SolveOutcome::Completed;
            }

            match hooks.on_action(self.poll_action())? {
                SolverAction::Stop => break SolveOutcome::Stopped,
                SolverAction::Snapshot => self.snapshot_if_root()?,
                SolverAction::None => {}
            }

            let test_interval = self.config.test_interval;
            if self.is_root()
                && test_interval > 0
                && self.iter % test_interval == 0
                && (self.iter > 0 || self.config.test_initialization)
            {
                self.test_all()?;
            }

            self.net.zero_param_diffs();
            let mut loss = 0.0;
            for _ in 0..self.config.iter_size {
                loss += self.net.forward()?;
                self.net.backward()?;
            }
            loss /= self.config.iter_size as f32;

            hooks.on_gradients_ready(&mut self.net)?;
            self.apply_update();
            self.iter += 1;

            if self.is_root() {
                self.display(loss);
            }

            let snapshot = self.config.snapshot;
            if snapshot > 0 && self.iter % snapshot == 0 {
                self.snapshot_if_root()?;
            }
        };

        let snapshot = self.config.snapshot;
        if self.config.snapshot_after_train
            && self.config.snapshot_prefix.is_some()
            && (snapshot == 0 || self.iter % snapshot != 0)
        {
            self.snapshot_if_root()?;
        }

        match outcome {
            SolveOutcome::Completed => info!("optimization done"),
            SolveOutcome::Stopped => info!("optimization stopped early at iteration {}", self.iter),
        }

        Ok(outcome)
    }
}
