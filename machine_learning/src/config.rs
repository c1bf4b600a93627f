use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// The phase a net is built for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    #[default]
    Train,
    Test,
}

impl std::str::FromStr for Phase {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TRAIN" => Ok(Self::Train),
            "TEST" => Ok(Self::Test),
            other => Err(MlErr::InvalidConfig(format!(
                "phase must be TRAIN or TEST, got {other:?}"
            ))),
        }
    }
}

/// Where the solver keeps its parameters while running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverMode {
    #[default]
    Host,
    Device,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    #[default]
    Sgd,
    Nesterov,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LrPolicy {
    #[default]
    Fixed,
    Step { gamma: f32, stepsize: usize },
}

impl LrPolicy {
    /// The learning rate at iteration `iter` given the base rate.
    pub fn rate(&self, base_lr: f32, iter: usize) -> f32 {
        match *self {
            LrPolicy::Fixed => base_lr,
            LrPolicy::Step { gamma, stepsize } => {
                let steps = iter.checked_div(stepsize).unwrap_or(0);
                base_lr * gamma.powi(steps as i32)
            }
        }
    }
}

/// How to initialize a parameter blob.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FillerConfig {
    Constant { value: f32 },
    Uniform { min: f32, max: f32 },
    Gaussian { mean: f32, std: f32 },
    Xavier,
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self::Constant { value: 0.0 }
    }
}

/// The in-memory dataset a data layer cycles over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub batch_size: usize,
    pub sample_size: usize,
    pub label_size: usize,
    pub samples: Vec<f32>,
    pub labels: Vec<f32>,
}

impl DataConfig {
    /// The amount of samples in the dataset.
    pub fn len(&self) -> usize {
        self.samples.len().checked_div(self.sample_size).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validates the dataset's dimensions.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.sample_size == 0 {
            return Err(MlErr::InvalidConfig(
                "data batch_size and sample_size must be positive".into(),
            ));
        }

        let n = self.len();
        if n == 0 || self.samples.len() != n * self.sample_size {
            return Err(MlErr::size_mismatch(
                "data samples",
                self.samples.len(),
                n.max(1) * self.sample_size,
            ));
        }

        if self.labels.len() != n * self.label_size {
            return Err(MlErr::size_mismatch(
                "data labels",
                self.labels.len(),
                n * self.label_size,
            ));
        }

        Ok(())
    }
}

fn one() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerKind {
    Data(DataConfig),
    InnerProduct {
        num_output: usize,
        #[serde(default)]
        weight_filler: FillerConfig,
        #[serde(default)]
        bias_filler: FillerConfig,
    },
    ReLU,
    Sigmoid,
    EuclideanLoss {
        #[serde(default = "one")]
        loss_weight: f32,
    },
}

/// One node of a net definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    #[serde(default)]
    pub bottom: Vec<String>,
    #[serde(default)]
    pub top: Vec<String>,
    /// Phases the layer is part of, every phase when empty.
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(flatten)]
    pub kind: LayerKind,
}

/// A net definition, a list of layers connected through named blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    #[serde(default)]
    pub name: String,
    pub layers: Vec<LayerConfig>,
}

impl NetConfig {
    /// Reads a net definition from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// The first data layer's dataset, if any.
    pub fn data(&self) -> Option<&DataConfig> {
        self.layers.iter().find_map(|layer| match &layer.kind {
            LayerKind::Data(data) => Some(data),
            _ => None,
        })
    }
}

fn default_iter_size() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_seed() -> u64 {
    1701
}

/// The solver definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub net: NetConfig,
    #[serde(default)]
    pub test_nets: Vec<NetConfig>,
    #[serde(default, rename = "type")]
    pub kind: SolverKind,
    #[serde(default)]
    pub solver_mode: SolverMode,
    #[serde(default)]
    pub device_id: Option<u32>,
    #[serde(default)]
    pub solver_count: Option<usize>,
    #[serde(default)]
    pub solver_rank: usize,

    pub base_lr: f32,
    #[serde(default)]
    pub lr_policy: LrPolicy,
    #[serde(default)]
    pub momentum: f32,
    #[serde(default)]
    pub weight_decay: f32,
    pub max_iter: usize,
    #[serde(default = "default_iter_size")]
    pub iter_size: usize,

    #[serde(default)]
    pub display: usize,
    #[serde(default)]
    pub test_interval: usize,
    #[serde(default)]
    pub test_iter: usize,
    #[serde(default)]
    pub test_initialization: bool,

    #[serde(default)]
    pub snapshot: usize,
    #[serde(default)]
    pub snapshot_prefix: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub snapshot_after_train: bool,

    #[serde(default = "default_seed")]
    pub random_seed: u64,
}

impl SolverConfig {
    /// Reads a solver definition from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// The amount of solvers training together, `1` unless set.
    pub fn solver_count(&self) -> usize {
        self.solver_count.unwrap_or(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.iter_size == 0 {
            return Err(MlErr::InvalidConfig("iter_size must be positive".into()));
        }

        if !self.test_nets.is_empty() && self.test_interval > 0 && self.test_iter == 0 {
            return Err(MlErr::InvalidConfig(
                "test_iter must be set when test_interval is".into(),
            ));
        }

        Ok(())
    }
}
