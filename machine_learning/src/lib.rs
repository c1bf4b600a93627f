pub mod blob;
pub mod config;
pub mod error;
mod filler;
pub mod layers;
pub mod net;
pub mod score;
pub mod solver;
pub mod weights;

pub use blob::Blob;
pub use config::{LayerConfig, LayerKind, NetConfig, Phase, SolverConfig, SolverMode};
pub use error::{MlErr, Result};
pub use net::Net;
pub use score::Scores;
pub use solver::{
    ActionFn, NoHooks, SgdSolver, SolveOutcome, Solver, SolverAction, SolverHooks,
};
