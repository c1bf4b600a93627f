pub mod cli;
pub mod commands;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod signal;
pub mod sync;
pub mod verify;

pub use cli::Flags;
pub use commands::Registry;
pub use error::{OrchestratorError, Result};
pub use lifecycle::{InitSource, LifecycleState, SolverLifecycle};
pub use signal::{ActionToken, SignalBindings, SignalGuard};
pub use sync::{DistributedOptions, SyncStrategy};
