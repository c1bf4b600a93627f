use std::{fmt, io, path::PathBuf};

use comms::transport::UnsupportedTransport;
use machine_learning::MlErr;

/// The result type used across the orchestrator.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid or conflicting flags and definitions, caught before running.
    InvalidConfig(String),
    /// A command name that isn't registered.
    UnknownCommand {
        name: String,
        available: Vec<&'static str>,
    },
    /// A `--param_server` name that doesn't match any transport.
    UnsupportedTransport(UnsupportedTransport),
    /// An output directory couldn't be created.
    CreateDir { path: PathBuf, source: io::Error },
    /// A reference dump required to continue a compare pass is missing or short.
    MissingDump { path: PathBuf, source: io::Error },
    /// A replica or rank failed, aborting the whole synchronized group.
    Sync(String),
    /// The numeric engine failed.
    Engine(MlErr),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl OrchestratorError {
    /// The process exit code this error terminates with.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::UnsupportedTransport(_) | Self::CreateDir { .. } => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::UnknownCommand { name, available } => write!(
                f,
                "unknown command \"{name}\", available commands: {}",
                available.join(", ")
            ),
            Self::UnsupportedTransport(e) => write!(f, "{e}"),
            Self::CreateDir { path, source } => {
                write!(f, "could not create directory {}: {source}", path.display())
            }
            Self::MissingDump { path, source } => {
                write!(f, "missing reference dump {}: {source}", path.display())
            }
            Self::Sync(msg) => write!(f, "synchronization failed: {msg}"),
            Self::Engine(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UnsupportedTransport(e) => Some(e),
            Self::CreateDir { source, .. } | Self::MissingDump { source, .. } => Some(source),
            Self::Engine(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<MlErr> for OrchestratorError {
    fn from(e: MlErr) -> Self {
        Self::Engine(e)
    }
}

impl From<UnsupportedTransport> for OrchestratorError {
    fn from(e: UnsupportedTransport) -> Self {
        Self::UnsupportedTransport(e)
    }
}
