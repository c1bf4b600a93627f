//! Collective communication between the ranks of a distributed training run.
//!
//! Every backend exposes the same four primitives: point-to-point `send` and
//! `recv` of flat parameter blocks, a `barrier` and a `broadcast`. Rank `0` is
//! the root of every collective.

mod fabric;
mod tcp;

use std::{
    error::Error,
    fmt::{self, Display},
    io,
    str::FromStr,
};

pub use fabric::{Fabric, FabricTransport};
pub use tcp::TcpTransport;

/// The rank that aggregates gradients and broadcasts parameters.
pub const ROOT_RANK: usize = 0;

/// The distributed backends this build knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Message passing between processes over TCP, one process per rank.
    Mpi,
    /// An in-host channel fabric, every rank runs inside this process.
    Mlsl,
}

impl TransportKind {
    /// Every backend name accepted by `FromStr`.
    pub const NAMES: [&'static str; 2] = ["mpi", "mlsl"];

    /// Returns the name used to select this backend.
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::Mpi => "mpi",
            TransportKind::Mlsl => "mlsl",
        }
    }
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a transport name doesn't match any backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedTransport(pub String);

impl Display for UnsupportedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unsupported transport \"{}\", expected one of: {}",
            self.0,
            TransportKind::NAMES.join(", ")
        )
    }
}

impl Error for UnsupportedTransport {}

impl FromStr for TransportKind {
    type Err = UnsupportedTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mpi" => Ok(TransportKind::Mpi),
            "mlsl" => Ok(TransportKind::Mlsl),
            other => Err(UnsupportedTransport(other.to_string())),
        }
    }
}

/// Collective communication primitives shared by every backend.
#[allow(unused)]
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport: Sync {
    /// The rank of this participant.
    fn rank(&self) -> usize;

    /// The amount of participants in the run.
    fn world_size(&self) -> usize;

    /// Sends a parameter block to the participant at `to`.
    ///
    /// # Arguments
    /// * `to` - The destination rank.
    /// * `block` - The numbers to send.
    ///
    /// # Returns
    /// An io error if the peer is unreachable.
    async fn send(&self, to: usize, block: &[f32]) -> io::Result<()>;

    /// Receives a parameter block from the participant at `from`.
    ///
    /// # Arguments
    /// * `from` - The source rank.
    /// * `block` - Where to write the received numbers, its length must match the sent block.
    ///
    /// # Returns
    /// An io error if the peer is unreachable or the block length doesn't match.
    async fn recv(&self, from: usize, block: &mut [f32]) -> io::Result<()>;

    /// Blocks until every participant has reached the barrier.
    async fn barrier(&self) -> io::Result<()>;

    /// Copies `block` from `root` into every other participant's `block`.
    ///
    /// # Arguments
    /// * `root` - The rank whose block is the source.
    /// * `block` - The source on `root`, the destination everywhere else.
    async fn broadcast(&self, root: usize, block: &mut [f32]) -> io::Result<()>;
}

pub(crate) fn check_len(from: usize, got: usize, expected: usize) -> io::Result<()> {
    if got != expected {
        let text = format!("block from rank {from} has {got} elements, expected {expected}");
        return Err(io::Error::new(io::ErrorKind::InvalidData, text));
    }

    Ok(())
}

pub(crate) fn no_link(rank: usize, peer: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("rank {rank} has no link to rank {peer}"),
    )
}
