//! The collect/compare harness locating the layers whose numerics diverge
//! between two execution environments.
//!
//! `collect` dumps every layer's first output and input gradient, plus every
//! parameter, from one step of a net. `compare` runs the same step elsewhere
//! but re-grounds each layer on the collected references before moving on,
//! so a divergence is attributed to the layer that introduced it.

mod compare;
pub mod dump;
mod harness;

use std::path::Path;

pub use compare::{ErrorDictionary, compare_dumps, divergence};
pub use dump::{DumpId, DumpRole, DumpSide};
pub use harness::{LayerGraph, collect, create_dir, replay};

use crate::Result;

/// Replays `graph` against the references in `reference_dir`, then compares
/// the produced target dumps with them.
///
/// # Returns
/// The layers that diverged by more than `epsilon`.
pub fn compare<G: LayerGraph + ?Sized>(
    graph: &mut G,
    reference_dir: &Path,
    out_dir: &Path,
    on_device: bool,
    epsilon: f64,
) -> Result<ErrorDictionary> {
    replay(graph, reference_dir, out_dir, on_device)?;
    compare_dumps(reference_dir, out_dir, on_device, epsilon)
}
