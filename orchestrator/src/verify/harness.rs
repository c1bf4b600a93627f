use std::{fs, path::Path};

use log::{error, info};
use machine_learning::{Blob, Net, Result as MlResult};

use super::dump::{self, DumpId, DumpRole, DumpSide, InfoEntry, info_file_name};
use crate::{OrchestratorError, Result};

/// The per-layer view of a computation graph the harness traverses.
pub trait LayerGraph {
    fn num_layers(&self) -> usize;

    fn layer_kind(&self, layer: usize) -> &str;

    fn zero_param_diffs(&mut self);

    fn forward_layer(&mut self, layer: usize) -> MlResult<()>;

    fn backward_layer(&mut self, layer: usize) -> MlResult<()>;

    /// The first output of `layer`.
    fn output_mut(&mut self, layer: usize) -> Option<&mut Blob>;

    /// The first input of `layer`, if its gradient is needed.
    fn grad_input_mut(&mut self, layer: usize) -> Option<&mut Blob>;

    /// Every parameter, in order.
    fn params(&self) -> Vec<&Blob>;
}

impl LayerGraph for Net {
    fn num_layers(&self) -> usize {
        Net::num_layers(self)
    }

    fn layer_kind(&self, layer: usize) -> &str {
        Net::layer_kind(self, layer)
    }

    fn zero_param_diffs(&mut self) {
        Net::zero_param_diffs(self);
    }

    fn forward_layer(&mut self, layer: usize) -> MlResult<()> {
        Net::forward_layer(self, layer)
    }

    fn backward_layer(&mut self, layer: usize) -> MlResult<()> {
        Net::backward_layer(self, layer)
    }

    fn output_mut(&mut self, layer: usize) -> Option<&mut Blob> {
        match self.num_tops(layer) {
            0 => None,
            _ => Some(self.top_mut(layer, 0)),
        }
    }

    fn grad_input_mut(&mut self, layer: usize) -> Option<&mut Blob> {
        match self.bottom_need_backward(layer).first() {
            Some(true) => Some(self.bottom_mut(layer, 0)),
            _ => None,
        }
    }

    fn params(&self) -> Vec<&Blob> {
        Net::params(self)
    }
}

/// Creates `dir` and its parents if missing.
pub fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| OrchestratorError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// One traversal of a graph, dumping every intermediate tensor.
struct Traversal<'a> {
    out_dir: &'a Path,
    reference_dir: Option<&'a Path>,
    side: DumpSide,
    info: Vec<InfoEntry>,
}

impl Traversal<'_> {
    fn save(&self, role: DumpRole, index: usize, data: &[f32]) {
        let id = DumpId::new(role, self.side, index);
        if let Err(e) = dump::write(self.out_dir, id, data) {
            error!("failed to write {} to {}: {e}", id.file_name(), self.out_dir.display());
        }
    }

    /// Overwrites `data` with the reference dump when replaying.
    fn reground(&self, role: DumpRole, index: usize, data: &mut [f32]) -> Result<()> {
        let Some(dir) = self.reference_dir else {
            return Ok(());
        };

        let path = DumpId::new(role, DumpSide::Reference, index).path(dir);
        dump::read_into(&path, data).map_err(|source| OrchestratorError::MissingDump { path, source })
    }

    fn run<G: LayerGraph + ?Sized>(mut self, graph: &mut G, on_device: bool) -> Result<()> {
        create_dir(self.out_dir)?;
        graph.zero_param_diffs();

        for i in 0..graph.num_layers() {
            info!("collecting forward layer [{i}]: {}", graph.layer_kind(i));
            self.info.push(InfoEntry {
                role: DumpRole::Forward,
                index: i,
                kind: graph.layer_kind(i).to_string(),
            });

            graph.forward_layer(i)?;
            if let Some(top) = graph.output_mut(i) {
                self.save(DumpRole::Forward, i, top.data());
                self.reground(DumpRole::Forward, i, top.data_mut())?;
            }
        }

        for i in (0..graph.num_layers()).rev() {
            info!("collecting backward layer [{i}]: {}", graph.layer_kind(i));
            self.info.push(InfoEntry {
                role: DumpRole::Backward,
                index: i,
                kind: graph.layer_kind(i).to_string(),
            });

            graph.backward_layer(i)?;
            if let Some(bottom) = graph.grad_input_mut(i) {
                self.save(DumpRole::Backward, i, bottom.diff());
                self.reground(DumpRole::Backward, i, bottom.diff_mut())?;
            }
        }

        info!("collecting gradients and weights");
        for (i, param) in graph.params().into_iter().enumerate() {
            self.save(DumpRole::Gradient, i, param.diff());
            self.save(DumpRole::Weight, i, param.data());
        }

        let text: String = self.info.iter().map(|entry| format!("{entry}\n")).collect();
        fs::write(self.out_dir.join(info_file_name(on_device)), text)?;
        Ok(())
    }
}

/// Runs one training step of `graph` layer by layer, dumping every layer's
/// first output and input gradient and every parameter into `out_dir`.
///
/// # Arguments
/// * `graph` - The graph to traverse, with freshly initialized parameters.
/// * `out_dir` - Where the reference dumps and the info log are written.
/// * `on_device` - Whether the pass runs on a device, picks the info log name.
pub fn collect<G: LayerGraph + ?Sized>(graph: &mut G, out_dir: &Path, on_device: bool) -> Result<()> {
    info!("*** collect procedure begins ***");
    Traversal {
        out_dir,
        reference_dir: None,
        side: DumpSide::Reference,
        info: Vec::new(),
    }
    .run(graph, on_device)?;
    info!("*** collect procedure ends ***");
    Ok(())
}

/// Runs the same traversal as `collect`, dumping target files into `out_dir`
/// and replacing every layer's output and input gradient with its reference
/// from `reference_dir` before the traversal moves on.
///
/// # Returns
/// A `MissingDump` error if a reference the next layer depends on can't be read.
pub fn replay<G: LayerGraph + ?Sized>(
    graph: &mut G,
    reference_dir: &Path,
    out_dir: &Path,
    on_device: bool,
) -> Result<()> {
    info!("*** compare procedure begins ***");
    Traversal {
        out_dir,
        reference_dir: Some(reference_dir),
        side: DumpSide::Target,
        info: Vec::new(),
    }
    .run(graph, on_device)
}
