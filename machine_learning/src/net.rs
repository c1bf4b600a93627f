use std::{collections::HashMap, mem, path::Path};

use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Blob, MlErr, Result,
    config::{NetConfig, Phase},
    layers::{self, Layer},
    weights,
};

/// A computation graph of layers connected through named blobs.
pub struct Net {
    name: String,
    phase: Phase,
    layers: Vec<Box<dyn Layer>>,
    blobs: Vec<Blob>,
    blob_names: Vec<String>,
    bottom_ids: Vec<Vec<usize>>,
    top_ids: Vec<Vec<usize>>,
    bottom_need_backward: Vec<Vec<bool>>,
    layer_need_backward: Vec<bool>,
    output_ids: Vec<usize>,
}

impl Net {
    /// Builds and sets up the net described by `config`.
    ///
    /// # Arguments
    /// * `config` - The net definition.
    /// * `phase` - Only layers belonging to this phase are built.
    /// * `seed` - The seed of the parameter fillers.
    ///
    /// # Returns
    /// An error if the definition is malformed or a layer fails to set up.
    pub fn new(config: &NetConfig, phase: Phase, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut net = Self {
            name: config.name.clone(),
            phase,
            layers: Vec::new(),
            blobs: Vec::new(),
            blob_names: Vec::new(),
            bottom_ids: Vec::new(),
            top_ids: Vec::new(),
            bottom_need_backward: Vec::new(),
            layer_need_backward: Vec::new(),
            output_ids: Vec::new(),
        };

        let mut by_name = HashMap::new();
        let mut blob_need_backward = Vec::new();
        let mut consumed = Vec::new();

        let in_phase = |phases: &[Phase]| phases.is_empty() || phases.contains(&phase);
        for layer_config in config.layers.iter().filter(|l| in_phase(&l.phases)) {
            let mut layer = layers::build(layer_config)?;

            let mut bottom_ids = Vec::with_capacity(layer_config.bottom.len());
            for blob in &layer_config.bottom {
                let &id = by_name.get(blob).ok_or_else(|| MlErr::UnknownBlob {
                    layer: layer_config.name.clone(),
                    blob: blob.clone(),
                })?;

                if bottom_ids.contains(&id) {
                    return Err(MlErr::InvalidConfig(format!(
                        "layer {} reads blob {blob} twice",
                        layer_config.name
                    )));
                }

                consumed[id] = true;
                bottom_ids.push(id);
            }

            let mut top_ids = Vec::with_capacity(layer_config.top.len());
            for blob in &layer_config.top {
                if by_name.contains_key(blob) {
                    return Err(MlErr::InvalidConfig(format!(
                        "blob {blob} is produced twice, in-place layers are not supported"
                    )));
                }

                let id = net.blobs.len();
                by_name.insert(blob.clone(), id);
                net.blobs.push(Blob::default());
                net.blob_names.push(blob.clone());
                consumed.push(false);
                top_ids.push(id);
            }

            let bottom: Vec<Blob> = bottom_ids.iter().map(|&id| net.blobs[id].clone()).collect();
            let mut top = take(&mut net.blobs, &top_ids);
            let setup = layer.setup(&bottom, &mut top, &mut rng);
            restore(&mut net.blobs, &top_ids, top);
            setup?;

            if layer.loss_weight() != 0.0 {
                net.blobs[top_ids[0]].diff_mut()[0] = layer.loss_weight();
            }

            let need: Vec<bool> = bottom_ids.iter().map(|&id| blob_need_backward[id]).collect();
            let layer_need = !layer.params().is_empty() || need.iter().any(|&n| n);
            blob_need_backward.resize(net.blobs.len(), layer_need);

            debug!(
                layer = layer_config.name.as_str(),
                kind = layer.kind(),
                need_backward = layer_need;
                "set up layer"
            );

            net.layers.push(layer);
            net.bottom_ids.push(bottom_ids);
            net.top_ids.push(top_ids);
            net.bottom_need_backward.push(need);
            net.layer_need_backward.push(layer_need);
        }

        net.output_ids = (0..net.blobs.len()).filter(|&id| !consumed[id]).collect();
        info!(
            net = net.name.as_str(),
            layers = net.layers.len(),
            params = net.param_count();
            "network initialization done"
        );

        Ok(net)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_name(&self, i: usize) -> &str {
        self.layers[i].name()
    }

    pub fn layer_kind(&self, i: usize) -> &'static str {
        self.layers[i].kind()
    }

    /// The amount of top blobs of the `i`th layer.
    pub fn num_tops(&self, i: usize) -> usize {
        self.top_ids[i].len()
    }

    pub fn num_bottoms(&self, i: usize) -> usize {
        self.bottom_ids[i].len()
    }

    /// The `j`th top blob of the `i`th layer.
    pub fn top(&self, i: usize, j: usize) -> &Blob {
        &self.blobs[self.top_ids[i][j]]
    }

    pub fn top_mut(&mut self, i: usize, j: usize) -> &mut Blob {
        &mut self.blobs[self.top_ids[i][j]]
    }

    /// The `j`th bottom blob of the `i`th layer.
    pub fn bottom(&self, i: usize, j: usize) -> &Blob {
        &self.blobs[self.bottom_ids[i][j]]
    }

    pub fn bottom_mut(&mut self, i: usize, j: usize) -> &mut Blob {
        &mut self.blobs[self.bottom_ids[i][j]]
    }

    /// Whether the gradient of each bottom of the `i`th layer is needed.
    pub fn bottom_need_backward(&self, i: usize) -> &[bool] {
        &self.bottom_need_backward[i]
    }

    /// The blobs no layer reads, with their names and loss weights.
    pub fn outputs(&self) -> impl Iterator<Item = (&str, &Blob, f32)> {
        self.output_ids.iter().map(|&id| {
            let weight = self
                .top_ids
                .iter()
                .position(|tops| tops.first() == Some(&id))
                .map_or(0.0, |i| self.layers[i].loss_weight());

            (self.blob_names[id].as_str(), &self.blobs[id], weight)
        })
    }

    /// Restricts every data layer to one shard of its dataset.
    pub fn shard(&mut self, rank: usize, count: usize) {
        for layer in &mut self.layers {
            layer.shard(rank, count);
        }
    }

    /// Runs the forward step of the `i`th layer.
    pub fn forward_layer(&mut self, i: usize) -> Result<()> {
        let Self {
            layers,
            blobs,
            bottom_ids,
            top_ids,
            ..
        } = self;

        let bottom = take(blobs, &bottom_ids[i]);
        let mut top = take(blobs, &top_ids[i]);
        let result = layers[i].forward(&bottom, &mut top);
        restore(blobs, &bottom_ids[i], bottom);
        restore(blobs, &top_ids[i], top);
        result
    }

    /// Runs the backward step of the `i`th layer.
    pub fn backward_layer(&mut self, i: usize) -> Result<()> {
        let Self {
            layers,
            blobs,
            bottom_ids,
            top_ids,
            bottom_need_backward,
            ..
        } = self;

        let top = take(blobs, &top_ids[i]);
        let mut bottom = take(blobs, &bottom_ids[i]);
        let result = layers[i].backward(&top, &bottom_need_backward[i], &mut bottom);
        restore(blobs, &top_ids[i], top);
        restore(blobs, &bottom_ids[i], bottom);
        result
    }

    /// Runs every layer's forward step.
    ///
    /// # Returns
    /// The weighted sum of the net's losses.
    pub fn forward(&mut self) -> Result<f32> {
        let mut loss = 0.0;

        for i in 0..self.layers.len() {
            self.forward_layer(i)?;

            let weight = self.layers[i].loss_weight();
            if weight != 0.0 {
                loss += weight * self.top(i, 0).data()[0];
            }
        }

        Ok(loss)
    }

    /// Runs the backward step of every layer that needs it, last to first.
    pub fn backward(&mut self) -> Result<()> {
        for i in (0..self.layers.len()).rev() {
            if self.layer_need_backward[i] {
                self.backward_layer(i)?;
            }
        }

        Ok(())
    }

    /// Every parameter blob, in layer order.
    pub fn params(&self) -> Vec<&Blob> {
        self.layers.iter().flat_map(|l| l.params()).collect()
    }

    pub fn params_mut(&mut self) -> Vec<&mut Blob> {
        self.layers.iter_mut().flat_map(|l| l.params_mut()).collect()
    }

    /// The total amount of parameter values.
    pub fn param_count(&self) -> usize {
        self.params().iter().map(|p| p.count()).sum()
    }

    pub fn zero_param_diffs(&mut self) {
        for param in self.params_mut() {
            param.zero_diff();
        }
    }

    /// Writes every parameter value, in order, into `buf`.
    pub fn flatten_data(&self, buf: &mut Vec<f32>) {
        buf.clear();
        for param in self.params() {
            buf.extend_from_slice(param.data());
        }
    }

    /// Writes every parameter gradient, in order, into `buf`.
    pub fn flatten_diff(&self, buf: &mut Vec<f32>) {
        buf.clear();
        for param in self.params() {
            buf.extend_from_slice(param.diff());
        }
    }

    /// Overwrites every parameter value from a buffer written by `flatten_data`.
    pub fn load_data(&mut self, buf: &[f32]) -> Result<()> {
        self.load_flat(buf, Blob::data_mut)
    }

    /// Overwrites every parameter gradient from a buffer written by `flatten_diff`.
    pub fn load_diff(&mut self, buf: &[f32]) -> Result<()> {
        self.load_flat(buf, Blob::diff_mut)
    }

    fn load_flat(&mut self, buf: &[f32], field: fn(&mut Blob) -> &mut [f32]) -> Result<()> {
        let expected = self.param_count();
        if buf.len() != expected {
            return Err(MlErr::size_mismatch("flat parameters", buf.len(), expected));
        }

        let mut rest = buf;
        for param in self.params_mut() {
            let (head, tail) = rest.split_at(param.count());
            field(param).copy_from_slice(head);
            rest = tail;
        }

        Ok(())
    }

    /// Copies the parameter values of every layer of `other` with a matching name.
    pub fn share_trained_layers_with(&mut self, other: &Net) -> Result<()> {
        for layer in &mut self.layers {
            let Some(source) = other.layers.iter().find(|l| l.name() == layer.name()) else {
                continue;
            };

            let name = layer.name().to_string();
            for (dst, src) in layer.params_mut().iter_mut().zip(source.params()) {
                if dst.shape() != src.shape() {
                    return Err(MlErr::size_mismatch(
                        format!("{name} parameters"),
                        src.count(),
                        dst.count(),
                    ));
                }

                dst.data_mut().copy_from_slice(src.data());
            }
        }

        Ok(())
    }

    /// Overwrites the parameters of every layer found in the weights file at `path`.
    pub fn copy_trained_layers_from(&mut self, path: impl AsRef<Path>) -> Result<()> {
        weights::load(self, path.as_ref())
    }

    /// Writes the parameters of every layer to a weights file at `path`.
    pub fn save_trained_layers(&self, path: impl AsRef<Path>) -> Result<()> {
        weights::save(self, path.as_ref())
    }

    pub(crate) fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Box<dyn Layer>] {
        &mut self.layers
    }
}

fn take(blobs: &mut [Blob], ids: &[usize]) -> Vec<Blob> {
    ids.iter().map(|&id| mem::take(&mut blobs[id])).collect()
}

fn restore(blobs: &mut [Blob], ids: &[usize], taken: Vec<Blob>) {
    for (&id, blob) in ids.iter().zip(taken) {
        blobs[id] = blob;
    }
}
