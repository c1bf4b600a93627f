use log::info;

use crate::Net;

/// Running sums of a net's outputs over several forward passes.
#[derive(Debug, Default)]
pub struct Scores {
    names: Vec<String>,
    weights: Vec<f32>,
    sums: Vec<f32>,
    loss: f32,
    passes: usize,
}

impl Scores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the current outputs of `net` to the sums.
    ///
    /// # Arguments
    /// * `net` - A net that has just run forward.
    /// * `loss` - The loss returned by that forward pass.
    pub fn accumulate(&mut self, net: &Net, loss: f32) {
        if self.passes == 0 {
            for (name, blob, weight) in net.outputs() {
                for _ in blob.data() {
                    self.names.push(name.to_string());
                    self.weights.push(weight);
                    self.sums.push(0.0);
                }
            }
        }

        let values = net.outputs().flat_map(|(_, blob, _)| blob.data().iter());
        for (sum, value) in self.sums.iter_mut().zip(values) {
            *sum += value;
        }

        self.loss += loss;
        self.passes += 1;
    }

    /// The mean loss over every accumulated pass.
    pub fn loss(&self) -> f32 {
        self.loss / self.passes.max(1) as f32
    }

    /// The mean of every output value, with its output name and loss weight.
    pub fn means(&self) -> impl Iterator<Item = (&str, f32, f32)> {
        let passes = self.passes.max(1) as f32;
        self.names
            .iter()
            .zip(&self.sums)
            .zip(&self.weights)
            .map(move |((name, sum), weight)| (name.as_str(), sum / passes, *weight))
    }

    /// Logs every mean output, prefixed by `prefix`.
    pub fn log(&self, prefix: &str) {
        for (i, (name, mean, weight)) in self.means().enumerate() {
            if weight != 0.0 {
                info!("{prefix}#{i}: {name} = {mean} (* {weight} = {} loss)", mean * weight);
            } else {
                info!("{prefix}#{i}: {name} = {mean}");
            }
        }
    }
}
