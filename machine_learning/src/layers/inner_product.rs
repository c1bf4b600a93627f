use ndarray::{linalg, prelude::*};
use rand::rngs::StdRng;

use super::Layer;
use crate::{Blob, MlErr, Result, config::FillerConfig, filler};

/// A fully connected layer, `y = x * w^T + b`.
///
/// Weights are stored as a `(num_output, fan_in)` matrix. The bottom is
/// flattened into `(batch, fan_in)`.
pub struct InnerProduct {
    name: String,
    num_output: usize,
    weight_filler: FillerConfig,
    bias_filler: FillerConfig,
    params: Vec<Blob>,
}

impl InnerProduct {
    pub fn new(
        name: String,
        num_output: usize,
        weight_filler: FillerConfig,
        bias_filler: FillerConfig,
    ) -> Self {
        Self {
            name,
            num_output,
            weight_filler,
            bias_filler,
            params: vec![Blob::default(), Blob::default()],
        }
    }

    /// The `(batch, fan_in)` dimensions of the bottom.
    fn input_dim(bottom: &Blob) -> (usize, usize) {
        let n = bottom.num();
        (n, bottom.count().checked_div(n).unwrap_or(0))
    }
}

impl Layer for InnerProduct {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "InnerProduct"
    }

    fn arity(&self) -> (usize, usize) {
        (1, 1)
    }

    fn params(&self) -> &[Blob] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [Blob] {
        &mut self.params
    }

    fn setup(&mut self, bottom: &[Blob], top: &mut [Blob], rng: &mut StdRng) -> Result<()> {
        let (n, k) = Self::input_dim(&bottom[0]);

        let mut weights = Blob::new(vec![self.num_output, k]);
        filler::fill(&self.weight_filler, &mut weights, k, rng)?;
        let mut biases = Blob::new(vec![self.num_output]);
        filler::fill(&self.bias_filler, &mut biases, k, rng)?;
        self.params = vec![weights, biases];

        top[0].reshape(&[n, self.num_output]);
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob], top: &mut [Blob]) -> Result<()> {
        let (n, k) = Self::input_dim(&bottom[0]);
        let x = ArrayView2::from_shape((n, k), bottom[0].data())?;
        let w = ArrayView2::from_shape((self.num_output, k), self.params[0].data())?;
        let b = ArrayView1::from_shape(self.num_output, self.params[1].data())?;
        let mut y = ArrayViewMut2::from_shape((n, self.num_output), top[0].data_mut())?;

        linalg::general_mat_mul(1.0, &x, &w.t(), 0.0, &mut y);
        y += &b;
        Ok(())
    }

    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &mut [Blob]) -> Result<()> {
        let (n, k) = Self::input_dim(&bottom[0]);
        let out = self.num_output;
        let dy = ArrayView2::from_shape((n, out), top[0].diff())?;

        let [weights, biases] = self.params.as_mut_slice() else {
            return Err(MlErr::InvalidConfig(format!("{} was not set up", self.name)));
        };

        let (w, dw) = weights.data_and_diff_mut();
        let w = ArrayView2::from_shape((out, k), &*w)?;
        let mut dw = ArrayViewMut2::from_shape((out, k), dw)?;
        let mut db = ArrayViewMut1::from_shape(out, biases.diff_mut())?;

        let (x, dx) = bottom[0].data_and_diff_mut();
        let x = ArrayView2::from_shape((n, k), &*x)?;

        linalg::general_mat_mul(1.0, &dy.t(), &x, 1.0, &mut dw);
        db += &dy.sum_axis(Axis(0));

        if propagate_down[0] {
            let mut dx = ArrayViewMut2::from_shape((n, k), dx)?;
            linalg::general_mat_mul(1.0, &dy, &w, 0.0, &mut dx);
        }

        Ok(())
    }
}
