use rand::rngs::StdRng;

use super::Layer;
use crate::{Blob, MlErr, Result};

/// Half the squared euclidean distance between its two bottoms, averaged over the batch.
pub struct EuclideanLoss {
    name: String,
    loss_weight: f32,
    diff: Vec<f32>,
}

impl EuclideanLoss {
    pub fn new(name: String, loss_weight: f32) -> Self {
        Self {
            name,
            loss_weight,
            diff: Vec::new(),
        }
    }
}

impl Layer for EuclideanLoss {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "EuclideanLoss"
    }

    fn arity(&self) -> (usize, usize) {
        (2, 1)
    }

    fn loss_weight(&self) -> f32 {
        self.loss_weight
    }

    fn setup(&mut self, bottom: &[Blob], top: &mut [Blob], _rng: &mut StdRng) -> Result<()> {
        if bottom[0].count() != bottom[1].count() {
            return Err(MlErr::size_mismatch(
                format!("{} bottoms", self.name),
                bottom[1].count(),
                bottom[0].count(),
            ));
        }

        self.diff = vec![0.0; bottom[0].count()];
        top[0].reshape(&[1]);
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob], top: &mut [Blob]) -> Result<()> {
        let (a, b) = (bottom[0].data(), bottom[1].data());

        let mut sum = 0.0;
        for ((d, &a), &b) in self.diff.iter_mut().zip(a).zip(b) {
            *d = a - b;
            sum += *d * *d;
        }

        top[0].data_mut()[0] = sum / bottom[0].num() as f32 / 2.0;
        Ok(())
    }

    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &mut [Blob]) -> Result<()> {
        let num = bottom[0].num() as f32;

        for (i, blob) in bottom.iter_mut().enumerate() {
            if !propagate_down[i] {
                continue;
            }

            let sign = if i == 0 { 1.0 } else { -1.0 };
            let alpha = sign * top[0].diff()[0] / num;
            for (dx, &d) in blob.diff_mut().iter_mut().zip(&self.diff) {
                *dx = alpha * d;
            }
        }

        Ok(())
    }
}
