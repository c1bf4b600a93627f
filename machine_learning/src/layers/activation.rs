use rand::rngs::StdRng;

use super::Layer;
use crate::{Blob, MlErr, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    ReLU,
    Sigmoid,
}

/// An element-wise activation layer.
pub struct Activation {
    name: String,
    kind: ActivationKind,
}

impl Activation {
    pub fn new(name: String, kind: ActivationKind) -> Self {
        Self { name, kind }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl Layer for Activation {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        match self.kind {
            ActivationKind::ReLU => "ReLU",
            ActivationKind::Sigmoid => "Sigmoid",
        }
    }

    fn arity(&self) -> (usize, usize) {
        (1, 1)
    }

    fn setup(&mut self, bottom: &[Blob], top: &mut [Blob], _rng: &mut StdRng) -> Result<()> {
        top[0].reshape(bottom[0].shape());
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob], top: &mut [Blob]) -> Result<()> {
        let x = bottom[0].data();
        let y = top[0].data_mut();
        if x.len() != y.len() {
            return Err(MlErr::size_mismatch(&self.name, y.len(), x.len()));
        }

        let f: fn(f32) -> f32 = match self.kind {
            ActivationKind::ReLU => |x: f32| x.max(0.0),
            ActivationKind::Sigmoid => sigmoid,
        };

        for (y, &x) in y.iter_mut().zip(x) {
            *y = f(x);
        }

        Ok(())
    }

    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &mut [Blob]) -> Result<()> {
        if !propagate_down[0] {
            return Ok(());
        }

        let dy = top[0].diff();
        let y = top[0].data();
        let (x, dx) = bottom[0].data_and_diff_mut();

        match self.kind {
            ActivationKind::ReLU => {
                for ((dx, &x), &dy) in dx.iter_mut().zip(x.iter()).zip(dy) {
                    *dx = if x > 0.0 { dy } else { 0.0 };
                }
            }
            ActivationKind::Sigmoid => {
                for ((dx, &y), &dy) in dx.iter_mut().zip(y).zip(dy) {
                    *dx = dy * y * (1.0 - y);
                }
            }
        }

        Ok(())
    }
}
