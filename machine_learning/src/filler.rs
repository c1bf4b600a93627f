use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::{Blob, MlErr, Result, config::FillerConfig};

/// Fills `blob` according to `config`.
///
/// # Arguments
/// * `config` - The filler to use.
/// * `blob` - The parameter blob to initialize.
/// * `fan_in` - The amount of inputs feeding every output of the blob.
/// * `rng` - The random number generator to sample from.
///
/// # Returns
/// An error if the filler's distribution is invalid.
pub fn fill<R: Rng>(config: &FillerConfig, blob: &mut Blob, fan_in: usize, rng: &mut R) -> Result<()> {
    match *config {
        FillerConfig::Constant { value } => blob.data_mut().fill(value),
        FillerConfig::Uniform { min, max } => {
            let dist = Uniform::new_inclusive(min, max).map_err(invalid)?;
            sample(blob, dist, rng);
        }
        FillerConfig::Gaussian { mean, std } => {
            let dist = Normal::new(mean, std).map_err(invalid)?;
            sample(blob, dist, rng);
        }
        FillerConfig::Xavier => {
            let scale = (3.0 / fan_in.max(1) as f32).sqrt();
            let dist = Uniform::new_inclusive(-scale, scale).map_err(invalid)?;
            sample(blob, dist, rng);
        }
    }

    Ok(())
}

fn sample<R: Rng, D: Distribution<f32>>(blob: &mut Blob, dist: D, rng: &mut R) {
    for x in blob.data_mut() {
        *x = dist.sample(rng);
    }
}

fn invalid(e: impl std::fmt::Display) -> MlErr {
    MlErr::InvalidConfig(format!("invalid filler: {e}"))
}
