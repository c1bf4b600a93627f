use rand::rngs::StdRng;

use super::Layer;
use crate::{Blob, Result, config::DataConfig};

/// A layer producing batches of an in-memory dataset.
///
/// Batches are taken cyclically and in order, and when sharded, the `rank`th
/// shard sees batches `rank`, `rank + count`, `rank + 2 * count`, ...
pub struct DataLayer {
    name: String,
    data: DataConfig,
    cursor: usize,
    rank: usize,
    count: usize,
}

impl DataLayer {
    /// Creates a new `DataLayer`.
    ///
    /// # Returns
    /// An error if the dataset's dimensions are inconsistent.
    pub fn new(name: String, data: DataConfig) -> Result<Self> {
        data.validate()?;

        Ok(Self {
            name,
            data,
            cursor: 0,
            rank: 0,
            count: 1,
        })
    }

    /// Writes the next batch of samples and labels, advancing the cursor.
    ///
    /// # Arguments
    /// * `samples` - A buffer of `batch_size * sample_size` values.
    /// * `labels` - A buffer of `batch_size * label_size` values.
    pub fn next_batch(&mut self, samples: &mut [f32], labels: &mut [f32]) {
        let DataConfig {
            batch_size,
            sample_size,
            label_size,
            ..
        } = self.data;

        let n = self.data.len();
        let batch = self.cursor * self.count + self.rank;
        self.cursor += 1;

        for j in 0..batch_size {
            let s = (batch * batch_size + j) % n;

            samples[j * sample_size..(j + 1) * sample_size]
                .copy_from_slice(&self.data.samples[s * sample_size..(s + 1) * sample_size]);
            labels[j * label_size..(j + 1) * label_size]
                .copy_from_slice(&self.data.labels[s * label_size..(s + 1) * label_size]);
        }
    }

    /// The sizes of one batch of samples and one batch of labels.
    pub fn batch_sizes(&self) -> (usize, usize) {
        (
            self.data.batch_size * self.data.sample_size,
            self.data.batch_size * self.data.label_size,
        )
    }
}

impl Layer for DataLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "Data"
    }

    fn arity(&self) -> (usize, usize) {
        (0, 2)
    }

    fn shard(&mut self, rank: usize, count: usize) {
        self.rank = rank;
        self.count = count.max(1);
    }

    fn setup(&mut self, _bottom: &[Blob], top: &mut [Blob], _rng: &mut StdRng) -> Result<()> {
        top[0].reshape(&[self.data.batch_size, self.data.sample_size]);
        top[1].reshape(&[self.data.batch_size, self.data.label_size]);
        Ok(())
    }

    fn forward(&mut self, _bottom: &[Blob], top: &mut [Blob]) -> Result<()> {
        let (samples, labels) = top.split_at_mut(1);
        self.next_batch(samples[0].data_mut(), labels[0].data_mut());
        Ok(())
    }

    fn backward(&mut self, _top: &[Blob], _propagate_down: &[bool], _bottom: &mut [Blob]) -> Result<()> {
        Ok(())
    }
}
