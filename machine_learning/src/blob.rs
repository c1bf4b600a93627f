use crate::{MlErr, Result};

/// An n-dimensional buffer of values together with the gradient of the loss
/// with respect to those values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Blob {
    shape: Vec<usize>,
    data: Vec<f32>,
    diff: Vec<f32>,
}

impl Blob {
    /// Creates a zero filled `Blob` of the given shape.
    pub fn new(shape: Vec<usize>) -> Self {
        let count = shape.iter().product();

        Self {
            shape,
            data: vec![0.0; count],
            diff: vec![0.0; count],
        }
    }

    /// Creates a `Blob` holding `data`.
    ///
    /// # Returns
    /// An error if the amount of values doesn't match the shape.
    pub fn from_data(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let count: usize = shape.iter().product();
        if data.len() != count {
            return Err(MlErr::size_mismatch("blob data", data.len(), count));
        }

        Ok(Self {
            shape,
            diff: vec![0.0; count],
            data,
        })
    }

    /// Changes the shape of the blob, zero filling any new values.
    pub fn reshape(&mut self, shape: &[usize]) {
        let count = shape.iter().product();
        self.shape = shape.to_vec();
        self.data.resize(count, 0.0);
        self.diff.resize(count, 0.0);
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The total amount of values.
    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// The size of the leading axis, `1` for scalars.
    pub fn num(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn diff(&self) -> &[f32] {
        &self.diff
    }

    pub fn diff_mut(&mut self) -> &mut [f32] {
        &mut self.diff
    }

    /// Splits the blob into its values and its gradient.
    pub fn data_and_diff_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.data, &mut self.diff)
    }

    pub fn zero_diff(&mut self) {
        self.diff.fill(0.0);
    }
}
