//! The data-source collaborator: finite, restartable batch sequences.

use ndarray::{Array2, s};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{MlErr, Result};

/// One batch of training or validation samples, row-major: one sample per
/// row of `inputs` and `targets`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Array2<f32>,
    pub targets: Array2<f32>,
}

/// A lazy, finite, restartable sequence of batches. One epoch is a
/// `restart` followed by draining `next_batch`.
pub trait DataSource: Send {
    /// Rewinds to the first batch.
    fn restart(&mut self);

    /// The next batch of the current pass, or `None` when exhausted.
    fn next_batch(&mut self) -> Option<Batch>;
}

/// A dataset held fully in memory and served in fixed-size row chunks; the
/// final chunk of a pass may be smaller.
pub struct InMemoryData {
    inputs: Array2<f32>,
    targets: Array2<f32>,
    batch_size: usize,
    cursor: usize,
}

impl InMemoryData {
    /// # Errors
    /// `MlErr::EmptyDataset` when there are no rows or `batch_size` is zero,
    /// `MlErr::ShapeMismatch` when inputs and targets disagree on the row
    /// count.
    pub fn new(inputs: Array2<f32>, targets: Array2<f32>, batch_size: usize) -> Result<Self> {
        if inputs.nrows() == 0 || batch_size == 0 {
            return Err(MlErr::EmptyDataset);
        }
        if inputs.nrows() != targets.nrows() {
            return Err(MlErr::ShapeMismatch {
                what: "dataset targets",
                got: targets.shape().to_vec(),
                expected: vec![inputs.nrows(), targets.ncols()],
            });
        }
        Ok(Self {
            inputs,
            targets,
            batch_size,
            cursor: 0,
        })
    }

    /// A noisy linear-regression problem with a fixed hidden coefficient
    /// vector, deterministic per seed. Single target column.
    pub fn linear_synthetic(samples: usize, features: usize, batch_size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let coeffs: Vec<f32> = (0..features).map(|_| rng.random_range(-1.0..1.0)).collect();

        let inputs = Array2::from_shape_fn((samples, features), |_| rng.random_range(-1.0..1.0));
        let targets = Array2::from_shape_fn((samples, 1), |(row, _)| {
            let clean: f32 = inputs
                .row(row)
                .iter()
                .zip(&coeffs)
                .map(|(x, c)| x * c)
                .sum();
            clean + rng.random_range(-0.01..0.01)
        });

        Self {
            inputs,
            targets,
            batch_size: batch_size.max(1),
            cursor: 0,
        }
    }
}

impl DataSource for InMemoryData {
    fn restart(&mut self) {
        self.cursor = 0;
    }

    fn next_batch(&mut self) -> Option<Batch> {
        let total = self.inputs.nrows();
        if self.cursor >= total {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(total);
        let batch = Batch {
            inputs: self.inputs.slice(s![self.cursor..end, ..]).to_owned(),
            targets: self.targets.slice(s![self.cursor..end, ..]).to_owned(),
        };
        self.cursor = end;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_cover_every_row_once() {
        let mut data = InMemoryData::linear_synthetic(10, 2, 4, 0);

        let mut rows = 0;
        let mut sizes = Vec::new();
        while let Some(batch) = data.next_batch() {
            rows += batch.inputs.nrows();
            sizes.push(batch.inputs.nrows());
        }
        assert_eq!(rows, 10);
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(data.next_batch().is_none());
    }

    #[test]
    fn restart_rewinds_the_pass() {
        let mut data = InMemoryData::linear_synthetic(6, 2, 3, 1);
        let first = data.next_batch().unwrap();
        data.next_batch().unwrap();
        assert!(data.next_batch().is_none());

        data.restart();
        let again = data.next_batch().unwrap();
        assert_eq!(again.inputs, first.inputs);
    }

    #[test]
    fn invalid_construction_is_rejected() {
        let inputs = Array2::zeros((4, 2));
        let targets = Array2::zeros((3, 1));
        assert!(matches!(
            InMemoryData::new(inputs, targets, 2),
            Err(MlErr::ShapeMismatch { .. })
        ));

        let inputs = Array2::zeros((0, 2));
        let targets = Array2::zeros((0, 1));
        assert!(matches!(
            InMemoryData::new(inputs, targets, 2),
            Err(MlErr::EmptyDataset)
        ));
    }
}
