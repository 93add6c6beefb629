//! The trainable-model collaborator.

use std::{fs::File, io::BufWriter, path::Path};

use log::debug;
use ndarray::{Array1, Array2, Axis, Ix1, Ix2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Batch, MlErr, Result, Weights};

/// Metric values produced by one training or evaluation step; the primary
/// metric (the loss) comes first.
pub type Metrics = Vec<f32>;

/// What the synchronization core needs from a model: weight access, single
/// batch steps and durable checkpointing. Everything else stays opaque.
pub trait TrainableModel: Send {
    /// Prepares the model for training. Called once before the first batch.
    fn compile(&mut self);

    /// Runs one local training step on `batch`.
    fn train_on_batch(&mut self, batch: &Batch) -> Result<Metrics>;

    /// Evaluates `batch` without changing the weights.
    fn evaluate_on_batch(&mut self, batch: &Batch) -> Result<Metrics>;

    /// A snapshot of the current weights, in layer order.
    fn weights(&self) -> Weights;

    /// Overwrites the model weights from a snapshot.
    fn set_weights(&mut self, weights: &Weights) -> Result<()>;

    /// Persists the model to durable storage.
    fn save(&self, path: &Path) -> Result<()>;

    /// Names matching the entries of [`Metrics`].
    fn metric_names(&self) -> &[&'static str];
}

/// Architecture description broadcast from the root of a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArch {
    pub inputs: usize,
    pub outputs: usize,
    pub learning_rate: f32,
}

/// A single dense layer with bias trained by plain gradient descent on the
/// mean squared error. Two weight arrays: the kernel `(outputs, inputs)`
/// and the bias `(outputs,)`.
pub struct DenseModel {
    arch: ModelArch,
    kernel: Array2<f32>,
    bias: Array1<f32>,
}

#[derive(Serialize)]
struct Checkpoint<'a> {
    arch: &'a ModelArch,
    weights: Weights,
}

impl DenseModel {
    /// Zero-initialized model matching `arch`.
    pub fn new(arch: ModelArch) -> Self {
        Self {
            kernel: Array2::zeros((arch.outputs, arch.inputs)),
            bias: Array1::zeros(arch.outputs),
            arch,
        }
    }

    /// Re-initializes the kernel with small uniform noise.
    pub fn init_random<R: Rng>(&mut self, rng: &mut R) {
        self.kernel =
            Array2::from_shape_fn(self.kernel.raw_dim(), |_| rng.random_range(-0.1..0.1));
        self.bias.fill(0.0);
    }

    pub fn arch(&self) -> &ModelArch {
        &self.arch
    }

    fn check_batch(&self, batch: &Batch) -> Result<()> {
        if batch.inputs.ncols() != self.arch.inputs {
            return Err(MlErr::ShapeMismatch {
                what: "batch inputs",
                got: batch.inputs.shape().to_vec(),
                expected: vec![batch.inputs.nrows(), self.arch.inputs],
            });
        }
        if batch.targets.ncols() != self.arch.outputs
            || batch.targets.nrows() != batch.inputs.nrows()
        {
            return Err(MlErr::ShapeMismatch {
                what: "batch targets",
                got: batch.targets.shape().to_vec(),
                expected: vec![batch.inputs.nrows(), self.arch.outputs],
            });
        }
        Ok(())
    }

    /// Residuals and mean squared error for one batch.
    fn forward(&self, batch: &Batch) -> (Array2<f32>, f32) {
        let preds = batch.inputs.dot(&self.kernel.t()) + &self.bias;
        let residual = &preds - &batch.targets;
        let loss = residual.mapv(|r| r * r).mean().unwrap_or(0.0);
        (residual, loss)
    }
}

impl TrainableModel for DenseModel {
    fn compile(&mut self) {
        debug!(
            "compiled dense model: {} -> {} (lr {})",
            self.arch.inputs, self.arch.outputs, self.arch.learning_rate
        );
    }

    fn train_on_batch(&mut self, batch: &Batch) -> Result<Metrics> {
        self.check_batch(batch)?;
        let (residual, loss) = self.forward(batch);

        let scale = 2.0 / batch.inputs.nrows().max(1) as f32;
        let grad_kernel = residual.t().dot(&batch.inputs) * scale;
        let grad_bias = residual.sum_axis(Axis(0)) * scale;

        self.kernel = &self.kernel - &(grad_kernel * self.arch.learning_rate);
        self.bias = &self.bias - &(grad_bias * self.arch.learning_rate);
        Ok(vec![loss])
    }

    fn evaluate_on_batch(&mut self, batch: &Batch) -> Result<Metrics> {
        self.check_batch(batch)?;
        let (_, loss) = self.forward(batch);
        Ok(vec![loss])
    }

    fn weights(&self) -> Weights {
        vec![
            self.kernel.clone().into_dyn(),
            self.bias.clone().into_dyn(),
        ]
    }

    fn set_weights(&mut self, weights: &Weights) -> Result<()> {
        if weights.len() != 2 {
            return Err(MlErr::LayerCountMismatch {
                got: weights.len(),
                expected: 2,
            });
        }
        let kernel = weights[0]
            .clone()
            .into_dimensionality::<Ix2>()
            .map_err(|_| MlErr::ShapeMismatch {
                what: "kernel",
                got: weights[0].shape().to_vec(),
                expected: self.kernel.shape().to_vec(),
            })?;
        let bias = weights[1]
            .clone()
            .into_dimensionality::<Ix1>()
            .map_err(|_| MlErr::ShapeMismatch {
                what: "bias",
                got: weights[1].shape().to_vec(),
                expected: self.bias.shape().to_vec(),
            })?;
        if kernel.raw_dim() != self.kernel.raw_dim() || bias.raw_dim() != self.bias.raw_dim() {
            return Err(MlErr::ShapeMismatch {
                what: "weights snapshot",
                got: weights[0].shape().to_vec(),
                expected: self.kernel.shape().to_vec(),
            });
        }
        self.kernel = kernel;
        self.bias = bias;
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<()> {
        let file = BufWriter::new(File::create(path)?);
        let checkpoint = Checkpoint {
            arch: &self.arch,
            weights: self.weights(),
        };
        serde_json::to_writer(file, &checkpoint)?;
        Ok(())
    }

    fn metric_names(&self) -> &[&'static str] {
        &["mse"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryData;
    use crate::data::DataSource;
    use ndarray::arr1;
    use rand::{SeedableRng, rngs::StdRng};

    fn arch() -> ModelArch {
        ModelArch {
            inputs: 3,
            outputs: 1,
            learning_rate: 0.05,
        }
    }

    #[test]
    fn training_reduces_the_loss() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = DenseModel::new(arch());
        model.init_random(&mut rng);

        let mut data = InMemoryData::linear_synthetic(64, 3, 16, 7);
        data.restart();
        let batch = data.next_batch().unwrap();

        let first = model.train_on_batch(&batch).unwrap()[0];
        let mut last = first;
        for _ in 0..50 {
            last = model.train_on_batch(&batch).unwrap()[0];
        }
        assert!(last < first, "loss did not decrease: {first} -> {last}");
    }

    #[test]
    fn evaluation_leaves_weights_untouched() {
        let mut model = DenseModel::new(arch());
        let mut data = InMemoryData::linear_synthetic(8, 3, 8, 1);
        data.restart();
        let batch = data.next_batch().unwrap();

        let before = model.weights();
        model.evaluate_on_batch(&batch).unwrap();
        assert_eq!(model.weights(), before);
    }

    #[test]
    fn weight_snapshots_round_trip() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut a = DenseModel::new(arch());
        a.init_random(&mut rng);
        let mut b = DenseModel::new(arch());

        b.set_weights(&a.weights()).unwrap();
        assert_eq!(b.weights(), a.weights());

        let bad = vec![arr1(&[1.0]).into_dyn()];
        assert!(matches!(
            b.set_weights(&bad),
            Err(MlErr::LayerCountMismatch { .. })
        ));
    }

    #[test]
    fn save_writes_a_readable_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let model = DenseModel::new(arch());

        model.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["arch"]["inputs"], 3);
        assert_eq!(value["weights"].as_array().unwrap().len(), 2);
    }
}
