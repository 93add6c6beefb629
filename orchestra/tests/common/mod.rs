//! Shared fixtures: a scriptable model, dummy data and the raw child-side
//! protocol moves.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use comms::{LocalLink, Rank, Tag, Transport, codec};
use machine_learning::{
    Algo, Batch, DataSource, Metrics, MlErr, ModelArch, Shapes, TrainableModel, UpdateRule,
    Weights,
    weights::{flat, weights_from_shapes},
};
use ndarray::{Array2, ArrayD};

/// A model whose "training" just adds a fixed delta to every weight and
/// whose evaluation replays a scripted loss sequence.
pub struct ScriptedModel {
    weights: Weights,
    delta: f32,
    eval_losses: Vec<f32>,
    eval_cursor: usize,
    saves: Arc<AtomicUsize>,
}

impl ScriptedModel {
    pub fn new(weights: Weights, delta: f32) -> Self {
        Self {
            weights,
            delta,
            eval_losses: vec![0.0],
            eval_cursor: 0,
            saves: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_eval_losses(mut self, losses: Vec<f32>) -> Self {
        assert!(!losses.is_empty());
        self.eval_losses = losses;
        self
    }

    pub fn save_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.saves)
    }
}

impl TrainableModel for ScriptedModel {
    fn compile(&mut self) {}

    fn train_on_batch(&mut self, _batch: &Batch) -> Result<Metrics, MlErr> {
        for array in self.weights.iter_mut() {
            *array += self.delta;
        }
        Ok(vec![0.0])
    }

    fn evaluate_on_batch(&mut self, _batch: &Batch) -> Result<Metrics, MlErr> {
        let loss = self.eval_losses[self.eval_cursor.min(self.eval_losses.len() - 1)];
        self.eval_cursor += 1;
        Ok(vec![loss])
    }

    fn weights(&self) -> Weights {
        self.weights.clone()
    }

    fn set_weights(&mut self, weights: &Weights) -> Result<(), MlErr> {
        self.weights = weights.clone();
        Ok(())
    }

    fn save(&self, _path: &Path) -> Result<(), MlErr> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn metric_names(&self) -> &[&'static str] {
        &["loss"]
    }
}

/// Serves a fixed number of placeholder batches per pass.
pub struct DummyData {
    batches: usize,
    served: usize,
}

impl DummyData {
    pub fn new(batches: usize) -> Self {
        Self { batches, served: 0 }
    }
}

impl DataSource for DummyData {
    fn restart(&mut self) {
        self.served = 0;
    }

    fn next_batch(&mut self) -> Option<Batch> {
        if self.served >= self.batches {
            return None;
        }
        self.served += 1;
        Some(Batch {
            inputs: Array2::zeros((1, 1)),
            targets: Array2::zeros((1, 1)),
        })
    }
}

pub fn single_array(values: &[f32]) -> Weights {
    vec![ArrayD::from_shape_vec(vec![values.len()], values.to_vec()).unwrap()]
}

pub fn test_arch() -> ModelArch {
    ModelArch {
        inputs: 1,
        outputs: 1,
        learning_rate: 0.1,
    }
}

pub fn test_algo(validate_every: u64) -> Algo {
    Algo {
        rule: UpdateRule::DeltaSum,
        apply_before_forward: true,
        validate_every,
    }
}

/// Child side of the master's model-info broadcast plus the start signal.
pub async fn child_setup(link: &mut LocalLink, master: Rank) -> Weights {
    link.recv(master, Tag::ModelArchitecture).await.unwrap();
    link.recv(master, Tag::ModelAlgorithm).await.unwrap();
    let bytes = link.recv(master, Tag::WeightShapes).await.unwrap();
    let shapes: Shapes = codec::decode_json(&bytes).unwrap();

    let mut weights = weights_from_shapes(&shapes);
    for array in weights.iter_mut() {
        let bytes = link.recv(master, Tag::Weights).await.unwrap();
        let values = codec::decode_f32s(&bytes).unwrap();
        *array = ArrayD::from_shape_vec(array.raw_dim(), values).unwrap();
    }

    link.recv(master, Tag::TrainStart).await.unwrap();
    weights
}

/// Offers an update computed at `time_step`; transmits the payload only on
/// acceptance and returns the master's decision.
pub async fn offer_update(
    link: &mut LocalLink,
    master: Rank,
    time_step: u64,
    update: &Weights,
) -> bool {
    link.send(master, Tag::BeginUpdate, Vec::new()).await.unwrap();
    link.send(master, Tag::TimeStep, codec::encode_u64(time_step))
        .await
        .unwrap();
    let reply = link.recv(master, Tag::AcceptDecision).await.unwrap();
    let accepted = codec::decode_bool(&reply).unwrap();
    if accepted {
        for array in update {
            link.send(master, Tag::Update, codec::encode_f32s(&flat(array)))
                .await
                .unwrap();
        }
    }
    accepted
}

/// Receives the master's time step and full weights, overwriting `weights`.
pub async fn recv_sync(link: &mut LocalLink, master: Rank, weights: &mut Weights) -> u64 {
    let bytes = link.recv(master, Tag::TimeStep).await.unwrap();
    let time_step = codec::decode_u64(&bytes).unwrap();
    link.recv(master, Tag::BeginWeights).await.unwrap();
    for array in weights.iter_mut() {
        let bytes = link.recv(master, Tag::Weights).await.unwrap();
        let values = codec::decode_f32s(&bytes).unwrap();
        *array = ArrayD::from_shape_vec(array.raw_dim(), values).unwrap();
    }
    time_step
}

pub async fn send_exit(link: &mut LocalLink, master: Rank) {
    link.send(master, Tag::Exit, Vec::new()).await.unwrap();
}
