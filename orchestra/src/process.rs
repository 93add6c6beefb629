//! Base role logic shared by workers and masters.

use comms::{Rank, Tag, Transport, codec};
use machine_learning::{
    Algo, ModelArch, Shapes, Weights,
    weights::{flat, shapes_from_weights, weights_from_shapes, zero},
};
use ndarray::ArrayD;

use crate::{OrchestraErr, Result};

/// Link to the process's parent: an endpoint inside the parent's group plus
/// the parent's rank in it.
pub struct Parent<T> {
    pub link: T,
    pub rank: Rank,
}

/// State every process of a tree carries, whichever role it plays.
///
/// A master is also a worker toward its own parent: both roles embed the
/// same `Process` and drive its parent-facing surface; a root simply never
/// invokes it.
pub struct Process<T> {
    parent: Option<Parent<T>>,
    arch: Option<ModelArch>,
    algo: Option<Algo>,
    shapes: Option<Shapes>,
    weights: Option<Weights>,
    /// Pending update buffer; zero-valued between aggregation rounds.
    update: Weights,
    time_step: u64,
}

impl<T: Transport> Process<T> {
    pub fn new(parent: Option<Parent<T>>) -> Self {
        Self {
            parent,
            arch: None,
            algo: None,
            shapes: None,
            weights: None,
            update: Vec::new(),
            time_step: 0,
        }
    }

    /// Sets any subset of architecture, algorithm and weights. Setting
    /// weights fixes the shapes and resets the pending update buffer.
    pub fn set_model_info(
        &mut self,
        arch: Option<ModelArch>,
        algo: Option<Algo>,
        weights: Option<Weights>,
    ) {
        if let Some(arch) = arch {
            self.arch = Some(arch);
        }
        if let Some(algo) = algo {
            self.algo = Some(algo);
        }
        if let Some(weights) = weights {
            let shapes = shapes_from_weights(&weights);
            self.update = weights_from_shapes(&shapes);
            self.shapes = Some(shapes);
            self.weights = Some(weights);
        }
    }

    /// Fails unless architecture, algorithm, shapes and weights are all
    /// set. Must pass before any training or coordination loop begins.
    pub fn check_sanity(&self) -> Result<()> {
        for (field, set) in [
            ("model architecture", self.arch.is_some()),
            ("optimization algorithm", self.algo.is_some()),
            ("weight shapes", self.shapes.is_some()),
            ("weights", self.weights.is_some()),
        ] {
            if !set {
                return Err(OrchestraErr::NotConfigured { field });
            }
        }
        Ok(())
    }

    pub fn time_step(&self) -> u64 {
        self.time_step
    }

    pub(crate) fn bump_time_step(&mut self) {
        self.time_step += 1;
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn weights(&self) -> Result<&Weights> {
        self.weights
            .as_ref()
            .ok_or(OrchestraErr::NotConfigured { field: "weights" })
    }

    pub fn algo(&self) -> Result<&Algo> {
        self.algo.as_ref().ok_or(OrchestraErr::NotConfigured {
            field: "optimization algorithm",
        })
    }

    pub fn arch(&self) -> Result<&ModelArch> {
        self.arch.as_ref().ok_or(OrchestraErr::NotConfigured {
            field: "model architecture",
        })
    }

    pub(crate) fn pending_update_mut(&mut self) -> &mut Weights {
        &mut self.update
    }

    /// Replaces the pending update wholesale (a worker's freshly computed
    /// delta).
    pub(crate) fn set_pending_update(&mut self, update: Weights) {
        self.update = update;
    }

    pub(crate) fn zero_pending_update(&mut self) {
        zero(&mut self.update);
    }

    /// `weights += pending update`, per the algorithm's combination rule.
    pub(crate) fn apply_pending_update(&mut self) -> Result<()> {
        let algo = self.algo.as_ref().ok_or(OrchestraErr::NotConfigured {
            field: "optimization algorithm",
        })?;
        let weights = self
            .weights
            .as_mut()
            .ok_or(OrchestraErr::NotConfigured { field: "weights" })?;
        algo.apply_update(weights, &self.update)?;
        Ok(())
    }

    /// Distributes this process's architecture, algorithm, shapes and
    /// weight values to every member of `group`, this endpoint being the
    /// root. Used by a master toward its child group.
    pub async fn broadcast_model_info<G: Transport>(&mut self, group: &mut G) -> Result<()> {
        let root = group.rank();
        let Self {
            arch,
            algo,
            shapes,
            weights,
            update,
            ..
        } = self;
        exchange_model_info(group, root, arch, algo, shapes, weights, update).await
    }

    /// Joins the model-info broadcast rooted at the parent; afterwards this
    /// process holds the root's architecture, algorithm, shapes and weight
    /// values.
    pub async fn recv_model_info_from_parent(&mut self) -> Result<()> {
        let Self {
            parent,
            arch,
            algo,
            shapes,
            weights,
            update,
            ..
        } = self;
        let parent = parent.as_mut().ok_or(OrchestraErr::MissingParent {
            tag: Tag::ModelArchitecture,
        })?;
        exchange_model_info(
            &mut parent.link,
            parent.rank,
            arch,
            algo,
            shapes,
            weights,
            update,
        )
        .await
    }

    /// Blocks until the parent signals this process to begin training.
    pub async fn await_start_from_parent(&mut self) -> Result<()> {
        let parent = self.parent.as_mut().ok_or(OrchestraErr::MissingParent {
            tag: Tag::TrainStart,
        })?;
        parent.link.recv(parent.rank, Tag::TrainStart).await?;
        Ok(())
    }

    /// Sends the pending update to the parent.
    ///
    /// With `check_permission`, the current time step goes first and the
    /// array payload is only transmitted if the parent accepts it.
    ///
    /// # Returns
    /// Whether the parent accepted the update.
    pub async fn send_update_to_parent(&mut self, check_permission: bool) -> Result<bool> {
        let Self {
            parent,
            update,
            time_step,
            ..
        } = self;
        let parent = parent
            .as_mut()
            .ok_or(OrchestraErr::MissingParent { tag: Tag::Update })?;
        send_arrays(
            &mut parent.link,
            parent.rank,
            Tag::BeginUpdate,
            Tag::Update,
            update,
            check_permission.then_some(*time_step),
        )
        .await
    }

    /// Receives a fresh time step and full weights from the parent,
    /// overwriting the local copies.
    pub async fn sync_with_parent(&mut self) -> Result<()> {
        let Self {
            parent,
            weights,
            time_step,
            ..
        } = self;
        let parent = parent
            .as_mut()
            .ok_or(OrchestraErr::MissingParent { tag: Tag::Weights })?;
        let weights = weights
            .as_mut()
            .ok_or(OrchestraErr::NotConfigured { field: "weights" })?;

        let bytes = parent.link.recv(parent.rank, Tag::TimeStep).await?;
        *time_step = codec::decode_u64(&bytes)?;
        parent.link.recv(parent.rank, Tag::BeginWeights).await?;
        recv_arrays(&mut parent.link, parent.rank, Tag::Weights, weights, false).await
    }

    /// The canonical exchange with the parent: offer the pending update,
    /// then sync time and weights whatever the decision was (a rejecting
    /// parent re-serves its current state so the child retries fresh).
    pub async fn do_send_sequence(&mut self) -> Result<bool> {
        let accepted = self.send_update_to_parent(true).await?;
        self.sync_with_parent().await?;
        Ok(accepted)
    }

    /// Tells the parent this process is done; a no-op for a root.
    pub async fn send_exit_to_parent(&mut self) -> Result<()> {
        if let Some(parent) = self.parent.as_mut() {
            parent.link.send(parent.rank, Tag::Exit, Vec::new()).await?;
        }
        Ok(())
    }
}

/// Sends a multi-array payload: one `expect` control frame, then each array
/// in order. With `permission: Some(time_step)` the receiver is first asked
/// to accept; a rejection sends no arrays.
pub(crate) async fn send_arrays<G: Transport>(
    link: &mut G,
    dest: Rank,
    expect: Tag,
    tag: Tag,
    arrays: &[ArrayD<f32>],
    permission: Option<u64>,
) -> Result<bool> {
    link.send(dest, expect, Vec::new()).await?;
    if let Some(time_step) = permission {
        link.send(dest, Tag::TimeStep, codec::encode_u64(time_step))
            .await?;
        let reply = link.recv(dest, Tag::AcceptDecision).await?;
        if !codec::decode_bool(&reply)? {
            return Ok(false);
        }
    }
    for array in arrays {
        link.send(dest, tag, codec::encode_f32s(&flat(array)))
            .await?;
    }
    Ok(true)
}

/// Receives one array per entry of `dst`, in order. `add_to_existing`
/// accumulates element-wise instead of overwriting.
pub(crate) async fn recv_arrays<G: Transport>(
    link: &mut G,
    source: Rank,
    tag: Tag,
    dst: &mut Weights,
    add_to_existing: bool,
) -> Result<()> {
    for (index, array) in dst.iter_mut().enumerate() {
        let bytes = link.recv(source, tag).await?;
        let values = codec::decode_f32s(&bytes)?;
        if values.len() != array.len() {
            return Err(OrchestraErr::ArraySize {
                index,
                got: values.len(),
                expected: array.len(),
            });
        }
        let incoming =
            ArrayD::from_shape_vec(array.raw_dim(), values).map_err(|_| OrchestraErr::ArraySize {
                index,
                got: bytes.len() / size_of::<f32>(),
                expected: array.len(),
            })?;
        if add_to_existing {
            *array += &incoming;
        } else {
            array.assign(&incoming);
        }
    }
    Ok(())
}

/// The collective model-info exchange: architecture, algorithm and shapes
/// as JSON broadcasts, then the weight values array-by-array. Non-roots
/// zero-initialize from the received shapes first; everyone leaves with
/// identical model info and a zeroed pending update buffer.
async fn exchange_model_info<G: Transport>(
    group: &mut G,
    root: Rank,
    arch: &mut Option<ModelArch>,
    algo: &mut Option<Algo>,
    shapes: &mut Option<Shapes>,
    weights: &mut Option<Weights>,
    update: &mut Weights,
) -> Result<()> {
    let is_root = group.rank() == root;

    let bytes = encode_for_root(is_root, arch, "model architecture")?;
    let bytes = comms::broadcast(group, root, Tag::ModelArchitecture, bytes).await?;
    if !is_root {
        *arch = Some(codec::decode_json(&bytes)?);
    }

    let bytes = encode_for_root(is_root, algo, "optimization algorithm")?;
    let bytes = comms::broadcast(group, root, Tag::ModelAlgorithm, bytes).await?;
    if !is_root {
        *algo = Some(codec::decode_json(&bytes)?);
    }

    let bytes = encode_for_root(is_root, shapes, "weight shapes")?;
    let bytes = comms::broadcast(group, root, Tag::WeightShapes, bytes).await?;
    if !is_root {
        *shapes = Some(codec::decode_json(&bytes)?);
    }

    let shapes = shapes
        .as_ref()
        .ok_or(OrchestraErr::NotConfigured { field: "weight shapes" })?;
    if weights.is_none() {
        *weights = Some(weights_from_shapes(shapes));
    }
    let weights = weights
        .as_mut()
        .ok_or(OrchestraErr::NotConfigured { field: "weights" })?;

    for (index, array) in weights.iter_mut().enumerate() {
        let bytes = if is_root {
            codec::encode_f32s(&flat(array))
        } else {
            Vec::new()
        };
        let bytes = comms::broadcast(group, root, Tag::Weights, bytes).await?;
        if !is_root {
            let values = codec::decode_f32s(&bytes)?;
            if values.len() != array.len() {
                return Err(OrchestraErr::ArraySize {
                    index,
                    got: values.len(),
                    expected: array.len(),
                });
            }
            let incoming = ArrayD::from_shape_vec(array.raw_dim(), values).map_err(|_| {
                OrchestraErr::ArraySize {
                    index,
                    got: 0,
                    expected: array.len(),
                }
            })?;
            array.assign(&incoming);
        }
    }

    *update = weights_from_shapes(shapes);
    Ok(())
}

fn encode_for_root<V: serde::Serialize>(
    is_root: bool,
    value: &Option<V>,
    field: &'static str,
) -> Result<Vec<u8>> {
    if !is_root {
        return Ok(Vec::new());
    }
    let value = value
        .as_ref()
        .ok_or(OrchestraErr::NotConfigured { field })?;
    Ok(codec::encode_json(value)?)
}
