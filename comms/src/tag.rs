//! The closed message-type dictionary shared by both ends of every channel.

use std::fmt;

/// Message type accompanying every frame.
///
/// Both peers of a channel agree on the tag of the next expected frame; a
/// frame arriving with a different tag is a protocol violation, not a
/// routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Signal from a master telling a child to begin training.
    TrainStart,
    /// A child announces it is done and will send nothing further.
    Exit,
    /// Control frame preceding a full-weights array sequence.
    BeginWeights,
    /// Control frame preceding an update array sequence.
    BeginUpdate,
    /// A logical time step value.
    TimeStep,
    /// Boolean accept/reject reply to a permission-checked update.
    AcceptDecision,
    /// Model architecture description (JSON).
    ModelArchitecture,
    /// Optimization-algorithm configuration (JSON).
    ModelAlgorithm,
    /// The per-layer weight shape vectors (JSON).
    WeightShapes,
    /// One weight array body.
    Weights,
    /// One update array body.
    Update,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::TrainStart => "train-start",
            Tag::Exit => "exit",
            Tag::BeginWeights => "begin-weights",
            Tag::BeginUpdate => "begin-update",
            Tag::TimeStep => "time-step",
            Tag::AcceptDecision => "accept-decision",
            Tag::ModelArchitecture => "model-architecture",
            Tag::ModelAlgorithm => "model-algorithm",
            Tag::WeightShapes => "weight-shapes",
            Tag::Weights => "weights",
            Tag::Update => "update",
        };
        write!(f, "{name}")
    }
}
