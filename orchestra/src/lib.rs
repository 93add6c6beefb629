//! Hierarchical staleness-aware synchronization of distributed training.
//!
//! A tree of single-threaded processes coordinates a shared set of weight
//! arrays purely through blocking message exchange: leaf [`Worker`]s train
//! locally and offer updates upward, internal [`Master`]s accept or reject
//! them by staleness, aggregate accepted updates, apply them and fan the
//! refreshed weights back out. A master is itself a worker toward its own
//! parent, so trees nest; [`Topology`] carves the global rank space into
//! independent such trees.

mod config;
mod error;
pub mod process;
mod master;
mod topology;
mod worker;

pub use config::RunConfig;
pub use error::{OrchestraErr, Result};
pub use master::Master;
pub use process::{Parent, Process};
pub use topology::{Assignment, BlockId, Role, Topology};
pub use worker::Worker;
