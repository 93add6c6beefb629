//! Rank-to-block partitioning.
//!
//! Global process ranks split into disjoint blocks of fixed size, each
//! block one independent master/worker tree. Rank 0 stays outside every
//! block: it is reserved for the external coordinator that spawns and
//! evaluates blocks as independent trials.

use comms::Rank;

use crate::{OrchestraErr, Result};

pub type BlockId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Rank 0, outside every block; supervises trials, external to this
    /// crate.
    Coordinator,
    /// The first rank of a block, root of its tree.
    Master,
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// `None` only for the coordinator.
    pub block: Option<BlockId>,
    pub role: Role,
}

/// The static partition of `world_size` ranks into blocks of `block_size`.
#[derive(Debug, Clone, Copy)]
pub struct Topology {
    world_size: usize,
    block_size: usize,
}

impl Topology {
    /// # Errors
    /// `InvalidConfig` when a block cannot hold a master plus at least one
    /// worker, or the non-coordinator ranks do not fill whole blocks.
    pub fn new(world_size: usize, block_size: usize) -> Result<Self> {
        if block_size < 2 {
            return Err(OrchestraErr::InvalidConfig {
                what: "block size must fit a master and at least one worker",
            });
        }
        if world_size < 1 + block_size || (world_size - 1) % block_size != 0 {
            return Err(OrchestraErr::InvalidConfig {
                what: "world size must be 1 coordinator plus whole blocks",
            });
        }
        Ok(Self {
            world_size,
            block_size,
        })
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_blocks(&self) -> usize {
        (self.world_size - 1) / self.block_size
    }

    /// The block a rank belongs to; `None` for the coordinator.
    pub fn block_id(&self, rank: Rank) -> Option<BlockId> {
        (rank != 0).then(|| (rank - 1) / self.block_size)
    }

    pub fn assign(&self, rank: Rank) -> Assignment {
        match self.block_id(rank) {
            None => Assignment {
                block: None,
                role: Role::Coordinator,
            },
            Some(block) => {
                let role = if rank == self.master_of(block) {
                    Role::Master
                } else {
                    Role::Worker
                };
                Assignment {
                    block: Some(block),
                    role,
                }
            }
        }
    }

    /// The global ranks of one block, master first.
    pub fn block_members(&self, block: BlockId) -> impl Iterator<Item = Rank> + use<> {
        let first = 1 + block * self.block_size;
        first..first + self.block_size
    }

    pub fn master_of(&self, block: BlockId) -> Rank {
        1 + block * self.block_size
    }

    pub fn workers_of(&self, block: BlockId) -> impl Iterator<Item = Rank> + use<> {
        self.block_members(block).skip(1)
    }
}
