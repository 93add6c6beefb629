//! Runs master/worker blocks in-process on a synthetic regression task.

use std::{env, fs, io, path::PathBuf};

use comms::local_group;
use log::info;
use machine_learning::{Algo, DenseModel, InMemoryData, ModelArch, TrainableModel, UpdateRule};
use rand::{SeedableRng, rngs::StdRng};
use tokio::{signal, task::JoinSet};

use orchestra::{BlockId, Master, Parent, Result, RunConfig, Topology, Worker};

const FEATURES: usize = 4;
const SAMPLES_PER_WORKER: usize = 256;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let cfg = match env::var("ORCHESTRA_CONFIG") {
        Ok(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        Err(_) => RunConfig::default(),
    };
    cfg.validate().map_err(io::Error::from)?;
    let topo = Topology::new(1 + cfg.num_blocks * cfg.block_size, cfg.block_size)
        .map_err(io::Error::from)?;

    tokio::select! {
        ret = run_blocks(cfg, topo) => {
            ret.map_err(io::Error::from)?;
            info!("all blocks finished, wrapping up");
        }
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");
        }
    }

    Ok(())
}

/// Runs every block of the partition side by side.
async fn run_blocks(cfg: RunConfig, topo: Topology) -> Result<()> {
    let mut blocks: JoinSet<Result<()>> = JoinSet::new();
    for block in 0..topo.num_blocks() {
        let cfg = cfg.clone();
        blocks.spawn(async move { run_block(block, topo, cfg).await });
    }
    for ret in blocks.join_all().await {
        ret?;
    }
    Ok(())
}

fn checkpoint_path(cfg: &RunConfig, topo: &Topology, block: BlockId) -> PathBuf {
    if topo.num_blocks() == 1 {
        cfg.checkpoint.clone()
    } else {
        cfg.checkpoint.with_extension(format!("block{block}.json"))
    }
}

/// Wires one block's group and drives its master and workers to completion.
async fn run_block(block: BlockId, topo: Topology, cfg: RunConfig) -> Result<()> {
    let arch = ModelArch {
        inputs: FEATURES,
        outputs: 1,
        learning_rate: cfg.learning_rate,
    };
    let algo = Algo {
        rule: UpdateRule::DeltaSum,
        apply_before_forward: true,
        validate_every: cfg.validate_every,
    };

    let mut group = local_group(cfg.block_size);
    let master_link = group.remove(0);

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    // Global ranks seed the data so each worker gets its own partition.
    for (rank, link) in topo.workers_of(block).zip(group) {
        let model = Box::new(DenseModel::new(arch.clone()));
        let data = Box::new(InMemoryData::linear_synthetic(
            SAMPLES_PER_WORKER,
            FEATURES,
            cfg.batch_size,
            rank as u64,
        ));
        let mut worker = Worker::new(Parent { link, rank: 0 }, model, data, cfg.epochs);
        tasks.spawn(async move { worker.run().await });
    }

    let mut rng = StdRng::seed_from_u64(topo.master_of(block) as u64);
    let mut root_model = DenseModel::new(arch.clone());
    root_model.init_random(&mut rng);
    let initial_weights = root_model.weights();

    let val_data = Box::new(InMemoryData::linear_synthetic(
        128,
        FEATURES,
        cfg.batch_size,
        0,
    ));
    let mut master = Master::new(
        None,
        master_link,
        Box::new(root_model),
        Some(val_data),
        cfg.num_sync_workers,
        checkpoint_path(&cfg, &topo, block),
    );
    master
        .process_mut()
        .set_model_info(Some(arch), Some(algo), Some(initial_weights));
    tasks.spawn(async move {
        master.run().await?;
        if let Some(best) = master.best_val_loss() {
            info!("block {block} best validation loss: {best:.4}");
        }
        Ok(())
    });

    for ret in tasks.join_all().await {
        ret?;
    }
    Ok(())
}
