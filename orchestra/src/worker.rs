//! The leaf role: local training plus the update/sync exchange.

use comms::Transport;
use log::{debug, info};
use machine_learning::{DataSource, TrainableModel};

use crate::{
    Result,
    process::{Parent, Process},
};

/// A leaf process. Trains on its own data partition and runs the
/// send-update / receive-decision / receive-weights cycle with its master.
pub struct Worker<T: Transport> {
    proc: Process<T>,
    model: Box<dyn TrainableModel>,
    data: Box<dyn DataSource>,
    epochs: usize,
}

impl<T: Transport> Worker<T> {
    /// # Arguments
    /// * `parent` - Link to the master; a worker always has one.
    /// * `model` - The trainable-model collaborator.
    /// * `data` - This worker's training data partition.
    /// * `epochs` - Local epoch budget; the worker exits once exhausted.
    pub fn new(
        parent: Parent<T>,
        model: Box<dyn TrainableModel>,
        data: Box<dyn DataSource>,
        epochs: usize,
    ) -> Self {
        Self {
            proc: Process::new(Some(parent)),
            model,
            data,
            epochs,
        }
    }

    pub fn process(&self) -> &Process<T> {
        &self.proc
    }

    /// Runs the worker lifecycle to completion.
    ///
    /// Joins the master's model-info broadcast, waits for the start signal,
    /// then for every batch of every epoch: one local training step, derive
    /// the update, offer it to the master and sync back. A rejected offer
    /// is not an error; the master re-serves fresh state and the worker
    /// moves on to the next batch. Finishes with an exit notice.
    pub async fn run(&mut self) -> Result<()> {
        self.proc.recv_model_info_from_parent().await?;
        self.model.set_weights(self.proc.weights()?)?;
        self.proc.check_sanity()?;
        self.model.compile();
        self.proc.await_start_from_parent().await?;

        for epoch in 0..self.epochs {
            info!("worker beginning epoch {epoch}");
            self.data.restart();
            while let Some(batch) = self.data.next_batch() {
                let metrics = self.model.train_on_batch(&batch)?;
                log_metrics("train", self.model.metric_names(), &metrics);

                let update = self
                    .proc
                    .algo()?
                    .compute_update(self.proc.weights()?, &self.model.weights())?;
                self.proc.set_pending_update(update);

                let accepted = self.proc.do_send_sequence().await?;
                if !accepted {
                    debug!(
                        "update rejected at step {}, retrying from fresh state",
                        self.proc.time_step()
                    );
                }
                self.model.set_weights(self.proc.weights()?)?;
            }
        }

        info!("worker finished after {} epochs, signing off", self.epochs);
        self.proc.send_exit_to_parent().await
    }
}

pub(crate) fn log_metrics(phase: &str, names: &[&'static str], metrics: &[f32]) {
    for (name, value) in names.iter().zip(metrics) {
        debug!("{phase} {name}: {value:.4}");
    }
}
