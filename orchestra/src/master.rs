//! The internal role: acceptance, aggregation and weight fan-out.

use std::path::PathBuf;

use comms::{Rank, Tag, Transport, codec};
use log::{debug, info, warn};
use machine_learning::{DataSource, Metrics, TrainableModel};

use crate::{
    OrchestraErr, Result,
    process::{self, Parent, Process},
};

/// An internal process. Owns a child group, runs the staleness-aware
/// acceptance and aggregation state machine, and forwards its own
/// aggregated update toward its parent if it has one.
pub struct Master<T: Transport> {
    proc: Process<T>,
    children: T,
    model: Box<dyn TrainableModel>,
    val_data: Option<Box<dyn DataSource>>,
    /// Accepted updates pending before an aggregation round; shrinks when
    /// children exit so a departure cannot stall a round forever.
    num_sync_workers: usize,
    running_workers: usize,
    /// Children whose update was accepted and who now block awaiting the
    /// next weight fan-out. Membership and count matter, order does not.
    waiting_workers: Vec<Rank>,
    best_val_loss: Option<f32>,
    checkpoint: PathBuf,
}

impl<T: Transport> Master<T> {
    /// # Arguments
    /// * `parent` - Link to this master's own parent, absent for the root.
    /// * `children` - Endpoint inside the child group; every other member
    ///   is a child.
    /// * `model` - Model copy used for validation and checkpointing.
    /// * `val_data` - Held-out data; only a root master validates.
    /// * `num_sync_workers` - Accepted updates required per round; 1 means
    ///   pure asynchronous mode.
    /// * `checkpoint` - Where the best model seen is persisted.
    pub fn new(
        parent: Option<Parent<T>>,
        children: T,
        model: Box<dyn TrainableModel>,
        val_data: Option<Box<dyn DataSource>>,
        num_sync_workers: usize,
        checkpoint: PathBuf,
    ) -> Self {
        let running_workers = children.size() - 1;
        Self {
            proc: Process::new(parent),
            children,
            model,
            val_data,
            num_sync_workers,
            running_workers,
            waiting_workers: Vec::new(),
            best_val_loss: None,
            checkpoint,
        }
    }

    /// The root master's model info is set directly; everyone else receives
    /// it from a parent broadcast.
    pub fn process_mut(&mut self) -> &mut Process<T> {
        &mut self.proc
    }

    pub fn process(&self) -> &Process<T> {
        &self.proc
    }

    pub fn best_val_loss(&self) -> Option<f32> {
        self.best_val_loss
    }

    fn is_synchronous(&self) -> bool {
        self.num_sync_workers > 1
    }

    /// Runs the master lifecycle to completion: broadcast model info to the
    /// children, signal them to start, then serve messages from any child
    /// until every child has exited.
    pub async fn run(&mut self) -> Result<()> {
        if self.proc.has_parent() {
            self.proc.recv_model_info_from_parent().await?;
        }
        self.proc.check_sanity()?;
        self.proc.broadcast_model_info(&mut self.children).await?;
        self.model.compile();
        if self.proc.has_parent() {
            self.proc.await_start_from_parent().await?;
        }
        self.signal_children().await?;

        info!(
            "master serving {} workers, sync threshold {}",
            self.running_workers, self.num_sync_workers
        );
        while self.running_workers > 0 {
            let (source, tag, _payload) = self.children.recv_any().await?;
            match tag {
                Tag::BeginUpdate => self.update_sequence(source).await?,
                Tag::Exit => self.handle_exit(source).await?,
                tag => return Err(OrchestraErr::Protocol { tag }),
            }
        }

        info!("master done serving at step {}", self.proc.time_step());
        self.validate();
        self.proc.send_exit_to_parent().await
    }

    /// Tells every child to begin training.
    async fn signal_children(&mut self) -> Result<()> {
        for child in 0..self.children.size() {
            if child != self.children.rank() {
                self.children.send(child, Tag::TrainStart, Vec::new()).await?;
            }
        }
        Ok(())
    }

    /// The per-update-request procedure: measure staleness, decide, and on
    /// acceptance fold the payload into the pending update and possibly
    /// complete a round.
    async fn update_sequence(&mut self, source: Rank) -> Result<()> {
        let bytes = self.children.recv(source, Tag::TimeStep).await?;
        let child_time = codec::decode_u64(&bytes)?;
        let staleness = self.proc.time_step() as i64 - child_time as i64;
        if staleness < 0 {
            warn!("negative staleness {staleness} from worker {source}, sequencing is off");
        }

        let accepted = !self.is_synchronous() || staleness == 0;
        self.children
            .send(source, Tag::AcceptDecision, codec::encode_bool(accepted))
            .await?;

        if !accepted {
            debug!(worker = source; "rejected update with staleness {staleness}");
            self.sync_child(source).await?;
            return Ok(());
        }

        let add_to_existing = self.is_synchronous();
        process::recv_arrays(
            &mut self.children,
            source,
            Tag::Update,
            self.proc.pending_update_mut(),
            add_to_existing,
        )
        .await?;
        self.waiting_workers.push(source);

        self.maybe_complete_round().await?;

        let every = self.proc.algo()?.validate_every;
        if every > 0 && self.proc.time_step() > 0 && self.proc.time_step() % every == 0 {
            self.validate();
        }
        Ok(())
    }

    /// A departing child shrinks both the running count and the sync
    /// threshold, and may itself release a round its departure completed.
    async fn handle_exit(&mut self, source: Rank) -> Result<()> {
        self.running_workers -= 1;
        self.num_sync_workers = self.num_sync_workers.saturating_sub(1);
        debug!(
            "worker {source} exited: {} still running, sync threshold now {}",
            self.running_workers, self.num_sync_workers
        );
        if !self.waiting_workers.is_empty() {
            self.maybe_complete_round().await?;
        }
        Ok(())
    }

    /// Completes an aggregation round once enough accepted updates are
    /// pending: apply the aggregated update, propagate it to the parent and
    /// fan the refreshed weights out to every waiting child. Whether the
    /// apply happens before or after the forwarding is the algorithm's
    /// `apply_before_forward` policy.
    async fn maybe_complete_round(&mut self) -> Result<()> {
        if self.waiting_workers.len() < self.num_sync_workers {
            return Ok(());
        }
        if self.proc.algo()?.apply_before_forward {
            self.proc.apply_pending_update()?;
            self.sync_parent().await?;
            self.sync_children().await?;
        } else {
            self.sync_parent().await?;
            self.sync_children().await?;
            self.proc.apply_pending_update()?;
        }
        self.proc.zero_pending_update();
        Ok(())
    }

    /// Forwards the aggregated update up the tree, or just advances time if
    /// this master is the root.
    async fn sync_parent(&mut self) -> Result<()> {
        if self.proc.has_parent() {
            let accepted = self.proc.do_send_sequence().await?;
            if !accepted {
                debug!(
                    "parent rejected aggregated update at step {}",
                    self.proc.time_step()
                );
            }
        } else {
            self.proc.bump_time_step();
        }
        Ok(())
    }

    /// Releases every waiting child with the refreshed time step and
    /// weights.
    async fn sync_children(&mut self) -> Result<()> {
        let waiting = std::mem::take(&mut self.waiting_workers);
        for child in waiting {
            self.sync_child(child).await?;
        }
        Ok(())
    }

    async fn sync_child(&mut self, child: Rank) -> Result<()> {
        self.children
            .send(child, Tag::TimeStep, codec::encode_u64(self.proc.time_step()))
            .await?;
        process::send_arrays(
            &mut self.children,
            child,
            Tag::BeginWeights,
            Tag::Weights,
            self.proc.weights()?,
            None,
        )
        .await?;
        Ok(())
    }

    /// Held-out evaluation, root only. Averages the metrics over the
    /// validation set and checkpoints the model on strict improvement of
    /// the primary metric. Never fatal: failures are logged and skipped.
    fn validate(&mut self) {
        if self.proc.has_parent() {
            return;
        }
        let Some(data) = self.val_data.as_mut() else {
            debug!("no validation data configured, skipping");
            return;
        };
        let weights = match self.proc.weights() {
            Ok(weights) => weights,
            Err(e) => {
                warn!("validation skipped: {e}");
                return;
            }
        };
        if let Err(e) = self.model.set_weights(weights) {
            warn!("validation skipped: {e}");
            return;
        }

        data.restart();
        let mut totals: Metrics = Vec::new();
        let mut batches = 0usize;
        while let Some(batch) = data.next_batch() {
            match self.model.evaluate_on_batch(&batch) {
                Ok(metrics) => {
                    if totals.is_empty() {
                        totals = vec![0.0; metrics.len()];
                    }
                    for (total, value) in totals.iter_mut().zip(metrics) {
                        *total += value;
                    }
                    batches += 1;
                }
                Err(e) => {
                    warn!("validation aborted: {e}");
                    return;
                }
            }
        }
        if batches == 0 {
            warn!("validation skipped: empty validation set");
            return;
        }
        for total in totals.iter_mut() {
            *total /= batches as f32;
        }

        info!("validation at step {}:", self.proc.time_step());
        crate::worker::log_metrics("validation", self.model.metric_names(), &totals);
        self.save_if_best(&totals);
    }

    /// Checkpoints on strict improvement only; a tie never re-saves.
    fn save_if_best(&mut self, metrics: &Metrics) {
        let Some(&primary) = metrics.first() else {
            return;
        };
        if self.best_val_loss.is_some_and(|best| primary >= best) {
            return;
        }
        self.best_val_loss = Some(primary);
        match self.model.save(&self.checkpoint) {
            Ok(()) => info!(
                "saved best model to {} (primary metric {primary:.4})",
                self.checkpoint.display()
            ),
            Err(e) => warn!("failed to save checkpoint: {e}"),
        }
    }
}
