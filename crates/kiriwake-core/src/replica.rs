//! Data-parallel execution: one model copy per device, shard-weighted
//! gradient merging on the lead copy, synchronized weights after every
//! step.

use candle_core::{Device, Var};
use candle_nn::{AdamW, Optimizer};
use tracing::debug;

use crate::error::{KiriwakeError, Result};
use crate::model::ClassifierModel;
use crate::train::{EncodedSet, adam_params, batch_loss, batch_tensors, correct_count};

/// Model copies across the run context's devices.
///
/// The copy on the first device is the lead: the optimizer owns its
/// variables and every step ends with the lead's weights broadcast to
/// the other copies.
pub(crate) struct ReplicaSet {
    replicas: Vec<ClassifierModel>,
    /// Trainable variables per replica, name-aligned across replicas.
    vars: Vec<Vec<Var>>,
    optimizer: AdamW,
}

impl ReplicaSet {
    pub(crate) fn new(canonical: &ClassifierModel, devices: &[Device]) -> Result<Self> {
        let mut replicas = Vec::with_capacity(devices.len());
        for device in devices {
            let replica = ClassifierModel::build(device, canonical.dims(), None)?;
            copy_vars(canonical, &replica)?;
            replicas.push(replica);
        }
        let vars: Vec<Vec<Var>> = replicas
            .iter()
            .map(ClassifierModel::trainable_vars)
            .collect();
        let optimizer = AdamW::new(vars[0].clone(), adam_params()).map_err(map_candle)?;
        debug!(replicas = replicas.len(), "replicated model across devices");
        Ok(Self {
            replicas,
            vars,
            optimizer,
        })
    }

    pub(crate) fn lead(&self) -> &ClassifierModel {
        &self.replicas[0]
    }

    pub(crate) fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub(crate) fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.set_learning_rate(lr);
    }

    /// Splits the batch into contiguous shards, runs one forward/backward
    /// per replica, merges the shard-weighted gradients on the lead and
    /// steps the optimizer once.
    pub(crate) fn train_batch(&mut self, set: &EncodedSet, index: &[usize]) -> Result<(f64, usize)> {
        let total = index.len();
        let shard_size = total.div_ceil(self.replicas.len());
        let mut loss_sum = 0.0;
        let mut correct = 0usize;
        let mut shard_grads = Vec::with_capacity(self.replicas.len());
        for (replica, shard) in self.replicas.iter().zip(index.chunks(shard_size)) {
            let (ids, targets) = batch_tensors(set, shard, replica.device())?;
            let logits = replica.forward(&ids, true)?;
            let loss = batch_loss(&logits, &targets).map_err(map_candle)?;
            let grads = loss.backward().map_err(map_candle)?;
            loss_sum += loss.to_scalar::<f32>().map_err(map_candle)? as f64 * shard.len() as f64;
            correct += correct_count(&logits, &targets)?;
            shard_grads.push((grads, shard.len() as f64 / total as f64));
        }

        // Merge every shard's gradients into the lead store, each scaled
        // by its share of the batch, keyed by the lead's variables.
        let (mut merged, lead_weight) = shard_grads.remove(0);
        for lead_var in &self.vars[0] {
            if let Some(grad) = merged.remove(lead_var) {
                merged.insert(lead_var, (grad * lead_weight).map_err(map_candle)?);
            }
        }
        let lead_device = self.replicas[0].device().clone();
        for (replica_idx, (grads, weight)) in shard_grads.iter().enumerate() {
            for (lead_var, replica_var) in self.vars[0].iter().zip(&self.vars[replica_idx + 1]) {
                let Some(grad) = grads.get(replica_var) else {
                    continue;
                };
                let grad = grad
                    .to_device(&lead_device)
                    .and_then(|g| g * *weight)
                    .map_err(map_candle)?;
                let grad = match merged.remove(lead_var) {
                    Some(existing) => (existing + grad).map_err(map_candle)?,
                    None => grad,
                };
                merged.insert(lead_var, grad);
            }
        }
        self.optimizer.step(&merged).map_err(map_candle)?;
        self.broadcast()?;
        Ok((loss_sum / total as f64, correct))
    }

    /// Copies the lead's weights back into the canonical model.
    pub(crate) fn sync_canonical(&self, canonical: &ClassifierModel) -> Result<()> {
        copy_vars(&self.replicas[0], canonical)
    }

    /// Pushes the lead's trainable weights to every other replica.
    fn broadcast(&self) -> Result<()> {
        for (replica, replica_vars) in self.replicas.iter().zip(&self.vars).skip(1) {
            for (lead_var, replica_var) in self.vars[0].iter().zip(replica_vars) {
                let value = lead_var
                    .as_tensor()
                    .to_device(replica.device())
                    .map_err(map_candle)?;
                replica_var.set(&value).map_err(map_candle)?;
            }
        }
        Ok(())
    }
}

/// Copies every variable of `src` into `dst`, moving across devices as
/// needed. Both models must share an architecture.
fn copy_vars(src: &ClassifierModel, dst: &ClassifierModel) -> Result<()> {
    for ((src_name, src_var), (dst_name, dst_var)) in
        src.named_vars().into_iter().zip(dst.named_vars())
    {
        if src_name != dst_name {
            return Err(KiriwakeError::Engine(format!(
                "replica variable mismatch: {src_name} vs {dst_name}"
            )));
        }
        let value = src_var
            .as_tensor()
            .to_device(dst_var.device())
            .map_err(map_candle)?;
        dst_var.set(&value).map_err(map_candle)?;
    }
    Ok(())
}

fn map_candle(e: candle_core::Error) -> KiriwakeError {
    KiriwakeError::Engine(e.to_string())
}
