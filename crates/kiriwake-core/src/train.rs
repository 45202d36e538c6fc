//! Training loop: shuffled mini-batches, Adam updates, loss monitors and
//! the single/replicated executor split.

use candle_core::{Device, Tensor};
use candle_nn::ops::sigmoid;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use oorandom::Rand64;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::error::{KiriwakeError, Result};
use crate::history::{EpochSnapshot, MetricPair, TrainingHistory};
use crate::model::ClassifierModel;
use crate::replica::ReplicaSet;
use crate::schedule::{EarlyStopping, ReduceLrOnPlateau};

/// Adam step size at epoch one.
pub const BASE_LEARNING_RATE: f64 = 1e-3;

/// Stalled validation epochs tolerated before training stops.
pub const EARLY_STOPPING_PATIENCE: usize = 5;

/// Stalled validation epochs tolerated before the step size drops.
pub const PLATEAU_PATIENCE: usize = 3;

/// Multiplier applied to the step size on a plateau.
pub const PLATEAU_FACTOR: f64 = 0.2;

/// Validation-loss change below this counts as a stall for the plateau
/// monitor.
pub const PLATEAU_MIN_DELTA: f64 = 1e-4;

/// The step size never drops below this.
pub const MIN_LEARNING_RATE: f64 = 1e-6;

/// Epoch shuffles draw from a fixed stream so runs repeat exactly.
const SHUFFLE_SEED: u128 = 0x6b69_7269_7761_6b65;

/// Encoded rows plus their targets, ready for batching.
#[derive(Debug, Clone)]
pub struct EncodedSet {
    /// Fixed-width id rows.
    pub rows: Vec<Vec<u32>>,
    /// One target in `{0.0, 1.0}` per row.
    pub targets: Vec<f32>,
}

impl EncodedSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Everything one `fit` call feeds the loop.
pub struct FitData<'a> {
    pub train: &'a EncodedSet,
    pub validation: Option<&'a EncodedSet>,
    pub epochs: usize,
    pub batch_size: usize,
}

pub fn adam_params() -> ParamsAdamW {
    ParamsAdamW {
        lr: BASE_LEARNING_RATE,
        weight_decay: 0.0,
        ..Default::default()
    }
}

/// Stacks the indexed rows into a `(n, steps)` id tensor and their
/// targets into an `(n, 1)` column.
pub fn batch_tensors(
    set: &EncodedSet,
    index: &[usize],
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let steps = index.first().map_or(0, |&i| set.rows[i].len());
    let mut ids = Vec::with_capacity(index.len() * steps);
    let mut targets = Vec::with_capacity(index.len());
    for &i in index {
        ids.extend_from_slice(&set.rows[i]);
        targets.push(set.targets[i]);
    }
    let ids = Tensor::from_vec(ids, (index.len(), steps), device).map_err(map_candle)?;
    let targets = Tensor::from_vec(targets, (index.len(), 1), device).map_err(map_candle)?;
    Ok((ids, targets))
}

/// Stacks already-encoded rows for inference.
pub fn row_tensor(rows: &[Vec<u32>], device: &Device) -> Result<Tensor> {
    let steps = rows.first().map_or(0, Vec::len);
    let mut ids = Vec::with_capacity(rows.len() * steps);
    for row in rows {
        ids.extend_from_slice(row);
    }
    Tensor::from_vec(ids, (rows.len(), steps), device).map_err(map_candle)
}

/// Fused sigmoid + binary cross entropy over raw logits.
pub(crate) fn batch_loss(logits: &Tensor, targets: &Tensor) -> candle_core::Result<Tensor> {
    candle_nn::loss::binary_cross_entropy_with_logit(logits, targets)
}

/// Sigmoid probabilities of a logit column, flattened.
pub fn probabilities(logits: &Tensor) -> Result<Vec<f32>> {
    sigmoid(logits)
        .and_then(|p| p.flatten_all()?.to_vec1())
        .map_err(map_candle)
}

/// Rows whose thresholded probability matches the target.
pub(crate) fn correct_count(logits: &Tensor, targets: &Tensor) -> Result<usize> {
    let probs = probabilities(logits)?;
    let wanted: Vec<f32> = targets
        .flatten_all()
        .and_then(|t| t.to_vec1())
        .map_err(map_candle)?;
    Ok(probs
        .iter()
        .zip(&wanted)
        .filter(|(p, t)| (**p > 0.5) == (**t > 0.5))
        .count())
}

/// Fisher-Yates permutation of `0..len` from the shared stream.
fn shuffled_indices(rng: &mut Rand64, len: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    for i in (1..len).rev() {
        let j = rng.rand_range(0..i as u64 + 1) as usize;
        order.swap(i, j);
    }
    order
}

/// One model, one optimizer, one device.
struct SingleDevice<'m> {
    model: &'m ClassifierModel,
    optimizer: AdamW,
}

impl<'m> SingleDevice<'m> {
    fn new(model: &'m ClassifierModel) -> Result<Self> {
        let optimizer = AdamW::new(model.trainable_vars(), adam_params()).map_err(map_candle)?;
        Ok(Self { model, optimizer })
    }

    fn train_batch(&mut self, ids: &Tensor, targets: &Tensor) -> Result<(f64, usize)> {
        let logits = self.model.forward(ids, true)?;
        let loss = batch_loss(&logits, targets).map_err(map_candle)?;
        self.optimizer.backward_step(&loss).map_err(map_candle)?;
        let correct = correct_count(&logits, targets)?;
        let loss = loss.to_scalar::<f32>().map_err(map_candle)? as f64;
        Ok((loss, correct))
    }
}

/// Dispatches batches to whichever execution mode the run context chose.
enum Executor<'m> {
    Single(SingleDevice<'m>),
    Replicated(ReplicaSet),
}

impl Executor<'_> {
    fn train_batch(&mut self, set: &EncodedSet, index: &[usize]) -> Result<(f64, usize)> {
        match self {
            Self::Single(single) => {
                let (ids, targets) = batch_tensors(set, index, single.model.device())?;
                single.train_batch(&ids, &targets)
            }
            Self::Replicated(replicas) => replicas.train_batch(set, index),
        }
    }

    fn learning_rate(&self) -> f64 {
        match self {
            Self::Single(single) => single.optimizer.learning_rate(),
            Self::Replicated(replicas) => replicas.learning_rate(),
        }
    }

    fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::Single(single) => single.optimizer.set_learning_rate(lr),
            Self::Replicated(replicas) => replicas.set_learning_rate(lr),
        }
    }

    fn evaluation_model(&self) -> &ClassifierModel {
        match self {
            Self::Single(single) => single.model,
            Self::Replicated(replicas) => replicas.lead(),
        }
    }
}

/// Full inference pass over a set, batched.
pub fn evaluate(model: &ClassifierModel, set: &EncodedSet, batch_size: usize) -> Result<MetricPair> {
    let mut loss_sum = 0.0;
    let mut correct = 0usize;
    let order: Vec<usize> = (0..set.len()).collect();
    for index in order.chunks(batch_size) {
        let (ids, targets) = batch_tensors(set, index, model.device())?;
        let logits = model.forward(&ids, false)?;
        let loss = batch_loss(&logits, &targets).map_err(map_candle)?;
        loss_sum += loss.to_scalar::<f32>().map_err(map_candle)? as f64 * index.len() as f64;
        correct += correct_count(&logits, &targets)?;
    }
    Ok(MetricPair {
        loss: loss_sum / set.len() as f64,
        accuracy: correct as f64 / set.len() as f64,
    })
}

/// Runs the whole schedule and returns the per-epoch history.
///
/// Validation drives both monitors; without a validation set the loop
/// runs every requested epoch at the base step size.
pub fn fit_model(
    ctx: &RunContext,
    model: &ClassifierModel,
    data: &FitData<'_>,
) -> Result<TrainingHistory> {
    if data.train.is_empty() {
        return Err(KiriwakeError::InvalidInput(
            "training set is empty".to_string(),
        ));
    }
    if data.batch_size == 0 {
        return Err(KiriwakeError::InvalidOptions(
            "batch size must be at least 1".to_string(),
        ));
    }
    let mut executor = if ctx.is_replicated() {
        Executor::Replicated(ReplicaSet::new(model, ctx.devices())?)
    } else {
        Executor::Single(SingleDevice::new(model)?)
    };
    if data.validation.is_none() {
        warn!("no validation set; early stopping and plateau scheduling are off");
    }

    let mut rng = Rand64::new(SHUFFLE_SEED);
    let mut early = EarlyStopping::new(EARLY_STOPPING_PATIENCE, 0.0);
    let mut plateau = ReduceLrOnPlateau::new(
        PLATEAU_FACTOR,
        PLATEAU_PATIENCE,
        PLATEAU_MIN_DELTA,
        MIN_LEARNING_RATE,
    );
    let mut history = TrainingHistory::default();

    for epoch in 1..=data.epochs {
        let learning_rate = executor.learning_rate();
        let order = shuffled_indices(&mut rng, data.train.len());
        let mut loss_sum = 0.0;
        let mut correct = 0usize;
        for index in order.chunks(data.batch_size) {
            let (loss, hits) = executor.train_batch(data.train, index)?;
            loss_sum += loss * index.len() as f64;
            correct += hits;
        }
        let train = MetricPair {
            loss: loss_sum / data.train.len() as f64,
            accuracy: correct as f64 / data.train.len() as f64,
        };

        let validation = match data.validation {
            Some(set) => Some(evaluate(executor.evaluation_model(), set, data.batch_size)?),
            None => None,
        };
        match &validation {
            Some(val) => info!(
                epoch,
                train_loss = train.loss,
                train_acc = train.accuracy,
                val_loss = val.loss,
                val_acc = val.accuracy,
                lr = learning_rate,
                "epoch complete"
            ),
            None => info!(
                epoch,
                train_loss = train.loss,
                train_acc = train.accuracy,
                lr = learning_rate,
                "epoch complete"
            ),
        }
        history.push(EpochSnapshot {
            epoch,
            train,
            validation,
            learning_rate,
        });

        if let Some(val) = validation {
            if let Some(next_lr) = plateau.observe(val.loss, executor.learning_rate()) {
                info!(lr = next_lr, "validation loss plateaued, reducing step size");
                executor.set_learning_rate(next_lr);
            }
            if early.observe(val.loss) {
                info!(epoch, "validation loss stalled, stopping early");
                break;
            }
        }
    }

    if let Executor::Replicated(replicas) = &executor {
        replicas.sync_canonical(model)?;
    }
    Ok(history)
}

fn map_candle(e: candle_core::Error) -> KiriwakeError {
    KiriwakeError::Engine(e.to_string())
}

#[cfg(test)]
mod tests {
    use candle_core::DType;

    use super::*;

    fn sample_set() -> EncodedSet {
        EncodedSet {
            rows: vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]],
            targets: vec![1.0, 0.0, 1.0],
        }
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut rng = Rand64::new(7);
        let order = shuffled_indices(&mut rng, 50);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_repeats_for_equal_seeds() {
        let mut a = Rand64::new(SHUFFLE_SEED);
        let mut b = Rand64::new(SHUFFLE_SEED);
        assert_eq!(shuffled_indices(&mut a, 20), shuffled_indices(&mut b, 20));
    }

    #[test]
    fn batch_tensors_gather_selected_rows() {
        let set = sample_set();
        let (ids, targets) = batch_tensors(&set, &[2, 0], &Device::Cpu).unwrap();
        assert_eq!(ids.dtype(), DType::U32);
        assert_eq!(
            ids.to_vec2::<u32>().unwrap(),
            vec![vec![7, 8, 9], vec![1, 2, 3]]
        );
        assert_eq!(
            targets.to_vec2::<f32>().unwrap(),
            vec![vec![1.0], vec![1.0]]
        );
    }

    #[test]
    fn correct_count_thresholds_at_half() {
        let logits = Tensor::from_vec(vec![2.0f32, -2.0, -2.0], (3, 1), &Device::Cpu).unwrap();
        let targets = Tensor::from_vec(vec![1.0f32, 0.0, 1.0], (3, 1), &Device::Cpu).unwrap();
        assert_eq!(correct_count(&logits, &targets).unwrap(), 2);
    }

    #[test]
    fn probabilities_flatten_the_column() {
        let logits = Tensor::from_vec(vec![0.0f32, 0.0], (2, 1), &Device::Cpu).unwrap();
        let probs = probabilities(&logits).unwrap();
        assert_eq!(probs.len(), 2);
        assert!((probs[0] - 0.5).abs() < 1e-6);
    }
}
