//! # Training History
//!
//! Typed per-epoch records of a fit run. The history names the artifact
//! directory a trained model is saved under, so its final snapshot is
//! resolved once into a [`FinalMetrics`] variant.

use serde::{Deserialize, Serialize};

/// Loss and accuracy observed over one pass of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPair {
    /// Mean binary cross-entropy.
    pub loss: f64,
    /// Fraction of rows classified correctly at the 0.5 threshold.
    pub accuracy: f64,
}

/// Metrics recorded at the end of one training epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochSnapshot {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Running batch-weighted metrics over the training set.
    pub train: MetricPair,
    /// Full-pass metrics over the validation set, when one was supplied.
    pub validation: Option<MetricPair>,
    /// Learning rate in effect during this epoch.
    pub learning_rate: f64,
}

/// Complete record of a fit run, one snapshot per completed epoch.
///
/// Shorter than the requested epoch count when early stopping fired.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    epochs: Vec<EpochSnapshot>,
}

impl TrainingHistory {
    pub(crate) fn push(&mut self, snapshot: EpochSnapshot) {
        self.epochs.push(snapshot);
    }

    /// All recorded snapshots, in epoch order.
    #[must_use]
    pub fn epochs(&self) -> &[EpochSnapshot] {
        &self.epochs
    }

    /// Number of completed epochs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// The metric pair the run is summarized by, from the last snapshot.
    #[must_use]
    pub fn final_metrics(&self) -> Option<FinalMetrics> {
        let last = self.epochs.last()?;
        Some(match last.validation {
            Some(pair) => FinalMetrics::Validated(pair),
            None => FinalMetrics::TrainOnly(last.train),
        })
    }
}

/// How a finished run is summarized: by its validation metrics when
/// validation data was supplied, by its training metrics otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FinalMetrics {
    /// The last epoch carried validation metrics.
    Validated(MetricPair),
    /// The run trained without validation data.
    TrainOnly(MetricPair),
}

impl FinalMetrics {
    /// The summarizing pair, whichever variant holds it.
    #[must_use]
    pub fn pair(&self) -> MetricPair {
        match self {
            Self::Validated(pair) | Self::TrainOnly(pair) => *pair,
        }
    }

    /// Directory stem a trained artifact is stored under.
    #[must_use]
    pub fn artifact_stem(&self) -> String {
        let pair = self.pair();
        format!("lstm_{:.4}_{:.4}", pair.loss, pair.accuracy)
    }
}
