//! # Training Schedule Monitors
//!
//! Epoch-boundary observers over a monitored loss. One halts training after
//! a stall, the other decays the learning rate. Both are fed exactly once
//! per epoch and hold no reference to the model.

/// Halts training after `patience` consecutive epochs without improvement.
///
/// Improvement means the monitored loss dropped by more than `min_delta`
/// below the best value seen so far. Weights stay exactly as the final
/// epoch produced them; the best epoch is not restored.
#[derive(Debug)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: f64,
    wait: usize,
}

impl EarlyStopping {
    #[must_use]
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Feeds one epoch's monitored loss; returns `true` when training
    /// should stop.
    pub fn observe(&mut self, loss: f64) -> bool {
        if loss < self.best - self.min_delta {
            self.best = loss;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        self.wait >= self.patience
    }
}

/// Multiplies the learning rate by `factor` after `patience` consecutive
/// epochs without improvement, never dropping below `min_lr`.
///
/// Improvement means the monitored loss dropped by more than `min_delta`
/// below the best value seen so far. The patience counter resets when a
/// reduction is applied; the best value does not.
#[derive(Debug)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_delta: f64,
    min_lr: f64,
    best: f64,
    wait: usize,
}

impl ReduceLrOnPlateau {
    #[must_use]
    pub fn new(factor: f64, patience: usize, min_delta: f64, min_lr: f64) -> Self {
        Self {
            factor,
            patience,
            min_delta,
            min_lr,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Feeds one epoch's monitored loss along with the rate currently in
    /// effect; returns the reduced rate when a reduction should apply.
    pub fn observe(&mut self, loss: f64, current_lr: f64) -> Option<f64> {
        if loss < self.best - self.min_delta {
            self.best = loss;
            self.wait = 0;
            return None;
        }
        self.wait += 1;
        if self.wait >= self.patience && current_lr > self.min_lr {
            self.wait = 0;
            return Some((current_lr * self.factor).max(self.min_lr));
        }
        None
    }
}
