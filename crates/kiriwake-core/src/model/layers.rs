//! # Network Building Blocks
//!
//! The pieces the classifier graph is assembled from: channel-wise dropout
//! over embedded sequences and a bidirectional wrapper around candle's
//! recurrent cells. Everything here speaks candle's own `Result`, matching
//! the layer traits it composes with.

use candle_core::{D, DType, Result, Tensor};
use candle_nn::RNN;
use candle_nn::rnn::{GRU, GRUState, LSTM, LSTMState};

/// Dropout that zeroes whole embedding channels per sample.
///
/// The keep-mask has shape `(batch, 1, channels)` and broadcasts over the
/// step axis, so a dropped channel vanishes for the entire sequence.
/// Inference passes input through untouched.
#[derive(Debug, Clone)]
pub struct SpatialDropout1d {
    rate: f32,
}

impl SpatialDropout1d {
    pub fn new(rate: f32) -> Self {
        Self { rate }
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        if !train || self.rate == 0.0 {
            return Ok(xs.clone());
        }
        if !(0.0..1.0).contains(&self.rate) {
            candle_core::bail!("spatial dropout rate must be in [0, 1), got {}", self.rate);
        }
        let (batch, _steps, channels) = xs.dims3()?;
        let keep = 1.0 - self.rate as f64;
        let rand = Tensor::rand(0f32, 1f32, (batch, 1, channels), xs.device())?;
        let threshold = Tensor::full(self.rate, (batch, 1, channels), xs.device())?;
        let mask = rand.ge(&threshold)?.to_dtype(DType::F32)?;
        let mask = (mask / keep)?;
        xs.broadcast_mul(&mask)
    }
}

/// Recurrent cells that expose the hidden vector of each step.
pub trait HiddenSequence: RNN {
    fn hidden(states: &[Self::State]) -> Vec<Tensor>;
}

impl HiddenSequence for GRU {
    fn hidden(states: &[GRUState]) -> Vec<Tensor> {
        states.iter().map(|s| s.h().clone()).collect()
    }
}

impl HiddenSequence for LSTM {
    fn hidden(states: &[LSTMState]) -> Vec<Tensor> {
        states.iter().map(|s| s.h().clone()).collect()
    }
}

/// Runs one cell over the sequence and a twin over its reversal, then
/// concatenates their outputs on the feature axis.
#[derive(Debug, Clone)]
pub struct Bidirectional<M> {
    forward: M,
    backward: M,
}

impl<M: HiddenSequence> Bidirectional<M> {
    pub fn new(forward: M, backward: M) -> Self {
        Self { forward, backward }
    }

    /// Maps `(batch, steps, features)` to `(batch, steps, 2 * hidden)`.
    pub fn run(&self, xs: &Tensor) -> Result<Tensor> {
        let fwd_states = self.forward.seq(xs)?;
        let fwd = Tensor::stack(&M::hidden(&fwd_states), 1)?;
        let bwd_states = self.backward.seq(&reverse_time(xs)?)?;
        let bwd = reverse_time(&Tensor::stack(&M::hidden(&bwd_states), 1)?)?;
        Tensor::cat(&[&fwd, &bwd], D::Minus1)
    }
}

/// Reverses the step axis of a `(batch, steps, features)` tensor.
fn reverse_time(xs: &Tensor) -> Result<Tensor> {
    let steps = xs.dim(1)?;
    let indices: Vec<u32> = (0..steps as u32).rev().collect();
    let indices = Tensor::from_vec(indices, steps, xs.device())?;
    xs.index_select(&indices, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::rnn::{GRUConfig, gru};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn spatial_dropout_is_identity_at_inference() {
        let xs = Tensor::rand(0f32, 1f32, (2, 5, 4), &Device::Cpu).unwrap();
        let out = SpatialDropout1d::new(0.5).forward(&xs, false).unwrap();
        assert_eq!(
            xs.to_vec3::<f32>().unwrap(),
            out.to_vec3::<f32>().unwrap()
        );
    }

    #[test]
    fn spatial_dropout_drops_whole_channels() {
        let xs = Tensor::ones((3, 6, 8), DType::F32, &Device::Cpu).unwrap();
        let out = SpatialDropout1d::new(0.5)
            .forward(&xs, true)
            .unwrap()
            .to_vec3::<f32>()
            .unwrap();
        for sample in &out {
            for channel in 0..8 {
                let column: Vec<f32> = sample.iter().map(|step| step[channel]).collect();
                let dropped = column.iter().all(|v| *v == 0.0);
                let kept = column.iter().all(|v| (*v - 2.0).abs() < 1e-6);
                assert!(dropped || kept, "channel {channel} was split: {column:?}");
            }
        }
    }

    #[test]
    fn reverse_time_flips_steps() {
        let xs = Tensor::from_vec(vec![1f32, 2.0, 3.0], (1, 3, 1), &Device::Cpu).unwrap();
        let flipped = reverse_time(&xs).unwrap().to_vec3::<f32>().unwrap();
        assert_eq!(flipped, vec![vec![vec![3.0], vec![2.0], vec![1.0]]]);
    }

    #[test]
    fn bidirectional_doubles_the_feature_axis() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let fwd = gru(4, 3, GRUConfig::default(), vb.pp("fwd")).unwrap();
        let bwd = gru(4, 3, GRUConfig::default(), vb.pp("bwd")).unwrap();
        let bi = Bidirectional::new(fwd, bwd);

        let xs = Tensor::zeros((2, 5, 4), DType::F32, &Device::Cpu).unwrap();
        let out = bi.run(&xs).unwrap();
        assert_eq!(out.dims3().unwrap(), (2, 5, 6));
    }
}
