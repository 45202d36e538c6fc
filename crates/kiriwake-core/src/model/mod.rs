//! # Classifier Network
//!
//! The fixed architecture: a frozen embedding lookup feeding spatial
//! dropout, a bidirectional GRU stack, a bidirectional LSTM stack, dual
//! max/average pooling, two residual dense blocks, and a single-logit
//! head. Weights persist as safetensors with the architecture scalars in
//! the header, so a saved file is enough to rebuild the network.

mod layers;

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::rnn::{GRU, GRUConfig, LSTM, LSTMConfig, gru, lstm};
use candle_nn::{Embedding, Linear, Module, VarBuilder, VarMap, embedding, linear};
use tracing::info;

use crate::error::{KiriwakeError, Result};

pub use layers::{Bidirectional, SpatialDropout1d};

/// Hidden units per recurrent direction.
pub const RECURRENT_UNITS: usize = 128;

/// Channel dropout rate applied to embedded sequences.
const SPATIAL_DROPOUT_RATE: f32 = 0.2;

/// Variable-map prefix of the frozen embedding lookup.
const EMBEDDING_PREFIX: &str = "embedding";

/// Safetensors header keys for the architecture scalars.
const META_NUM_WORDS: &str = "num_words";
const META_EMBEDDING_DIM: &str = "embedding_dim";
const META_UNITS: &str = "units";

/// Architecture scalars persisted beside the weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDims {
    /// Vocabulary capacity (embedding rows).
    pub num_words: usize,
    /// Embedding vector width.
    pub embedding_dim: usize,
    /// Hidden units per recurrent direction.
    pub units: usize,
}

/// The layer graph.
#[derive(Debug)]
struct ClassifierNet {
    embedding: Embedding,
    spatial_dropout: SpatialDropout1d,
    gru: Bidirectional<GRU>,
    lstm: Bidirectional<LSTM>,
    dense1: Linear,
    dense2: Linear,
    output: Linear,
}

impl ClassifierNet {
    fn build(vb: &VarBuilder, dims: ModelDims) -> candle_core::Result<Self> {
        let lookup = embedding(dims.num_words, dims.embedding_dim, vb.pp(EMBEDDING_PREFIX))?;
        // The lookup stays frozen: its variable lives in the var map for
        // persistence while the graph sees a detached view of the same
        // storage, so loads and pretrained seeding remain visible.
        let lookup = Embedding::new(lookup.embeddings().detach(), dims.embedding_dim);
        let gru_fwd = gru(
            dims.embedding_dim,
            dims.units,
            GRUConfig::default(),
            vb.pp("gru_fwd"),
        )?;
        let gru_bwd = gru(
            dims.embedding_dim,
            dims.units,
            GRUConfig::default(),
            vb.pp("gru_bwd"),
        )?;
        let lstm_fwd = lstm(
            2 * dims.units,
            dims.units,
            LSTMConfig::default(),
            vb.pp("lstm_fwd"),
        )?;
        let lstm_bwd = lstm(
            2 * dims.units,
            dims.units,
            LSTMConfig::default(),
            vb.pp("lstm_bwd"),
        )?;
        let pooled = 4 * dims.units;
        Ok(Self {
            embedding: lookup,
            spatial_dropout: SpatialDropout1d::new(SPATIAL_DROPOUT_RATE),
            gru: Bidirectional::new(gru_fwd, gru_bwd),
            lstm: Bidirectional::new(lstm_fwd, lstm_bwd),
            dense1: linear(pooled, pooled, vb.pp("dense1"))?,
            dense2: linear(pooled, pooled, vb.pp("dense2"))?,
            output: linear(pooled, 1, vb.pp("output"))?,
        })
    }

    /// Raw logit for a `(batch, steps)` id tensor.
    fn forward(&self, token_ids: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let xs = self.embedding.forward(token_ids)?;
        let xs = self.spatial_dropout.forward(&xs, train)?;
        let xs = self.gru.run(&xs)?;
        let xs = self.lstm.run(&xs)?;
        let max_pool = xs.max(1)?;
        let avg_pool = xs.mean(1)?;
        let mut hidden = Tensor::cat(&[&max_pool, &avg_pool], 1)?;
        hidden = (&hidden + self.dense1.forward(&hidden)?.relu()?)?;
        hidden = (&hidden + self.dense2.forward(&hidden)?.relu()?)?;
        self.output.forward(&hidden)
    }
}

/// A built network together with its variables and placement.
pub struct ClassifierModel {
    dims: ModelDims,
    device: Device,
    varmap: VarMap,
    net: ClassifierNet,
}

impl ClassifierModel {
    /// Builds a fresh network on `device`, optionally seeding the frozen
    /// lookup from a pretrained `(num_words, embedding_dim)` matrix.
    ///
    /// Without a matrix the lookup keeps the engine's default random
    /// initialization; it is frozen either way.
    pub fn build(device: &Device, dims: ModelDims, pretrained: Option<&Tensor>) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let net = ClassifierNet::build(&vb, dims).map_err(map_candle)?;
        let model = Self {
            dims,
            device: device.clone(),
            varmap,
            net,
        };
        if let Some(matrix) = pretrained {
            model.set_embedding(matrix)?;
        }
        Ok(model)
    }

    /// Rebuilds a model from a weights file on `device`.
    pub fn load(path: &Path, device: &Device) -> Result<Self> {
        let dims = Self::read_dims(path)?;
        let mut model = Self::build(device, dims, None)?;
        model
            .varmap
            .load(path)
            .map_err(|e| KiriwakeError::ArtifactCorrupt {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        Ok(model)
    }

    /// Reads the architecture scalars from a weights file header.
    pub fn read_dims(path: &Path) -> Result<ModelDims> {
        if !path.exists() {
            return Err(KiriwakeError::ArtifactMissing {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path)?;
        let (_, metadata) = safetensors::SafeTensors::read_metadata(&bytes).map_err(|e| {
            KiriwakeError::ArtifactCorrupt {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        })?;
        let header = metadata.metadata().clone().unwrap_or_default();
        Ok(ModelDims {
            num_words: parse_meta(&header, META_NUM_WORDS, path)?,
            embedding_dim: parse_meta(&header, META_EMBEDDING_DIM, path)?,
            units: parse_meta(&header, META_UNITS, path)?,
        })
    }

    /// Writes every variable plus the architecture header to `path`.
    pub fn save_weights(&self, path: &Path) -> Result<()> {
        let tensors = self.named_tensors();
        let header = HashMap::from([
            (META_NUM_WORDS.to_string(), self.dims.num_words.to_string()),
            (
                META_EMBEDDING_DIM.to_string(),
                self.dims.embedding_dim.to_string(),
            ),
            (META_UNITS.to_string(), self.dims.units.to_string()),
        ]);
        safetensors::serialize_to_file(tensors, &Some(header), path)
            .map_err(|e| KiriwakeError::Engine(format!("weight serialization failed: {e}")))
    }

    /// Forward pass on this model's device.
    pub fn forward(&self, token_ids: &Tensor, train: bool) -> Result<Tensor> {
        self.net.forward(token_ids, train).map_err(map_candle)
    }

    /// Variables the optimizer may update, in name order. The frozen
    /// embedding is excluded.
    #[must_use]
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.named_trainable_vars()
            .into_iter()
            .map(|(_, var)| var)
            .collect()
    }

    /// Name-keyed trainable variables, sorted by name.
    pub(crate) fn named_trainable_vars(&self) -> Vec<(String, Var)> {
        let data = self.varmap.data().lock().unwrap();
        let mut named: Vec<(String, Var)> = data
            .iter()
            .filter(|(name, _)| !name.starts_with(EMBEDDING_PREFIX))
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        named
    }

    /// Every variable, the frozen embedding included, sorted by name.
    pub(crate) fn named_vars(&self) -> Vec<(String, Var)> {
        let data = self.varmap.data().lock().unwrap();
        let mut named: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        named
    }

    /// Logs total, trainable and frozen parameter counts.
    pub fn log_summary(&self) {
        let data = self.varmap.data().lock().unwrap();
        let mut total = 0usize;
        let mut frozen = 0usize;
        for (name, var) in data.iter() {
            let count = var.as_tensor().elem_count();
            total += count;
            if name.starts_with(EMBEDDING_PREFIX) {
                frozen += count;
            }
        }
        info!(
            total_params = total,
            trainable_params = total - frozen,
            frozen_params = frozen,
            "built classifier network"
        );
    }

    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[must_use]
    pub fn dims(&self) -> ModelDims {
        self.dims
    }

    fn set_embedding(&self, matrix: &Tensor) -> Result<()> {
        let data = self.varmap.data().lock().unwrap();
        let var = data
            .get(&format!("{EMBEDDING_PREFIX}.weight"))
            .ok_or_else(|| KiriwakeError::Engine("embedding variable missing".into()))?;
        let matrix = matrix.to_device(var.device()).map_err(map_candle)?;
        var.set(&matrix).map_err(map_candle)
    }

    fn named_tensors(&self) -> Vec<(String, Tensor)> {
        let data = self.varmap.data().lock().unwrap();
        let mut named: Vec<(String, Tensor)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        named
    }
}

fn parse_meta(header: &HashMap<String, String>, key: &str, path: &Path) -> Result<usize> {
    header
        .get(key)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| KiriwakeError::ArtifactCorrupt {
            path: path.to_path_buf(),
            detail: format!("missing or invalid header field {key:?}"),
        })
}

fn map_candle(e: candle_core::Error) -> KiriwakeError {
    KiriwakeError::Engine(e.to_string())
}
