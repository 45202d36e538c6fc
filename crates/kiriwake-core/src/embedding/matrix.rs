//! # Embedding Matrix Assembly
//!
//! Turns a fitted vocabulary plus a pretrained table into the frozen lookup
//! matrix. Known words copy their vectors verbatim; in-vocabulary words the
//! table lacks get Gaussian rows; everything else, the padding row
//! included, stays zero.

use candle_core::{Device, Tensor};
use tracing::debug;

use crate::error::{KiriwakeError, Result};
use crate::tokenizer::FrequencyTokenizer;

use super::vectors::WordVectors;

/// Standard deviation for rows the table has no vector for.
const FALLBACK_STD: f32 = 0.5;

/// Assembles the `(top_words, dim)` lookup matrix on `device`.
///
/// Vocabulary indices at or beyond `top_words` are ignored. Fallback rows
/// are drawn fresh from Normal(0, [`FALLBACK_STD`]) on every call.
pub fn pretrained_matrix(
    vocab: &FrequencyTokenizer,
    vectors: &WordVectors,
    top_words: usize,
    dim: usize,
    device: &Device,
) -> Result<Tensor> {
    if vectors.dim() != dim {
        return Err(KiriwakeError::InvalidOptions(format!(
            "vector table is {}-dimensional, embedding_dim is {dim}",
            vectors.dim()
        )));
    }
    let mut rows = vec![0f32; top_words * dim];
    let mut missing = Vec::new();
    for (word, id) in vocab.iter() {
        let row = id as usize;
        if row >= top_words {
            continue;
        }
        match vectors.get(word) {
            Some(vector) => {
                debug_assert_eq!(vector.len(), dim, "vector width mismatch");
                rows[row * dim..(row + 1) * dim].copy_from_slice(vector);
            }
            None => missing.push(row),
        }
    }
    let fallback_rows = missing.len();
    if fallback_rows > 0 && dim > 0 {
        let noise = Tensor::randn(0f32, FALLBACK_STD, (fallback_rows, dim), &Device::Cpu)
            .and_then(|t| t.to_vec2::<f32>())
            .map_err(map_candle)?;
        for (row, values) in missing.into_iter().zip(noise) {
            rows[row * dim..(row + 1) * dim].copy_from_slice(&values);
        }
    }
    debug!(
        words = vocab.len(),
        fallback_rows, top_words, dim, "assembled embedding matrix"
    );
    Tensor::from_vec(rows, (top_words, dim), device).map_err(map_candle)
}

fn map_candle(e: candle_core::Error) -> KiriwakeError {
    KiriwakeError::Engine(format!("embedding matrix assembly failed: {e}"))
}
