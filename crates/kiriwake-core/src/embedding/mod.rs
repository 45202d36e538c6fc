//! # Pretrained Embeddings
//!
//! Vector-table loading and caching, plus assembly of the frozen lookup
//! matrix the classifier is built over.

mod matrix;
mod vectors;

pub use matrix::pretrained_matrix;
pub use vectors::{VECTOR_CACHE_DIR, WordVectors};
