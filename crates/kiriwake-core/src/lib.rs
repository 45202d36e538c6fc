//! # Kiriwake Core
//!
//! The heart of the Kiriwake text classification engine. Provides a
//! frequency-ranked tokenizer, pretrained word embeddings with a binary
//! vector cache, and a recurrent binary classifier with training,
//! inference and artifact persistence.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kiriwake_core::{RunContext, TextClassifier, TrainOptions};
//!
//! let ctx = RunContext::from_env().unwrap();
//! let mut classifier = TextClassifier::new(ctx);
//!
//! let texts = ["great film", "dreadful film"];
//! let labels = [true, false];
//! let options = TrainOptions {
//!     num_words: 20_000,
//!     sequence_length: 100,
//!     embedding_dim: 100,
//!     glove_path: None,
//!     epochs: 10,
//!     batch_size: 32,
//! };
//!
//! classifier.fit(&options, &texts, &labels, None).unwrap();
//! let probs = classifier.predict_proba(&["a fine film"], 100, 32).unwrap();
//! let saved = classifier.save(None).unwrap();
//! println!("p = {:.4}, saved to {saved:?}", probs[0]);
//! ```
pub mod classifier;
pub mod context;
pub mod embedding;
pub mod error;
pub mod history;
pub mod model;
pub mod schedule;
pub mod tokenizer;

mod replica;
mod train;

// Re-export primary API
pub use classifier::{MODEL_FILE, MODELS_DIR, TOKENIZER_FILE, TextClassifier, TrainOptions};
pub use context::{DEVICES_ENV_VAR, RunContext};
pub use embedding::WordVectors;
pub use error::{KiriwakeError, Result};
pub use history::{EpochSnapshot, FinalMetrics, MetricPair, TrainingHistory};
pub use tokenizer::FrequencyTokenizer;
