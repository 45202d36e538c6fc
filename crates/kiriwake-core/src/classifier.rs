//! # Text Classifier
//!
//! The crate's front door: fit a binary classifier over raw labeled
//! text, predict probabilities for new text, and persist or restore the
//! trained artifacts as a directory pair of weights plus vocabulary.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::context::RunContext;
use crate::embedding::{WordVectors, pretrained_matrix};
use crate::error::{KiriwakeError, Result};
use crate::history::TrainingHistory;
use crate::model::{ClassifierModel, ModelDims, RECURRENT_UNITS};
use crate::tokenizer::FrequencyTokenizer;
use crate::train::{self, EncodedSet, FitData, probabilities, row_tensor};

/// Default parent directory for saved artifacts.
pub const MODELS_DIR: &str = "models";

/// Weights file inside an artifact directory.
pub const MODEL_FILE: &str = "model.safetensors";

/// Vocabulary file inside an artifact directory.
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Knobs for one `fit` call.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Vocabulary capacity, padding id included.
    pub num_words: usize,
    /// Fixed row width texts are padded or truncated to.
    pub sequence_length: usize,
    /// Word vector width.
    pub embedding_dim: usize,
    /// Pretrained vector source; `None` keeps a random frozen lookup.
    pub glove_path: Option<PathBuf>,
    /// Upper bound on training epochs.
    pub epochs: usize,
    /// Rows per optimizer step.
    pub batch_size: usize,
}

impl TrainOptions {
    fn validate(&self) -> Result<()> {
        if self.num_words < 2 {
            return Err(KiriwakeError::InvalidOptions(
                "num_words must leave room for at least one word beside padding".to_string(),
            ));
        }
        if self.sequence_length == 0 {
            return Err(KiriwakeError::InvalidOptions(
                "sequence_length must be at least 1".to_string(),
            ));
        }
        if self.embedding_dim == 0 {
            return Err(KiriwakeError::InvalidOptions(
                "embedding_dim must be at least 1".to_string(),
            ));
        }
        if self.epochs == 0 {
            return Err(KiriwakeError::InvalidOptions(
                "epochs must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(KiriwakeError::InvalidOptions(
                "batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A binary text classifier over frozen word embeddings and a recurrent
/// encoder.
///
/// Freshly constructed instances hold no model; call
/// [`fit`](Self::fit) or [`load`](Self::load) first.
pub struct TextClassifier {
    ctx: RunContext,
    tokenizer: Option<FrequencyTokenizer>,
    model: Option<ClassifierModel>,
    history: Option<TrainingHistory>,
}

impl TextClassifier {
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            tokenizer: None,
            model: None,
            history: None,
        }
    }

    /// Fits a fresh model on labeled text and returns the epoch history.
    ///
    /// Builds the vocabulary from `texts`, encodes both sets to
    /// `sequence_length`-wide rows, seeds the frozen lookup from the
    /// configured vector source when one is given, then runs the
    /// training schedule. Any previously fitted or loaded state is
    /// replaced.
    pub fn fit<S: AsRef<str>>(
        &mut self,
        options: &TrainOptions,
        texts: &[S],
        labels: &[bool],
        validation: Option<(&[S], &[bool])>,
    ) -> Result<&TrainingHistory> {
        options.validate()?;
        if texts.is_empty() {
            return Err(KiriwakeError::InvalidInput(
                "training set is empty".to_string(),
            ));
        }
        if texts.len() != labels.len() {
            return Err(KiriwakeError::InvalidInput(format!(
                "{} texts but {} labels",
                texts.len(),
                labels.len()
            )));
        }
        if let Some((val_texts, val_labels)) = validation {
            if val_texts.len() != val_labels.len() {
                return Err(KiriwakeError::InvalidInput(format!(
                    "{} validation texts but {} validation labels",
                    val_texts.len(),
                    val_labels.len()
                )));
            }
        }

        let tokenizer = FrequencyTokenizer::fit(texts, options.num_words);
        info!(
            vocabulary = tokenizer.len(),
            capacity = options.num_words,
            "built vocabulary"
        );
        let train_set = encode_set(&tokenizer, texts, labels, options.sequence_length);
        let validation_set = validation
            .map(|(val_texts, val_labels)| {
                encode_set(&tokenizer, val_texts, val_labels, options.sequence_length)
            })
            .filter(|set| !set.is_empty());

        let pretrained = match &options.glove_path {
            Some(path) => {
                let vectors = WordVectors::load(path, options.embedding_dim)?;
                info!(
                    source = %path.display(),
                    words = vectors.len(),
                    "loaded pretrained vectors"
                );
                Some(pretrained_matrix(
                    &tokenizer,
                    &vectors,
                    options.num_words,
                    options.embedding_dim,
                    self.ctx.canonical_device(),
                )?)
            }
            None => None,
        };

        let dims = ModelDims {
            num_words: options.num_words,
            embedding_dim: options.embedding_dim,
            units: RECURRENT_UNITS,
        };
        let model = ClassifierModel::build(self.ctx.canonical_device(), dims, pretrained.as_ref())?;
        model.log_summary();

        let history = train::fit_model(
            &self.ctx,
            &model,
            &FitData {
                train: &train_set,
                validation: validation_set.as_ref(),
                epochs: options.epochs,
                batch_size: options.batch_size,
            },
        )?;

        self.tokenizer = Some(tokenizer);
        self.model = Some(model);
        Ok(self.history.insert(history))
    }

    /// Sigmoid probabilities of the positive class, one per input text.
    ///
    /// Texts are encoded with the fitted vocabulary at `sequence_length`
    /// and classified in `batch_size` groups.
    pub fn predict_proba<S: AsRef<str>>(
        &self,
        texts: &[S],
        sequence_length: usize,
        batch_size: usize,
    ) -> Result<Vec<f32>> {
        let (Some(tokenizer), Some(model)) = (&self.tokenizer, &self.model) else {
            return Err(KiriwakeError::NotFitted);
        };
        if sequence_length == 0 || batch_size == 0 {
            return Err(KiriwakeError::InvalidOptions(
                "sequence_length and batch_size must be at least 1".to_string(),
            ));
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let rows = tokenizer.encode(texts, sequence_length);
        let mut probs = Vec::with_capacity(rows.len());
        for chunk in rows.chunks(batch_size) {
            let ids = row_tensor(chunk, model.device())?;
            let logits = model.forward(&ids, false)?;
            probs.extend(probabilities(&logits)?);
        }
        Ok(probs)
    }

    /// Writes the weights and vocabulary as a directory pair.
    ///
    /// Without an explicit `path` the directory is named from the final
    /// training metrics under [`MODELS_DIR`]. A classifier with no
    /// training history, freshly constructed or restored by
    /// [`load`](Self::load), saves nothing and returns `Ok(None)`.
    pub fn save(&self, path: Option<&Path>) -> Result<Option<PathBuf>> {
        let metrics = self
            .history
            .as_ref()
            .and_then(TrainingHistory::final_metrics);
        let (Some(model), Some(tokenizer), Some(metrics)) = (&self.model, &self.tokenizer, metrics)
        else {
            warn!("nothing to save: no training history on this classifier");
            return Ok(None);
        };
        let dir = match path {
            Some(dir) => dir.to_path_buf(),
            None => Path::new(MODELS_DIR).join(metrics.artifact_stem()),
        };
        fs::create_dir_all(&dir)?;
        model.save_weights(&dir.join(MODEL_FILE))?;
        let encoded = serde_json::to_vec(tokenizer)?;
        fs::write(dir.join(TOKENIZER_FILE), encoded)?;
        info!(dir = %dir.display(), "saved classifier artifacts");
        Ok(Some(dir))
    }

    /// Restores a classifier from a directory written by
    /// [`save`](Self::save).
    ///
    /// The weights land on the run context's canonical device. Training
    /// history does not survive the round trip, so a restored classifier
    /// predicts but will not save again until it is refitted.
    pub fn load(&mut self, dir: &Path) -> Result<()> {
        let tokenizer_path = dir.join(TOKENIZER_FILE);
        if !tokenizer_path.exists() {
            return Err(KiriwakeError::ArtifactMissing {
                path: tokenizer_path,
            });
        }
        let model = ClassifierModel::load(&dir.join(MODEL_FILE), self.ctx.canonical_device())?;
        let bytes = fs::read(&tokenizer_path)?;
        let tokenizer: FrequencyTokenizer =
            serde_json::from_slice(&bytes).map_err(|e| KiriwakeError::ArtifactCorrupt {
                path: tokenizer_path,
                detail: e.to_string(),
            })?;
        info!(dir = %dir.display(), "restored classifier artifacts");
        self.tokenizer = Some(tokenizer);
        self.model = Some(model);
        self.history = None;
        Ok(())
    }

    /// Epoch history of the most recent [`fit`](Self::fit), if any.
    #[must_use]
    pub fn history(&self) -> Option<&TrainingHistory> {
        self.history.as_ref()
    }

    /// The run context this classifier places tensors with.
    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }
}

fn encode_set<S: AsRef<str>>(
    tokenizer: &FrequencyTokenizer,
    texts: &[S],
    labels: &[bool],
    sequence_length: usize,
) -> EncodedSet {
    EncodedSet {
        rows: tokenizer.encode(texts, sequence_length),
        targets: labels
            .iter()
            .map(|&label| if label { 1.0 } else { 0.0 })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;
    use crate::train::{BASE_LEARNING_RATE, EARLY_STOPPING_PATIENCE};

    fn cpu_ctx() -> RunContext {
        RunContext::from_devices(vec![Device::Cpu]).unwrap()
    }

    fn tiny_options() -> TrainOptions {
        TrainOptions {
            num_words: 60,
            sequence_length: 6,
            embedding_dim: 8,
            glove_path: None,
            epochs: 1,
            batch_size: 4,
        }
    }

    fn toy_corpus() -> (Vec<&'static str>, Vec<bool>) {
        let texts = vec![
            "the service was wonderful and friendly",
            "absolutely loved the food here",
            "great value and a lovely evening",
            "the staff went above and beyond",
            "delicious meal with perfect timing",
            "wonderful atmosphere and kind people",
            "best dinner we have had in years",
            "fresh ingredients and generous portions",
            "charming place with excellent desserts",
            "friendly welcome and quick seating",
            "the food was cold and bland",
            "terrible service ruined the night",
            "overpriced and badly cooked meal",
            "rude staff and dirty tables",
            "we waited an hour for nothing",
            "awful experience will not return",
            "stale bread and watery soup",
            "the worst dinner in recent memory",
            "noisy room and careless waiters",
            "disappointing food at silly prices",
        ];
        let labels = vec![
            true, true, true, true, true, true, true, true, true, true, false, false, false,
            false, false, false, false, false, false, false,
        ];
        (texts, labels)
    }

    #[test]
    fn fit_then_predict_yields_probabilities() {
        let (texts, labels) = toy_corpus();
        let mut classifier = TextClassifier::new(cpu_ctx());
        let history = classifier
            .fit(&tiny_options(), &texts, &labels, None)
            .unwrap();
        assert_eq!(history.len(), 1);

        let probs = classifier
            .predict_proba(&["lovely food", "terrible cold meal"], 6, 4)
            .unwrap();
        assert_eq!(probs.len(), 2);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn fit_with_validation_records_val_metrics() {
        let (texts, labels) = toy_corpus();
        let mut options = tiny_options();
        options.epochs = 2;
        let mut classifier = TextClassifier::new(cpu_ctx());
        let history = classifier
            .fit(
                &options,
                &texts[..16],
                &labels[..16],
                Some((&texts[16..], &labels[16..])),
            )
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.epochs().iter().all(|e| e.validation.is_some()));
    }

    #[test]
    fn fit_stops_early_when_validation_stalls() {
        let (texts, labels) = toy_corpus();
        // Inverted validation labels: fitting the training set only
        // worsens validation loss, so the monitors see a stall.
        let flipped: Vec<bool> = labels.iter().map(|&l| !l).collect();
        let mut options = tiny_options();
        options.epochs = 40;
        let mut classifier = TextClassifier::new(cpu_ctx());
        let history = classifier
            .fit(
                &options,
                &texts,
                &labels,
                Some((texts.as_slice(), flipped.as_slice())),
            )
            .unwrap();
        assert!(history.len() < options.epochs);
        assert!(history.len() > EARLY_STOPPING_PATIENCE);
        let last = history.epochs().last().unwrap();
        assert!(last.learning_rate < BASE_LEARNING_RATE);
    }

    #[test]
    fn replicated_cpu_fit_runs() {
        let (texts, labels) = toy_corpus();
        let ctx = RunContext::from_devices(vec![Device::Cpu, Device::Cpu]).unwrap();
        let mut classifier = TextClassifier::new(ctx);
        classifier
            .fit(&tiny_options(), &texts, &labels, None)
            .unwrap();
        let probs = classifier.predict_proba(&["great food"], 6, 2).unwrap();
        assert_eq!(probs.len(), 1);
    }

    #[test]
    fn save_load_round_trip_reproduces_predictions() {
        let (texts, labels) = toy_corpus();
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("toy");
        let mut classifier = TextClassifier::new(cpu_ctx());
        classifier
            .fit(&tiny_options(), &texts, &labels, None)
            .unwrap();
        let saved = classifier.save(Some(&artifact_dir)).unwrap();
        assert_eq!(saved.as_deref(), Some(artifact_dir.as_path()));

        let inputs = ["wonderful friendly staff", "awful cold food"];
        let want = classifier.predict_proba(&inputs, 6, 2).unwrap();

        let mut restored = TextClassifier::new(cpu_ctx());
        restored.load(&artifact_dir).unwrap();
        let got = restored.predict_proba(&inputs, 6, 2).unwrap();
        for (a, b) in want.iter().zip(&got) {
            assert!((a - b).abs() < 1e-6);
        }

        // History does not survive the round trip, so saving again is a
        // no-op.
        assert!(restored.save(None).unwrap().is_none());
    }

    #[test]
    fn save_without_fit_is_a_noop() {
        let classifier = TextClassifier::new(cpu_ctx());
        assert!(classifier.save(None).unwrap().is_none());
    }

    #[test]
    fn predict_before_fit_errors() {
        let classifier = TextClassifier::new(cpu_ctx());
        let err = classifier.predict_proba(&["anything"], 6, 2).unwrap_err();
        assert!(matches!(err, KiriwakeError::NotFitted));
    }

    #[test]
    fn fit_rejects_mismatched_labels() {
        let mut classifier = TextClassifier::new(cpu_ctx());
        let err = classifier
            .fit(&tiny_options(), &["one", "two"], &[true], None)
            .unwrap_err();
        assert!(matches!(err, KiriwakeError::InvalidInput(_)));
    }

    #[test]
    fn fit_rejects_zero_epochs() {
        let mut options = tiny_options();
        options.epochs = 0;
        let mut classifier = TextClassifier::new(cpu_ctx());
        let err = classifier
            .fit(&options, &["one"], &[true], None)
            .unwrap_err();
        assert!(matches!(err, KiriwakeError::InvalidOptions(_)));
    }

    #[test]
    fn load_from_empty_directory_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut classifier = TextClassifier::new(cpu_ctx());
        let err = classifier.load(dir.path()).unwrap_err();
        assert!(matches!(err, KiriwakeError::ArtifactMissing { .. }));
    }

    #[test]
    fn load_with_corrupt_tokenizer_errors() {
        let (texts, labels) = toy_corpus();
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("broken");
        let mut classifier = TextClassifier::new(cpu_ctx());
        classifier
            .fit(&tiny_options(), &texts, &labels, None)
            .unwrap();
        classifier.save(Some(&artifact_dir)).unwrap();
        fs::write(artifact_dir.join(TOKENIZER_FILE), b"not json").unwrap();

        let mut restored = TextClassifier::new(cpu_ctx());
        let err = restored.load(&artifact_dir).unwrap_err();
        assert!(matches!(err, KiriwakeError::ArtifactCorrupt { .. }));
    }
}
