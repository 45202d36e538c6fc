use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during Kiriwake core operations.
#[derive(Debug, Error)]
pub enum KiriwakeError {
    /// The device list environment variable is not set.
    #[error("no device list: environment variable {0} is not set")]
    MissingDeviceList(&'static str),

    /// A device designation could not be parsed.
    #[error("invalid device designation: {spec:?}")]
    InvalidDevice {
        /// The token that could not be parsed.
        spec: String,
    },

    /// Training options failed validation.
    #[error("invalid training options: {0}")]
    InvalidOptions(String),

    /// Training or prediction input is unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Prediction was requested before a model and tokenizer exist.
    #[error("no fitted model: call fit or load first")]
    NotFitted,

    /// An artifact file is absent from the model directory.
    #[error("artifact not found: {}", .path.display())]
    ArtifactMissing {
        /// The file that was expected to exist.
        path: PathBuf,
    },

    /// An artifact file exists but could not be decoded.
    #[error("artifact {} is corrupt: {detail}", .path.display())]
    ArtifactCorrupt {
        /// The file that failed to decode.
        path: PathBuf,
        /// What went wrong while decoding.
        detail: String,
    },

    /// A pretrained vector source line could not be parsed.
    #[error("bad vector line {line} in {}: {detail}", .path.display())]
    VectorSource {
        /// The vector source file.
        path: PathBuf,
        /// 1-based line number of the offending line.
        line: usize,
        /// What went wrong on that line.
        detail: String,
    },

    /// The vector cache blob could not be encoded or decoded.
    #[error("vector cache {}: {detail}", .path.display())]
    Cache {
        /// The cache blob path.
        path: PathBuf,
        /// What went wrong with the blob.
        detail: String,
    },

    /// Candle ML framework error.
    #[error("ML engine error: {0}")]
    Engine(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tokenizer artifact serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias for Kiriwake operations.
pub type Result<T> = std::result::Result<T, KiriwakeError>;
