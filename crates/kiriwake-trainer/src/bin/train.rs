//! Trains a binary text classifier from a labeled TSV file and saves
//! the resulting artifacts.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use kiriwake_core::{RunContext, TextClassifier, TrainOptions};
use kiriwake_trainer::data::LabeledDataset;
use tracing::info;

/// CLI arguments
#[derive(Parser)]
#[command(name = "train")]
#[command(about = "Train a binary text classifier on a label<TAB>text dataset")]
#[command(version)]
struct Cli {
    /// Labeled dataset, one `label<TAB>text` row per line
    data: PathBuf,

    /// Comma separated device list: CUDA ordinals or `cpu`
    #[arg(short, long, env = "KIRIWAKE_DEVICES")]
    devices: String,

    /// Vocabulary capacity, padding included
    #[arg(long, default_value_t = 20_000)]
    num_words: usize,

    /// Width texts are padded or truncated to
    #[arg(long, default_value_t = 100)]
    sequence_length: usize,

    /// Word vector width
    #[arg(long, default_value_t = 100)]
    embedding_dim: usize,

    /// Pretrained vector file in GloVe text format
    #[arg(short, long)]
    glove: Option<PathBuf>,

    /// Upper bound on training epochs
    #[arg(short, long, default_value_t = 100)]
    epochs: usize,

    /// Rows per optimizer step
    #[arg(short, long, default_value_t = 32)]
    batch_size: usize,

    /// Fraction of rows held out for validation
    #[arg(long, default_value_t = 0.1)]
    validation_fraction: f64,

    /// Shuffle seed for the validation split
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Artifact directory; defaults to a metrics-named directory under models/
    #[arg(short, long)]
    out: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run() {
        eprintln!("Training failed: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let ctx = RunContext::from_list(&cli.devices)?;

    let dataset = LabeledDataset::from_tsv(&cli.data)?;
    info!(rows = dataset.len(), "loaded dataset");
    let (train, validation) = dataset.split(cli.validation_fraction, cli.seed)?;

    let options = TrainOptions {
        num_words: cli.num_words,
        sequence_length: cli.sequence_length,
        embedding_dim: cli.embedding_dim,
        glove_path: cli.glove,
        epochs: cli.epochs,
        batch_size: cli.batch_size,
    };

    let mut classifier = TextClassifier::new(ctx);
    let validation_pair = (!validation.is_empty())
        .then_some((validation.texts.as_slice(), validation.labels.as_slice()));
    let history = classifier.fit(&options, &train.texts, &train.labels, validation_pair)?;

    if let Some(metrics) = history.final_metrics() {
        let pair = metrics.pair();
        info!(
            epochs = history.len(),
            loss = pair.loss,
            accuracy = pair.accuracy,
            "training finished"
        );
    }

    match classifier.save(cli.out.as_deref())? {
        Some(dir) => println!("{}", dir.display()),
        None => anyhow::bail!("training produced no artifacts"),
    }
    Ok(())
}
