//! Scores text with a saved classifier, printing one probability per
//! input line.

use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use kiriwake_core::{RunContext, TextClassifier};

/// CLI arguments
#[derive(Parser)]
#[command(name = "classify")]
#[command(about = "Score text with a trained classifier")]
#[command(version)]
struct Cli {
    /// Artifact directory written by the train binary
    model: PathBuf,

    /// Comma separated device list: CUDA ordinals or `cpu`
    #[arg(short, long, env = "KIRIWAKE_DEVICES")]
    devices: String,

    /// Width texts are padded or truncated to
    #[arg(long, default_value_t = 100)]
    sequence_length: usize,

    /// Rows per inference batch
    #[arg(short, long, default_value_t = 32)]
    batch_size: usize,

    /// Texts to score; read from stdin when omitted
    inputs: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run() {
        eprintln!("Classification failed: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let ctx = RunContext::from_list(&cli.devices)?;

    let mut classifier = TextClassifier::new(ctx);
    classifier.load(&cli.model)?;

    let texts = if cli.inputs.is_empty() {
        io::stdin().lock().lines().collect::<io::Result<Vec<_>>>()?
    } else {
        cli.inputs
    };

    let probs = classifier.predict_proba(&texts, cli.sequence_length, cli.batch_size)?;
    for (prob, text) in probs.iter().zip(&texts) {
        println!("{prob:.4}\t{text}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devices_required_without_flag_or_env() {
        // No other test in this binary reads the variable.
        unsafe { std::env::remove_var("KIRIWAKE_DEVICES") };
        let err = Cli::try_parse_from(["classify", "models/run"]).err().unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn inputs_follow_the_model_path() {
        let cli =
            Cli::try_parse_from(["classify", "models/run", "--devices", "cpu", "great food"])
                .unwrap();
        assert_eq!(cli.devices, "cpu");
        assert_eq!(cli.inputs, ["great food"]);
    }
}
