//! # Kiriwake Trainer
//!
//! Dataset tooling around the Kiriwake classification engine: labeled
//! TSV loading, deterministic train/validation splitting, and the
//! `train` and `classify` command line binaries.

pub mod data;
