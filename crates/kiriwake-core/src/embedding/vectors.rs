//! # Pretrained Word Vectors
//!
//! Loads whitespace-delimited embedding tables (GloVe-style text) and keeps
//! a parsed binary blob keyed by the source file name, so repeat runs skip
//! the text parse. The blob is trusted by name alone; replacing the source
//! under the same name does not invalidate it.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{KiriwakeError, Result};

/// Directory the parsed-table blobs live under.
pub const VECTOR_CACHE_DIR: &str = "cache";

/// A word-to-vector table of fixed dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordVectors {
    dim: usize,
    table: HashMap<String, Vec<f32>>,
}

impl WordVectors {
    /// Loads a table for `dim`-wide vectors, going through the default
    /// cache root ([`VECTOR_CACHE_DIR`]).
    pub fn load(source: &Path, dim: usize) -> Result<Self> {
        Self::load_with_cache_root(source, dim, Path::new(VECTOR_CACHE_DIR))
    }

    /// Loads a table, preferring a cached blob under `cache_root`.
    ///
    /// When the blob exists it is decoded, and a decode failure or a
    /// dimension mismatch is an error. Otherwise the text source is parsed
    /// and the blob written for next time.
    pub fn load_with_cache_root(source: &Path, dim: usize, cache_root: &Path) -> Result<Self> {
        let blob = blob_path(source, cache_root);
        if blob.exists() {
            let cached = Self::read_blob(&blob)?;
            if cached.dim != dim {
                return Err(KiriwakeError::Cache {
                    path: blob,
                    detail: format!("built for dimension {}, requested {dim}", cached.dim),
                });
            }
            info!(words = cached.table.len(), blob = %blob.display(), "loaded vector table from cache");
            return Ok(cached);
        }
        let parsed = Self::parse_text(source, dim)?;
        parsed.write_blob(&blob)?;
        Ok(parsed)
    }

    /// Parses a whitespace text table: the trailing `dim` tokens of each
    /// line are the vector, everything before them joins into the word.
    ///
    /// Multi-token keys such as `"New York"` come through verbatim. Blank
    /// lines are skipped; anything else malformed is an error carrying its
    /// line number.
    pub fn parse_text(source: &Path, dim: usize) -> Result<Self> {
        if !source.exists() {
            return Err(KiriwakeError::ArtifactMissing {
                path: source.to_path_buf(),
            });
        }
        let reader = BufReader::new(File::open(source)?);
        let mut table = HashMap::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            if tokens.len() <= dim {
                return Err(KiriwakeError::VectorSource {
                    path: source.to_path_buf(),
                    line: idx + 1,
                    detail: format!("expected a word plus {dim} values, got {} tokens", tokens.len()),
                });
            }
            let split = tokens.len() - dim;
            let mut vector = Vec::with_capacity(dim);
            for token in &tokens[split..] {
                let value: f32 = token.parse().map_err(|_| KiriwakeError::VectorSource {
                    path: source.to_path_buf(),
                    line: idx + 1,
                    detail: format!("not a number: {token:?}"),
                })?;
                vector.push(value);
            }
            table.insert(tokens[..split].join(" "), vector);
        }
        info!(words = table.len(), dim, source = %source.display(), "parsed vector table");
        Ok(Self { dim, table })
    }

    /// Builds a table directly from word/vector pairs.
    pub fn from_table(dim: usize, table: HashMap<String, Vec<f32>>) -> Result<Self> {
        if let Some((word, vector)) = table.iter().find(|(_, v)| v.len() != dim) {
            return Err(KiriwakeError::InvalidInput(format!(
                "vector for {word:?} has {} values, expected {dim}",
                vector.len()
            )));
        }
        Ok(Self { dim, table })
    }

    /// The vector stored for a word, if any.
    #[must_use]
    pub fn get(&self, word: &str) -> Option<&[f32]> {
        self.table.get(word).map(Vec::as_slice)
    }

    /// Vector width.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored words.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn read_blob(blob: &Path) -> Result<Self> {
        let bytes = fs::read(blob)?;
        let cached: Self = bincode::deserialize(&bytes).map_err(|e| KiriwakeError::Cache {
            path: blob.to_path_buf(),
            detail: e.to_string(),
        })?;
        // A decodable blob can still disagree with its own recorded dimension.
        if let Some((word, vector)) = cached.table.iter().find(|(_, v)| v.len() != cached.dim) {
            return Err(KiriwakeError::Cache {
                path: blob.to_path_buf(),
                detail: format!(
                    "vector for {word:?} has {} values, blob records dimension {}",
                    vector.len(),
                    cached.dim
                ),
            });
        }
        Ok(cached)
    }

    fn write_blob(&self, blob: &Path) -> Result<()> {
        if let Some(parent) = blob.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = bincode::serialize(self).map_err(|e| KiriwakeError::Cache {
            path: blob.to_path_buf(),
            detail: e.to_string(),
        })?;
        fs::write(blob, bytes)?;
        info!(blob = %blob.display(), "wrote vector table cache");
        Ok(())
    }
}

/// Where the parsed blob for `source` lives under `cache_root`.
fn blob_path(source: &Path, cache_root: &Path) -> PathBuf {
    let base = source
        .file_name()
        .map_or_else(|| "vectors".to_string(), |n| n.to_string_lossy().into_owned());
    cache_root.join(format!("{base}.bin"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_source(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_simple_and_multi_token_keys() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(
            dir.path(),
            "glove.txt",
            "the 0.1 0.2\nNew York 0.5 0.6\n\nof 0.3 0.4\n",
        );
        let vectors = WordVectors::parse_text(&source, 2).unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors.get("the"), Some([0.1, 0.2].as_slice()));
        assert_eq!(vectors.get("New York"), Some([0.5, 0.6].as_slice()));
        assert_eq!(vectors.get("of"), Some([0.3, 0.4].as_slice()));
    }

    #[test]
    fn short_line_is_an_error_with_its_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "glove.txt", "the 0.1 0.2\nbroken 0.9\n");
        let err = WordVectors::parse_text(&source, 2).unwrap_err();
        match err {
            KiriwakeError::VectorSource { line, .. } => assert_eq!(line, 2),
            other => panic!("expected a vector source error, got {other}"),
        }
    }

    #[test]
    fn non_numeric_value_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "glove.txt", "the 0.1 oops\n");
        let err = WordVectors::parse_text(&source, 2).unwrap_err();
        assert!(matches!(err, KiriwakeError::VectorSource { line: 1, .. }));
    }

    #[test]
    fn missing_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = WordVectors::parse_text(&dir.path().join("absent.txt"), 2).unwrap_err();
        assert!(matches!(err, KiriwakeError::ArtifactMissing { .. }));
    }

    #[test]
    fn blob_is_written_and_trusted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        let source = write_source(dir.path(), "glove.txt", "the 0.1 0.2\n");

        let first = WordVectors::load_with_cache_root(&source, 2, &cache).unwrap();
        assert_eq!(first.len(), 1);
        assert!(cache.join("glove.txt.bin").exists());

        // Grow the source under the same name: the stale blob still wins.
        write_source(dir.path(), "glove.txt", "the 0.1 0.2\nof 0.3 0.4\n");
        let second = WordVectors::load_with_cache_root(&source, 2, &cache).unwrap();
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn corrupt_blob_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        let source = write_source(dir.path(), "glove.txt", "the 0.1 0.2\n");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("glove.txt.bin"), b"not a blob").unwrap();

        let err = WordVectors::load_with_cache_root(&source, 2, &cache).unwrap_err();
        assert!(matches!(err, KiriwakeError::Cache { .. }));
    }

    #[test]
    fn inconsistent_blob_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        fs::create_dir_all(&cache).unwrap();
        let mut table = HashMap::new();
        table.insert("alpha".to_string(), vec![0.1, 0.2]);
        let bad = WordVectors { dim: 3, table };
        fs::write(cache.join("glove.txt.bin"), bincode::serialize(&bad).unwrap()).unwrap();

        let source = dir.path().join("glove.txt");
        let err = WordVectors::load_with_cache_root(&source, 3, &cache).unwrap_err();
        match err {
            KiriwakeError::Cache { detail, .. } => assert!(detail.contains("alpha")),
            other => panic!("expected a cache error, got {other}"),
        }
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        let source = write_source(dir.path(), "glove.txt", "the 0.1 0.2\n");
        WordVectors::load_with_cache_root(&source, 2, &cache).unwrap();

        let err = WordVectors::load_with_cache_root(&source, 3, &cache).unwrap_err();
        match err {
            KiriwakeError::Cache { detail, .. } => assert!(detail.contains("dimension")),
            other => panic!("expected a cache error, got {other}"),
        }
    }

    #[test]
    fn from_table_checks_widths() {
        let mut table = HashMap::new();
        table.insert("a".to_string(), vec![1.0, 2.0]);
        assert!(WordVectors::from_table(2, table.clone()).is_ok());
        table.insert("b".to_string(), vec![1.0]);
        assert!(WordVectors::from_table(2, table).is_err());
    }
}
