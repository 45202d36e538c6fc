//! Labeled text datasets: TSV loading and deterministic splitting.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};
use oorandom::Rand64;

/// Parallel rows of text and binary labels.
#[derive(Debug, Clone, Default)]
pub struct LabeledDataset {
    pub texts: Vec<String>,
    pub labels: Vec<bool>,
}

impl LabeledDataset {
    /// Reads a `label<TAB>text` file, one row per line.
    ///
    /// Labels must be `0` or `1`. Blank lines and lines starting with
    /// `#` are skipped; anything else malformed fails with its line
    /// number.
    pub fn from_tsv(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut dataset = Self::default();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("reading {}", path.display()))?;
            let row = line.trim();
            if row.is_empty() || row.starts_with('#') {
                continue;
            }
            let Some((label, text)) = row.split_once('\t') else {
                bail!("{}:{}: expected label<TAB>text", path.display(), idx + 1);
            };
            let label = match label.trim() {
                "0" => false,
                "1" => true,
                other => bail!(
                    "{}:{}: label must be 0 or 1, got {other:?}",
                    path.display(),
                    idx + 1
                ),
            };
            dataset.labels.push(label);
            dataset.texts.push(text.to_string());
        }
        if dataset.is_empty() {
            bail!("{}: no labeled rows", path.display());
        }
        Ok(dataset)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Shuffles the rows with `seed` and splits off a validation
    /// fraction, returning `(train, validation)`.
    ///
    /// A fraction of zero yields an empty validation set. At least one
    /// row always stays in the training half.
    pub fn split(self, validation_fraction: f64, seed: u64) -> Result<(Self, Self)> {
        if !(0.0..1.0).contains(&validation_fraction) {
            bail!("validation fraction must be in [0, 1), got {validation_fraction}");
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        let mut rng = Rand64::new(u128::from(seed));
        for i in (1..order.len()).rev() {
            let j = rng.rand_range(0..i as u64 + 1) as usize;
            order.swap(i, j);
        }
        let val_len = (self.len() as f64 * validation_fraction).round() as usize;
        let val_len = val_len.min(self.len().saturating_sub(1));
        let (val_idx, train_idx) = order.split_at(val_len);
        Ok((self.subset(train_idx), self.subset(val_idx)))
    }

    fn subset(&self, indices: &[usize]) -> Self {
        Self {
            texts: indices.iter().map(|&i| self.texts[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_tsv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn parses_labeled_rows() {
        let file = write_tsv("1\tgreat stuff\n0\tnot so great\n\n# comment\n1\tmore praise\n");
        let dataset = LabeledDataset::from_tsv(file.path()).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.labels, vec![true, false, true]);
        assert_eq!(dataset.texts[1], "not so great");
    }

    #[test]
    fn reports_bad_label_with_line_number() {
        let file = write_tsv("1\tfine\nmaybe\talso fine\n");
        let err = LabeledDataset::from_tsv(file.path()).unwrap_err();
        assert!(err.to_string().contains(":2:"), "{err}");
    }

    #[test]
    fn reports_missing_tab() {
        let file = write_tsv("1 no tab here\n");
        let err = LabeledDataset::from_tsv(file.path()).unwrap_err();
        assert!(err.to_string().contains("label<TAB>text"), "{err}");
    }

    #[test]
    fn rejects_empty_files() {
        let file = write_tsv("# only a comment\n");
        assert!(LabeledDataset::from_tsv(file.path()).is_err());
    }

    #[test]
    fn split_is_deterministic_and_exhaustive() {
        let dataset = LabeledDataset {
            texts: (0..10).map(|i| format!("text {i}")).collect(),
            labels: (0..10).map(|i| i % 2 == 0).collect(),
        };
        let (train_a, val_a) = dataset.clone().split(0.3, 7).unwrap();
        let (train_b, val_b) = dataset.split(0.3, 7).unwrap();
        assert_eq!(train_a.len(), 7);
        assert_eq!(val_a.len(), 3);
        assert_eq!(train_a.texts, train_b.texts);
        assert_eq!(val_a.texts, val_b.texts);

        let mut all: Vec<&str> = train_a
            .texts
            .iter()
            .chain(&val_a.texts)
            .map(String::as_str)
            .collect();
        all.sort_unstable();
        assert_eq!(all.len(), 10);
        all.dedup();
        assert_eq!(all.len(), 10);
    }

    #[test]
    fn split_keeps_at_least_one_training_row() {
        let dataset = LabeledDataset {
            texts: vec!["a".to_string(), "b".to_string()],
            labels: vec![true, false],
        };
        let (train, val) = dataset.split(0.9, 1).unwrap();
        assert_eq!(train.len(), 1);
        assert_eq!(val.len(), 1);
    }

    #[test]
    fn split_rejects_full_fraction() {
        let dataset = LabeledDataset {
            texts: vec!["a".to_string()],
            labels: vec![true],
        };
        assert!(dataset.split(1.0, 1).is_err());
    }
}
