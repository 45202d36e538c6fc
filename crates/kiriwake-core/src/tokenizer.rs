//! # Frequency Tokenizer
//!
//! Word-level vocabulary fitted once on a training corpus. Words are ranked
//! by frequency and indexed from 1; index 0 is reserved for left-padding.
//! The vocabulary is capped so only indices below `num_words` are ever
//! assigned, and encoding silently drops anything outside it.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Characters treated as token boundaries, on top of whitespace.
const FILTER_CHARS: &str = "!\"#$%&()*+,-./:;<=>?@[\\]^_`{|}~\t\n";

/// Value used for left-padding; never assigned to a word.
pub const PADDING_ID: u32 = 0;

/// A fitted, immutable word-to-index vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyTokenizer {
    num_words: usize,
    word_index: HashMap<String, u32>,
}

impl FrequencyTokenizer {
    /// Builds the vocabulary from a corpus.
    ///
    /// Words are indexed from 1 by descending frequency, ties broken by
    /// first occurrence, and only indices strictly below `num_words` are
    /// kept. Everything else encodes to nothing.
    pub fn fit<S: AsRef<str>>(texts: &[S], num_words: usize) -> Self {
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        for text in texts {
            for word in split_words(text.as_ref()) {
                let first_seen = counts.len();
                let entry = counts.entry(word).or_insert((0, first_seen));
                entry.0 += 1;
            }
        }
        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by_key(|(_, (count, first_seen))| (Reverse(*count), *first_seen));
        let word_index = ranked
            .into_iter()
            .take(num_words.saturating_sub(1))
            .enumerate()
            .map(|(rank, (word, _))| (word, (rank + 1) as u32))
            .collect();
        Self {
            num_words,
            word_index,
        }
    }

    /// Encodes each text into exactly `max_len` token ids.
    ///
    /// Unknown words vanish. Short rows are left-padded with
    /// [`PADDING_ID`]; long rows keep their trailing `max_len` tokens.
    /// Never fails: empty or fully-unknown input encodes to all padding.
    #[must_use]
    pub fn encode<S: AsRef<str>>(&self, texts: &[S], max_len: usize) -> Vec<Vec<u32>> {
        texts
            .iter()
            .map(|text| self.encode_one(text.as_ref(), max_len))
            .collect()
    }

    fn encode_one(&self, text: &str, max_len: usize) -> Vec<u32> {
        let ids: Vec<u32> = split_words(text)
            .filter_map(|word| self.word_index.get(&word).copied())
            .collect();
        if ids.len() >= max_len {
            ids[ids.len() - max_len..].to_vec()
        } else {
            let mut row = vec![PADDING_ID; max_len - ids.len()];
            row.extend(ids);
            row
        }
    }

    /// The configured vocabulary capacity, padding slot included.
    #[must_use]
    pub fn num_words(&self) -> usize {
        self.num_words
    }

    /// Number of words actually indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.word_index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.word_index.is_empty()
    }

    /// The index assigned to a (normalized) word, if any.
    #[must_use]
    pub fn id(&self, word: &str) -> Option<u32> {
        self.word_index.get(word).copied()
    }

    /// Iterates over every indexed word and its id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.word_index.iter().map(|(word, id)| (word.as_str(), *id))
    }
}

/// Lowercases, maps filter characters to spaces, splits on whitespace.
fn split_words(text: &str) -> impl Iterator<Item = String> + '_ {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if FILTER_CHARS.contains(c) { ' ' } else { c })
        .collect();
    cleaned
        .split_whitespace()
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into_iter()
}
