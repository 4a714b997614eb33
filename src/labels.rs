//! Label table.
//!
//! A `LabelSet` maps classification output indices to human-readable names.
//! Some models emit a block-aligned score vector that is longer than the number
//! of real classes, so the table is padded with empty entries until its length
//! is a multiple of `LABEL_BLOCK`. Index `i` of the scores always maps to entry
//! `i` of the table.

use anyhow::{Context, Result};
use std::path::Path;

/// Label tables are padded to a multiple of this many entries.
pub const LABEL_BLOCK: usize = 16;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    /// Load a newline-delimited label file.
    ///
    /// Empty lines are skipped; the remaining lines keep file order.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("labels unavailable: {}", path.display()))?;
        let set = Self::parse(&raw);
        log::info!(
            "loaded {} labels ({} after padding) from {}",
            set.real_len(),
            set.len(),
            path.display()
        );
        Ok(set)
    }

    /// Build a table from in-memory label text.
    pub fn parse(text: &str) -> Self {
        let mut labels: Vec<String> = text
            .lines()
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        let padded = labels.len().div_ceil(LABEL_BLOCK) * LABEL_BLOCK;
        labels.resize(padded, String::new());
        Self { labels }
    }

    /// Label at `index`, or `None` when the index is past the end of the table.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Table length including padding.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of non-padding entries.
    pub fn real_len(&self) -> usize {
        self.labels
            .iter()
            .rposition(|label| !label.is_empty())
            .map_or(0, |last| last + 1)
    }
}
