//! Labelled sentence datasets
//!
//! Records are read from CSV files with one sentence per row and a
//! categorical label column.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One labelled sentence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub text: String,
    pub label: String,
}

impl ClassificationRecord {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }
}

/// Column names to read from a CSV file
#[derive(Debug, Clone)]
pub struct CsvColumns {
    pub text: String,
    pub label: String,
}

impl Default for CsvColumns {
    fn default() -> Self {
        Self {
            text: "text".to_string(),
            label: "label".to_string(),
        }
    }
}

/// An in-memory list of labelled sentences
#[derive(Debug, Clone, Default)]
pub struct ClassificationDataset {
    records: Vec<ClassificationRecord>,
}

impl ClassificationDataset {
    pub fn new(records: Vec<ClassificationRecord>) -> Self {
        Self { records }
    }

    /// Load a dataset from a CSV file with a header row.
    ///
    /// Rows with an empty text cell are skipped.
    pub fn from_csv(path: impl AsRef<Path>, columns: &CsvColumns) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open CSV file: {:?}", path))?;

        let headers = reader.headers()?.clone();
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| anyhow!("CSV {:?} has no '{}' column (found {:?})", path, name, headers))
        };
        let text_idx = position(&columns.text)?;
        let label_idx = position(&columns.label)?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (row_num, result) in reader.records().enumerate() {
            let record =
                result.with_context(|| format!("Failed to read CSV row {}", row_num + 1))?;

            let text = record.get(text_idx).unwrap_or("").trim();
            if text.is_empty() {
                skipped += 1;
                continue;
            }

            let label = record
                .get(label_idx)
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .ok_or_else(|| anyhow!("Missing label at row {}", row_num + 1))?;

            records.push(ClassificationRecord::new(text, label));
        }

        if skipped > 0 {
            tracing::warn!("Skipped {} rows with empty text in {:?}", skipped, path);
        }
        tracing::info!("Loaded {} records from {:?}", records.len(), path);

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ClassificationRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[ClassificationRecord] {
        &self.records
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.label.as_str())
    }

    /// Shuffle in place with a fixed seed
    pub fn shuffle(&mut self, seed: u64) {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        self.records.shuffle(&mut rng);
    }

    /// Split into `(train, valid)` keeping the first `train_ratio` of records for training
    pub fn split(self, train_ratio: f64) -> (Self, Self) {
        let ratio = train_ratio.clamp(0.0, 1.0);
        let split_idx = (self.records.len() as f64 * ratio).round() as usize;
        let mut train = self.records;
        let valid = train.split_off(split_idx.min(train.len()));
        (Self { records: train }, Self { records: valid })
    }

    pub fn stats(&self) -> DatasetStats {
        let mut label_counts = BTreeMap::new();
        for record in &self.records {
            *label_counts.entry(record.label.clone()).or_insert(0usize) += 1;
        }

        let total_words: usize = self
            .records
            .iter()
            .map(|r| r.text.split_whitespace().count())
            .sum();

        DatasetStats {
            total_records: self.records.len(),
            avg_words: if self.records.is_empty() {
                0.0
            } else {
                total_words as f64 / self.records.len() as f64
            },
            label_counts,
        }
    }
}

/// Summary of a dataset
#[derive(Debug, Clone)]
pub struct DatasetStats {
    pub total_records: usize,
    pub avg_words: f64,
    pub label_counts: BTreeMap<String, usize>,
}

impl std::fmt::Display for DatasetStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Dataset: {} records, {} labels, {:.1} avg words",
            self.total_records,
            self.label_counts.len(),
            self.avg_words
        )?;
        for (label, count) in &self.label_counts {
            write!(f, "\n  {}: {}", label, count)?;
        }
        Ok(())
    }
}

/// Keep at most `max_words` whitespace-separated words of `text`
pub fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}
