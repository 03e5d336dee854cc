//! Run settings
//!
//! Defaults cover a Bio_ClinicalBERT run over the i2b2 sentence files. A JSON
//! file may override any subset of fields; command-line flags are applied on
//! top of that.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::CsvColumns;
use crate::training::{DevicePreference, ScheduleKind};

/// Settings for training and evaluation runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Token sequence length; shorter inputs are padded, longer ones truncated
    pub max_len: usize,
    pub train_batch_size: usize,
    pub valid_batch_size: usize,
    pub epochs: usize,

    /// Where the trained classification head is written (safetensors)
    pub model_path: PathBuf,
    pub training_file: PathBuf,
    pub testing_file: PathBuf,

    /// HuggingFace model ID or local directory for the encoder and tokenizer
    pub model_id: String,

    /// Estimated sub-word tokens per word; sentences are cut to
    /// `max_len / len_to_sentence_load_factor` words before tokenizing
    pub len_to_sentence_load_factor: f64,

    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Fraction of total optimizer steps spent warming up
    pub warmup_ratio: f64,
    pub scheduler: ScheduleKind,
    pub dropout: f32,
    pub seed: u64,

    pub text_column: String,
    pub label_column: String,
    /// Fraction of the training file held out for validation
    pub validation_split: f64,

    /// Log a progress line every N batches (0 disables)
    pub logging_steps: usize,
    /// Directory for history and charts
    pub output_dir: PathBuf,
    pub device: DevicePreference,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_len: 128,
            train_batch_size: 8,
            valid_batch_size: 8,
            epochs: 10,
            model_path: PathBuf::from("Bio_ClinicalBERT.safetensors"),
            training_file: PathBuf::from("processed/class/i2b2_train.csv"),
            testing_file: PathBuf::from("processed/ner/i2b2_test.csv"),
            model_id: "emilyalsentzer/Bio_ClinicalBERT".to_string(),
            len_to_sentence_load_factor: 1.5,
            learning_rate: 3e-5,
            weight_decay: 0.01,
            warmup_ratio: 0.0,
            scheduler: ScheduleKind::Linear,
            dropout: 0.3,
            seed: 42,
            text_column: "text".to_string(),
            label_column: "label".to_string(),
            validation_split: 0.1,
            logging_steps: 50,
            output_dir: PathBuf::from("output"),
            device: DevicePreference::Auto,
        }
    }
}

impl Settings {
    /// Read settings from a JSON file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults, or the given file when present
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            bail!("epochs must be greater than zero");
        }
        if self.max_len == 0 {
            bail!("max_len must be greater than zero");
        }
        if self.train_batch_size == 0 || self.valid_batch_size == 0 {
            bail!("Batch sizes must be greater than zero");
        }
        if self.len_to_sentence_load_factor <= 0.0 {
            bail!(
                "len_to_sentence_load_factor must be positive, got {}",
                self.len_to_sentence_load_factor
            );
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            bail!("validation_split must be in [0, 1), got {}", self.validation_split);
        }
        if !(0.0..=1.0).contains(&self.warmup_ratio) {
            bail!("warmup_ratio must be in [0, 1], got {}", self.warmup_ratio);
        }
        if !(0.0..1.0).contains(&self.dropout) {
            bail!("dropout must be in [0, 1), got {}", self.dropout);
        }
        Ok(())
    }

    /// Word budget per sentence before tokenization
    pub fn max_words(&self) -> usize {
        ((self.max_len as f64 / self.len_to_sentence_load_factor).floor() as usize).max(1)
    }

    pub fn csv_columns(&self) -> CsvColumns {
        CsvColumns {
            text: self.text_column.clone(),
            label: self.label_column.clone(),
        }
    }

    /// Label encoder stored beside the head weights
    pub fn labels_path(&self) -> PathBuf {
        self.model_path.with_extension("labels.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.output_dir.join("history.json")
    }

    pub fn loss_curve_path(&self) -> PathBuf {
        self.output_dir.join("loss_curve.svg")
    }

    pub fn confusion_matrix_path(&self) -> PathBuf {
        self.output_dir.join("confusion_matrix.svg")
    }

    pub fn with_model_id(mut self, model_id: &str) -> Self {
        self.model_id = model_id.to_string();
        self
    }

    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = path.into();
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_sizes(mut self, train: usize, valid: usize) -> Self {
        self.train_batch_size = train;
        self.valid_batch_size = valid;
        self
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.device = device;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_len, 128);
        assert_eq!(settings.train_batch_size, 8);
        assert_eq!(settings.valid_batch_size, 8);
        assert_eq!(settings.epochs, 10);
        assert_eq!(settings.model_id, "emilyalsentzer/Bio_ClinicalBERT");
        assert_eq!(settings.training_file, PathBuf::from("processed/class/i2b2_train.csv"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_max_words() {
        assert_eq!(Settings::default().max_words(), 85);
        let tiny = Settings::default().with_max_len(1);
        assert_eq!(tiny.max_words(), 1);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"epochs": 2, "scheduler": "cosine", "device": "cpu"}"#).unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.epochs, 2);
        assert_eq!(settings.scheduler, ScheduleKind::Cosine);
        assert_eq!(settings.device, DevicePreference::Cpu);
        assert_eq!(settings.max_len, 128);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings::default().with_epochs(3).with_batch_sizes(4, 16);
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap(), settings);
    }

    #[test]
    fn test_invalid_values() {
        assert!(Settings::default().with_batch_sizes(0, 8).validate().is_err());
        let mut settings = Settings::default();
        settings.validation_split = 1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_epochs_rejected() {
        let err = Settings::default().with_epochs(0).validate().unwrap_err();
        assert!(err.to_string().contains("epochs"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"epochs": 0}"#).unwrap();
        assert!(Settings::from_file(&path).is_err());
    }

    #[test]
    fn test_encoder_and_device_setters() {
        let settings = Settings::default()
            .with_model_id("models/local-bert")
            .with_device(DevicePreference::Cpu);
        assert_eq!(settings.model_id, "models/local-bert");
        assert_eq!(settings.device, DevicePreference::Cpu);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_derived_paths() {
        let settings = Settings::default().with_output_dir("runs/a");
        assert_eq!(settings.labels_path(), PathBuf::from("Bio_ClinicalBERT.labels.json"));
        assert_eq!(settings.history_path(), PathBuf::from("runs/a/history.json"));
    }
}
