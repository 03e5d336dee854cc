//! Multi-epoch training loop
//!
//! Runs a training pass and a validation pass per epoch, keeps the head
//! weights with the lowest validation loss, and records a history of every
//! epoch.

use anyhow::{Context, Result};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::engine::{eval_epoch, train_epoch_logged, EpochStats};
use super::models::ClassifierModel;
use super::optimizer::{AdamW, AdamWConfig, LearningRateScheduler};
use crate::config::Settings;
use crate::data::{DataLoader, LabelEncoder};
use crate::evaluation::charts::{render_loss_curve, write_svg};

/// Metrics for one finished epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
    /// Learning rate at the end of the epoch
    pub learning_rate: f64,
    pub seconds: f64,
}

impl std::fmt::Display for EpochRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Epoch {} | Train loss: {:.4} acc: {:.4} | Valid loss: {:.4} acc: {:.4} | LR: {:.2e} | {:.1}s",
            self.epoch,
            self.train_loss,
            self.train_accuracy,
            self.valid_loss,
            self.valid_accuracy,
            self.learning_rate,
            self.seconds
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn train_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.train_loss).collect()
    }

    pub fn valid_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.valid_loss).collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write history to {}", path.display()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read history from {}", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Outcome of a full run
#[derive(Debug, Clone)]
pub struct TrainingResult {
    pub history: TrainingHistory,
    /// Epoch (1-based) whose weights were kept
    pub best_epoch: usize,
    pub best_loss: f64,
    pub checkpoint_path: PathBuf,
}

/// Save classification head weights as safetensors
pub fn save_head(var_map: &VarMap, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    var_map
        .save(path)
        .with_context(|| format!("Failed to save checkpoint to {}", path.display()))?;
    tracing::debug!("Saved head weights to {:?}", path);
    Ok(())
}

/// Load head weights into an already-built model's `VarMap`
pub fn load_head(var_map: &mut VarMap, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    var_map
        .load(path)
        .with_context(|| format!("Failed to load checkpoint from {}", path.display()))?;
    tracing::info!("Loaded head weights from {:?}", path);
    Ok(())
}

pub struct Trainer<'s> {
    settings: &'s Settings,
}

impl<'s> Trainer<'s> {
    pub fn new(settings: &'s Settings) -> Self {
        Self { settings }
    }

    pub fn create_optimizer(&self, var_map: &VarMap) -> Result<AdamW> {
        AdamW::new(
            var_map,
            AdamWConfig {
                lr: self.settings.learning_rate,
                weight_decay: self.settings.weight_decay,
                ..Default::default()
            },
        )
    }

    pub fn create_scheduler(&self, total_steps: usize) -> LearningRateScheduler {
        let warmup_steps = (total_steps as f64 * self.settings.warmup_ratio) as usize;
        LearningRateScheduler::new(
            self.settings.learning_rate,
            warmup_steps,
            total_steps,
            self.settings.scheduler,
        )
    }

    /// Train for `settings.epochs` epochs.
    ///
    /// Head weights and the label encoder are written whenever the monitored
    /// loss improves. The validation loss is monitored unless the validation
    /// set is empty, in which case the training loss is used.
    pub fn fit<M: ClassifierModel + ?Sized>(
        &self,
        model: &M,
        var_map: &VarMap,
        train_loader: &DataLoader,
        valid_loader: &DataLoader,
        labels: &LabelEncoder,
    ) -> Result<TrainingResult> {
        let settings = self.settings;
        let total_steps = train_loader.len() * settings.epochs;

        tracing::info!("Starting training:");
        tracing::info!("  Training records: {}", train_loader.num_records());
        tracing::info!("  Validation records: {}", valid_loader.num_records());
        tracing::info!("  Classes: {}", labels.num_classes());
        tracing::info!("  Batch size: {}", settings.train_batch_size);
        tracing::info!("  Epochs: {}", settings.epochs);
        tracing::info!("  Total optimization steps: {}", total_steps);
        tracing::info!("  Learning rate: {} ({:?} schedule)", settings.learning_rate, settings.scheduler);

        let mut optimizer = self.create_optimizer(var_map)?;
        let mut scheduler = self.create_scheduler(total_steps);

        let mut history = TrainingHistory::default();
        let mut best_loss = f64::INFINITY;
        let mut best_epoch = 0;

        for epoch in 0..settings.epochs {
            let epoch_start = Instant::now();

            let train_stats = train_epoch_logged(
                train_loader.iter_epoch(epoch),
                model,
                &mut optimizer,
                &mut scheduler,
                settings.logging_steps,
            )?;
            let valid_stats = eval_epoch(valid_loader.iter(), model)?;

            let record = EpochRecord {
                epoch: epoch + 1,
                train_loss: train_stats.loss,
                train_accuracy: train_stats.accuracy,
                valid_loss: valid_stats.loss,
                valid_accuracy: valid_stats.accuracy,
                learning_rate: optimizer.learning_rate(),
                seconds: epoch_start.elapsed().as_secs_f64(),
            };
            tracing::info!("{}", record);

            let monitored = monitored_loss(&train_stats, &valid_stats);
            if monitored < best_loss {
                best_loss = monitored;
                best_epoch = epoch + 1;
                save_head(var_map, &settings.model_path)?;
                labels.save(settings.labels_path())?;
                tracing::info!(
                    "  New best loss {:.4}, saved head to {:?}",
                    best_loss,
                    settings.model_path
                );
            }

            history.push(record);
        }

        history.save(settings.history_path())?;
        write_svg(
            &render_loss_curve(&history.train_losses(), &history.valid_losses()),
            &settings.loss_curve_path(),
        )?;
        tracing::info!("Wrote history and loss curve to {:?}", settings.output_dir);

        Ok(TrainingResult {
            history,
            best_epoch,
            best_loss,
            checkpoint_path: settings.model_path.clone(),
        })
    }
}

fn monitored_loss(train: &EpochStats, valid: &EpochStats) -> f64 {
    if valid.num_batches > 0 {
        valid.loss
    } else {
        train.loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ClassificationDataset, ClassificationRecord};
    use crate::training::models::{test_tokenizer, tiny_classifier};

    fn settings(dir: &Path) -> Settings {
        Settings::default()
            .with_epochs(2)
            .with_batch_sizes(2, 2)
            .with_learning_rate(1e-2)
            .with_model_path(dir.join("head.safetensors"))
            .with_output_dir(dir.join("out"))
    }

    fn dataset() -> ClassificationDataset {
        ClassificationDataset::new(vec![
            ClassificationRecord::new("patient denies chest pain", "problem"),
            ClassificationRecord::new("cbc was ordered", "test"),
            ClassificationRecord::new("fever", "problem"),
            ClassificationRecord::new("x-ray shows no acute findings", "test"),
        ])
    }

    #[test]
    fn test_fit_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());

        let data = dataset();
        let tokenizer = test_tokenizer(6);
        let labels = LabelEncoder::fit(data.labels()).unwrap();
        let var_map = VarMap::new();
        let model = tiny_classifier(18, labels.num_classes(), &var_map);

        let train = DataLoader::new(&data, &tokenizer, &labels, 2).unwrap().with_shuffle(1);
        let valid = DataLoader::new(&data, &tokenizer, &labels, 2).unwrap();

        let result = Trainer::new(&settings)
            .fit(&model, &var_map, &train, &valid, &labels)
            .unwrap();

        assert_eq!(result.history.epochs.len(), 2);
        assert!((1..=2).contains(&result.best_epoch));
        assert!(settings.model_path.exists());
        assert!(settings.labels_path().exists());
        assert!(settings.loss_curve_path().exists());

        let history = TrainingHistory::load(settings.history_path()).unwrap();
        assert_eq!(history, result.history);
    }

    #[test]
    fn test_history_reloads_exact_floats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let mut history = TrainingHistory::default();
        history.push(EpochRecord {
            epoch: 1,
            train_loss: 0.9249574244022369,
            train_accuracy: 1.0 / 3.0,
            valid_loss: 0.6931471805599453,
            valid_accuracy: 0.1 + 0.2,
            learning_rate: 2.9999999999999997e-5,
            seconds: 0.017393112,
        });
        history.save(&path).unwrap();

        let reloaded = TrainingHistory::load(&path).unwrap();
        assert_eq!(reloaded, history);
        assert_eq!(reloaded.epochs[0].train_loss.to_bits(), 0.9249574244022369f64.to_bits());
    }

    #[test]
    fn test_head_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("head.safetensors");

        let var_map = VarMap::new();
        let _model = tiny_classifier(18, 3, &var_map);
        save_head(&var_map, &path).unwrap();

        let mut restored = VarMap::new();
        let _other = tiny_classifier(18, 3, &restored);
        load_head(&mut restored, &path).unwrap();

        let weight = |vm: &VarMap| {
            vm.data().lock().unwrap()["classifier.weight"]
                .as_tensor()
                .to_vec2::<f32>()
                .unwrap()
        };
        assert_eq!(weight(&var_map), weight(&restored));
    }

    #[test]
    fn test_scheduler_warmup_from_ratio() {
        let mut settings = Settings::default();
        settings.warmup_ratio = 0.25;
        let scheduler = Trainer::new(&settings).create_scheduler(100);
        assert_eq!(scheduler.get_lr(), 0.0);
    }

    #[test]
    fn test_empty_validation_monitors_training_loss() {
        let train = EpochStats {
            loss: 0.7,
            accuracy: 0.5,
            num_batches: 3,
            num_records: 6,
        };
        assert_eq!(monitored_loss(&train, &EpochStats::default()), 0.7);
    }
}
