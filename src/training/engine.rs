//! Single-epoch training and evaluation passes
//!
//! Each pass consumes an iterator of host-side batches, moves every batch to
//! the model's device and averages the per-batch cross-entropy over the
//! number of batches seen. Accuracy is the fraction of correctly classified
//! records over the whole pass.

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

use super::loss::{batch_accuracy, cross_entropy, predictions};
use super::models::ClassifierModel;
use super::optimizer::{AdamW, LearningRateScheduler};
use crate::data::{ClassificationBatch, LabelEncoder};
use crate::evaluation::charts::render_confusion_matrix;
use crate::evaluation::metrics::{ClassificationReport, ConfusionMatrix};

/// Progress is logged every this many batches unless the caller asks otherwise
pub const DEFAULT_LOGGING_STEPS: usize = 50;

/// Averages over one pass
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EpochStats {
    /// Mean of per-batch losses
    pub loss: f64,
    /// Correct records / total records
    pub accuracy: f64,
    pub num_batches: usize,
    pub num_records: usize,
}

impl std::fmt::Display for EpochStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "loss {:.4} | accuracy {:.4} | {} batches | {} records",
            self.loss, self.accuracy, self.num_batches, self.num_records
        )
    }
}

#[derive(Debug, Default)]
struct EpochAccumulator {
    loss_sum: f64,
    batches: usize,
    correct: usize,
    records: usize,
}

impl EpochAccumulator {
    fn add(&mut self, loss: f64, correct: usize, records: usize) {
        self.loss_sum += loss;
        self.batches += 1;
        self.correct += correct;
        self.records += records;
    }

    fn mean_loss(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.loss_sum / self.batches as f64
        }
    }

    fn finish(self, phase: &str) -> EpochStats {
        if self.batches == 0 {
            tracing::warn!("{} pass saw no batches; reporting zero loss", phase);
            return EpochStats::default();
        }

        EpochStats {
            loss: self.mean_loss(),
            accuracy: if self.records == 0 {
                0.0
            } else {
                self.correct as f64 / self.records as f64
            },
            num_batches: self.batches,
            num_records: self.records,
        }
    }
}

/// Per-batch progress bar for one pass; a spinner when the batch count is unknown
fn batch_progress(len: Option<usize>, phase: &str) -> ProgressBar {
    let (pb, template) = match len {
        Some(len) => (
            ProgressBar::new(len as u64),
            "{msg:>10} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({eta})",
        ),
        None => (
            ProgressBar::new_spinner(),
            "{msg:>10} [{elapsed_precise}] {spinner:.green} {pos} batches",
        ),
    };
    if let Ok(style) = ProgressStyle::with_template(template) {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_message(phase.to_string());
    pb
}

/// Everything the reporting pass collects
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub y_true: Vec<u32>,
    pub y_pred: Vec<u32>,
    pub class_names: Vec<String>,
    pub confusion_matrix: ConfusionMatrix,
    pub report: ClassificationReport,
}

impl EvaluationReport {
    fn build(y_true: Vec<u32>, y_pred: Vec<u32>, labels: &LabelEncoder) -> Result<Self> {
        let class_names = labels.classes().to_vec();
        let confusion_matrix =
            ConfusionMatrix::from_predictions(&y_true, &y_pred, class_names.len())?;
        let report = ClassificationReport::from_confusion_matrix(&confusion_matrix, &class_names)?;

        Ok(Self {
            y_true,
            y_pred,
            class_names,
            confusion_matrix,
            report,
        })
    }

    /// Confusion matrix rendered as an SVG heatmap
    pub fn confusion_matrix_svg(&self) -> String {
        render_confusion_matrix(&self.confusion_matrix, &self.class_names)
    }
}

impl std::fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.report)
    }
}

/// One training pass: forward, loss, backward, optimizer step and scheduler
/// step for every batch.
pub fn train_epoch<I, M>(
    batches: I,
    model: &M,
    optimizer: &mut AdamW,
    scheduler: &mut LearningRateScheduler,
) -> Result<EpochStats>
where
    I: IntoIterator<Item = Result<ClassificationBatch>>,
    M: ClassifierModel + ?Sized,
{
    train_epoch_logged(batches, model, optimizer, scheduler, DEFAULT_LOGGING_STEPS)
}

/// [`train_epoch`] with a progress line every `logging_steps` batches (0 disables it)
pub fn train_epoch_logged<I, M>(
    batches: I,
    model: &M,
    optimizer: &mut AdamW,
    scheduler: &mut LearningRateScheduler,
    logging_steps: usize,
) -> Result<EpochStats>
where
    I: IntoIterator<Item = Result<ClassificationBatch>>,
    M: ClassifierModel + ?Sized,
{
    let start = Instant::now();
    let mut acc = EpochAccumulator::default();
    optimizer.set_learning_rate(scheduler.get_lr());

    let batches = batches.into_iter();
    let progress = batch_progress(batches.size_hint().1, "Training");

    for batch in batches {
        let batch = batch?.to_device(model.device())?;

        let logits = model.forward(
            &batch.input_ids,
            &batch.attention_mask,
            &batch.token_type_ids,
            true,
        )?;
        let loss = cross_entropy(&logits, &batch.targets)?;

        let grads = loss.backward()?;
        optimizer.step(&grads)?;
        optimizer.set_learning_rate(scheduler.step());

        let loss_value = loss.to_scalar::<f32>()? as f64;
        let (correct, records) = batch_accuracy(&logits, &batch.targets)?;
        acc.add(loss_value, correct, records);
        progress.inc(1);

        if logging_steps > 0 && acc.batches % logging_steps == 0 {
            progress.suspend(|| {
                tracing::info!(
                    "batch {} | loss {:.4} | running loss {:.4} | lr {:.2e}",
                    acc.batches,
                    loss_value,
                    acc.mean_loss(),
                    optimizer.learning_rate()
                )
            });
        }
    }

    progress.finish_and_clear();
    let stats = acc.finish("Training");
    tracing::debug!(
        "Training pass done in {:.1}s: {}",
        start.elapsed().as_secs_f64(),
        stats
    );
    Ok(stats)
}

/// One evaluation pass; parameters are left untouched
pub fn eval_epoch<I, M>(batches: I, model: &M) -> Result<EpochStats>
where
    I: IntoIterator<Item = Result<ClassificationBatch>>,
    M: ClassifierModel + ?Sized,
{
    let mut acc = EpochAccumulator::default();
    let batches = batches.into_iter();
    let progress = batch_progress(batches.size_hint().1, "Validation");

    for batch in batches {
        let batch = batch?.to_device(model.device())?;
        let logits = model.forward(
            &batch.input_ids,
            &batch.attention_mask,
            &batch.token_type_ids,
            false,
        )?;
        let loss = cross_entropy(&logits, &batch.targets)?.to_scalar::<f32>()? as f64;
        let (correct, records) = batch_accuracy(&logits, &batch.targets)?;
        acc.add(loss, correct, records);
        progress.inc(1);
    }

    progress.finish_and_clear();
    Ok(acc.finish("Evaluation"))
}

/// Evaluation pass that also collects every prediction, prints a
/// classification report and builds the confusion matrix.
pub fn eval_epoch_with_report<I, M>(
    batches: I,
    model: &M,
    labels: &LabelEncoder,
) -> Result<(EpochStats, EvaluationReport)>
where
    I: IntoIterator<Item = Result<ClassificationBatch>>,
    M: ClassifierModel + ?Sized,
{
    if labels.num_classes() != model.num_labels() {
        bail!(
            "Label encoder has {} classes but the model predicts {}",
            labels.num_classes(),
            model.num_labels()
        );
    }

    let mut acc = EpochAccumulator::default();
    let mut y_true = Vec::new();
    let mut y_pred = Vec::new();
    let batches = batches.into_iter();
    let progress = batch_progress(batches.size_hint().1, "Evaluation");

    for batch in batches {
        let batch = batch?;
        y_true.extend_from_slice(&batch.targets);

        let batch = batch.to_device(model.device())?;
        let logits = model.forward(
            &batch.input_ids,
            &batch.attention_mask,
            &batch.token_type_ids,
            false,
        )?;
        let loss = cross_entropy(&logits, &batch.targets)?.to_scalar::<f32>()? as f64;

        let preds = predictions(&logits)?.to_vec1::<u32>()?;
        let correct = preds
            .iter()
            .zip(&y_true[y_true.len() - preds.len()..])
            .filter(|(p, t)| p == t)
            .count();
        acc.add(loss, correct, preds.len());
        y_pred.extend(preds);
        progress.inc(1);
    }

    progress.finish_with_message(format!("{} records", y_true.len()));
    let stats = acc.finish("Evaluation");
    let report = EvaluationReport::build(y_true, y_pred, labels)?;

    println!("Classification Report:");
    println!("{}", report);

    Ok((stats, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ClassificationDataset, ClassificationRecord, DataLoader};
    use crate::training::models::{test_tokenizer, tiny_classifier, TokenizerWrapper};
    use crate::training::optimizer::{AdamWConfig, ScheduleKind};
    use candle_nn::VarMap;

    const VOCAB_SIZE: usize = 18;

    fn fixture() -> (ClassificationDataset, TokenizerWrapper, LabelEncoder) {
        let data = ClassificationDataset::new(vec![
            ClassificationRecord::new("patient denies chest pain", "problem"),
            ClassificationRecord::new("cbc was ordered", "test"),
            ClassificationRecord::new("started on aspirin", "treatment"),
            ClassificationRecord::new("x-ray shows no acute findings", "test"),
            ClassificationRecord::new("fever", "problem"),
        ]);
        let labels = LabelEncoder::fit(data.labels()).unwrap();
        (data, test_tokenizer(6), labels)
    }

    fn batches(
        data: &ClassificationDataset,
        tokenizer: &TokenizerWrapper,
        labels: &LabelEncoder,
    ) -> Vec<ClassificationBatch> {
        DataLoader::new(data, tokenizer, labels, 3)
            .unwrap()
            .iter()
            .collect::<Result<_>>()
            .unwrap()
    }

    fn head_weight(var_map: &VarMap) -> Vec<Vec<f32>> {
        let data = var_map.data().lock().unwrap();
        data["classifier.weight"].as_tensor().to_vec2::<f32>().unwrap()
    }

    fn manual_loss(model: &dyn ClassifierModel, batch: &ClassificationBatch) -> f64 {
        let b = batch.to_device(model.device()).unwrap();
        let logits = model
            .forward(&b.input_ids, &b.attention_mask, &b.token_type_ids, false)
            .unwrap();
        cross_entropy(&logits, &b.targets).unwrap().to_scalar::<f32>().unwrap() as f64
    }

    fn optimizer(var_map: &VarMap, lr: f64) -> AdamW {
        AdamW::new(
            var_map,
            AdamWConfig {
                lr,
                weight_decay: 0.0,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_eval_loss_is_mean_of_batch_losses() {
        let (data, tokenizer, labels) = fixture();
        let var_map = VarMap::new();
        let model = tiny_classifier(VOCAB_SIZE, labels.num_classes(), &var_map);
        let batches = batches(&data, &tokenizer, &labels);

        let expected: f64 =
            batches.iter().map(|b| manual_loss(&model, b)).sum::<f64>() / batches.len() as f64;

        let stats = eval_epoch(batches.into_iter().map(Ok), &model).unwrap();
        assert_eq!(stats.num_batches, 2);
        assert_eq!(stats.num_records, 5);
        assert!((stats.loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_train_loss_is_mean_of_batch_losses() {
        let (data, tokenizer, labels) = fixture();
        let var_map = VarMap::new();
        let model = tiny_classifier(VOCAB_SIZE, labels.num_classes(), &var_map);
        let batches = batches(&data, &tokenizer, &labels);

        let expected: f64 =
            batches.iter().map(|b| manual_loss(&model, b)).sum::<f64>() / batches.len() as f64;

        // A zero learning rate keeps the weights fixed across batches.
        let mut opt = optimizer(&var_map, 0.0);
        let mut scheduler = LearningRateScheduler::new(0.0, 0, 2, ScheduleKind::Linear);
        let stats = train_epoch(batches.into_iter().map(Ok), &model, &mut opt, &mut scheduler)
            .unwrap();

        assert!((stats.loss - expected).abs() < 1e-5);
        assert_eq!(opt.step_count(), 2);
        assert_eq!(scheduler.current_step(), 2);
    }

    #[test]
    fn test_training_updates_head() {
        let (data, tokenizer, labels) = fixture();
        let var_map = VarMap::new();
        let model = tiny_classifier(VOCAB_SIZE, labels.num_classes(), &var_map);
        let batches = batches(&data, &tokenizer, &labels);

        let before = head_weight(&var_map);
        let mut opt = optimizer(&var_map, 1e-2);
        let mut scheduler = LearningRateScheduler::new(1e-2, 0, 10, ScheduleKind::Linear);
        train_epoch(batches.into_iter().map(Ok), &model, &mut opt, &mut scheduler).unwrap();

        assert_ne!(before, head_weight(&var_map));
    }

    #[test]
    fn test_evaluation_leaves_head_unchanged() {
        let (data, tokenizer, labels) = fixture();
        let var_map = VarMap::new();
        let model = tiny_classifier(VOCAB_SIZE, labels.num_classes(), &var_map);
        let batches = batches(&data, &tokenizer, &labels);

        let before = head_weight(&var_map);
        eval_epoch(batches.clone().into_iter().map(Ok), &model).unwrap();
        eval_epoch_with_report(batches.into_iter().map(Ok), &model, &labels).unwrap();

        assert_eq!(before, head_weight(&var_map));
    }

    #[test]
    fn test_report_covers_every_record() {
        let (data, tokenizer, labels) = fixture();
        let var_map = VarMap::new();
        let model = tiny_classifier(VOCAB_SIZE, labels.num_classes(), &var_map);
        let batches = batches(&data, &tokenizer, &labels);

        let (stats, report) =
            eval_epoch_with_report(batches.into_iter().map(Ok), &model, &labels).unwrap();

        assert_eq!(report.y_true.len(), data.len());
        assert_eq!(report.y_pred.len(), data.len());
        assert_eq!(report.y_true, vec![0, 1, 2, 1, 0]);
        assert_eq!(report.confusion_matrix.total(), data.len());

        let correct = report
            .y_true
            .iter()
            .zip(&report.y_pred)
            .filter(|(t, p)| t == p)
            .count();
        assert!((stats.accuracy - correct as f64 / data.len() as f64).abs() < 1e-12);
        assert!((report.report.accuracy - stats.accuracy).abs() < 1e-12);
        assert!(report.confusion_matrix_svg().contains("Confusion Matrix"));
    }

    #[test]
    fn test_accuracy_counts_records_not_batches() {
        let (data, tokenizer, labels) = fixture();
        let var_map = VarMap::new();
        let model = tiny_classifier(VOCAB_SIZE, labels.num_classes(), &var_map);
        let batches = batches(&data, &tokenizer, &labels);

        let mut correct = 0;
        for batch in &batches {
            let b = batch.to_device(model.device()).unwrap();
            let logits = model
                .forward(&b.input_ids, &b.attention_mask, &b.token_type_ids, false)
                .unwrap();
            correct += batch_accuracy(&logits, &b.targets).unwrap().0;
        }

        let stats = eval_epoch(batches.into_iter().map(Ok), &model).unwrap();
        assert!((stats.accuracy - correct as f64 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_pass_reports_zero() {
        let var_map = VarMap::new();
        let model = tiny_classifier(VOCAB_SIZE, 2, &var_map);

        let stats = eval_epoch(std::iter::empty(), &model).unwrap();
        assert_eq!(stats, EpochStats::default());

        let mut opt = optimizer(&var_map, 1e-3);
        let mut scheduler = LearningRateScheduler::new(1e-3, 0, 1, ScheduleKind::Linear);
        let stats = train_epoch(std::iter::empty(), &model, &mut opt, &mut scheduler).unwrap();
        assert_eq!(stats.loss, 0.0);
        assert_eq!(opt.step_count(), 0);
    }

    #[test]
    fn test_batch_errors_propagate() {
        let var_map = VarMap::new();
        let model = tiny_classifier(VOCAB_SIZE, 2, &var_map);
        let failing: Vec<Result<ClassificationBatch>> = vec![Err(anyhow::anyhow!("broken batch"))];

        let err = eval_epoch(failing, &model).unwrap_err();
        assert!(err.to_string().contains("broken batch"));
    }

    #[test]
    fn test_label_count_mismatch() {
        let (data, tokenizer, labels) = fixture();
        let var_map = VarMap::new();
        let model = tiny_classifier(VOCAB_SIZE, 2, &var_map);
        let batches = batches(&data, &tokenizer, &labels);

        assert!(eval_epoch_with_report(batches.into_iter().map(Ok), &model, &labels).is_err());
    }

    #[test]
    fn test_progress_length_matches_loader() {
        let (data, tokenizer, labels) = fixture();
        let loader = DataLoader::new(&data, &tokenizer, &labels, 2).unwrap();

        let progress = batch_progress(loader.iter().size_hint().1, "Training");
        assert_eq!(progress.length(), Some(loader.len() as u64));
        assert_eq!(progress.length(), Some(3));

        let mut it = loader.iter();
        let unsized_batches = std::iter::from_fn(move || it.next());
        let spinner = batch_progress(unsized_batches.size_hint().1, "Evaluation");
        assert_eq!(spinner.length(), None);
    }

    #[test]
    fn test_logging_every_batch_still_trains() {
        let (data, tokenizer, labels) = fixture();
        let var_map = VarMap::new();
        let model = tiny_classifier(VOCAB_SIZE, labels.num_classes(), &var_map);
        let loader = DataLoader::new(&data, &tokenizer, &labels, 2).unwrap();

        let mut opt = optimizer(&var_map, 1e-3);
        let mut scheduler = LearningRateScheduler::new(1e-3, 0, loader.len(), ScheduleKind::Linear);
        let stats = train_epoch_logged(loader.iter(), &model, &mut opt, &mut scheduler, 1).unwrap();

        assert_eq!(stats.num_batches, loader.len());
        assert_eq!(stats.num_records, data.len());
        assert_eq!(opt.step_count(), loader.len());
    }
}
