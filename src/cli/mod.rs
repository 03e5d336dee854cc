//! Command-line interface
//!
//! Provides CLI commands for train, evaluate, predict and devices.

use anyhow::{bail, Context, Result};
use candle_core::{Device, D};
use candle_nn::VarMap;

use crate::config::Settings;
use crate::data::dataset::truncate_words;
use crate::data::{ClassificationDataset, DataLoader, LabelEncoder};
use crate::evaluation::charts::write_svg;
use crate::training::device::{device_label, print_available_devices};
use crate::training::hub::HubModelConfig;
use crate::training::{
    eval_epoch_with_report, load_head, select_device, BertClassifier, ClassifierModel,
    ModelLoader, TokenizerWrapper, Trainer,
};

/// Encoder, tokenizer and device for a run
struct LoadedModel {
    model: BertClassifier,
    tokenizer: TokenizerWrapper,
    device: Device,
}

fn load_model(settings: &Settings, num_labels: usize, var_map: &VarMap) -> Result<LoadedModel> {
    let device = select_device(settings.device)?;
    tracing::info!("  Device: {}", device_label(&device));

    let loader = ModelLoader::new()?;
    let model_path = loader.load_model_path(&settings.model_id)?;

    let config = HubModelConfig::from_file(&model_path.config_file)?;
    config.validate_bert_compatibility(settings.max_len)?;

    let tokenizer = TokenizerWrapper::from_model_path(&model_path, settings.max_len)?;
    let model = BertClassifier::from_model_path(
        &model_path,
        num_labels,
        settings.dropout,
        var_map,
        &device,
    )?;

    Ok(LoadedModel {
        model,
        tokenizer,
        device,
    })
}

/// Restore a trained head and the label encoder saved beside it
fn load_trained(settings: &Settings) -> Result<(LoadedModel, LabelEncoder)> {
    let labels = LabelEncoder::load(settings.labels_path()).with_context(|| {
        format!(
            "No label encoder next to {:?}; run `train` first",
            settings.model_path
        )
    })?;

    let mut var_map = VarMap::new();
    let loaded = load_model(settings, labels.num_classes(), &var_map)?;
    load_head(&mut var_map, &settings.model_path)?;

    Ok((loaded, labels))
}

/// Execute the train command
pub fn train(settings: Settings) -> Result<()> {
    settings.validate()?;
    tracing::info!("Starting training run");
    tracing::info!("  Model: {}", settings.model_id);
    tracing::info!("  Training file: {:?}", settings.training_file);

    let mut dataset = ClassificationDataset::from_csv(&settings.training_file, &settings.csv_columns())?;
    if dataset.is_empty() {
        bail!("No records in {:?}", settings.training_file);
    }
    tracing::info!("{}", dataset.stats());

    // Fit on every record so both splits share one index space.
    let labels = LabelEncoder::fit(dataset.labels())?;
    tracing::info!("  Classes: {:?}", labels.classes());

    dataset.shuffle(settings.seed);
    let (train_set, valid_set) = dataset.split(1.0 - settings.validation_split);
    tracing::info!(
        "  Split: {} training / {} validation records",
        train_set.len(),
        valid_set.len()
    );

    let var_map = VarMap::new();
    let loaded = load_model(&settings, labels.num_classes(), &var_map)?;

    let max_words = settings.max_words();
    let train_loader = DataLoader::new(&train_set, &loaded.tokenizer, &labels, settings.train_batch_size)?
        .with_max_words(max_words)
        .with_shuffle(settings.seed);
    let valid_loader = DataLoader::new(&valid_set, &loaded.tokenizer, &labels, settings.valid_batch_size)?
        .with_max_words(max_words);

    let result = Trainer::new(&settings).fit(
        &loaded.model,
        &var_map,
        &train_loader,
        &valid_loader,
        &labels,
    )?;

    println!("\nTraining Summary:");
    println!("  Epochs: {}", result.history.epochs.len());
    println!("  Best epoch: {} (loss {:.4})", result.best_epoch, result.best_loss);
    println!("  Head weights: {:?}", result.checkpoint_path);
    println!("  History: {:?}", settings.history_path());
    println!("  Loss curve: {:?}", settings.loss_curve_path());

    Ok(())
}

/// Execute the evaluate command
pub fn evaluate(settings: Settings) -> Result<()> {
    settings.validate()?;
    tracing::info!("Evaluating {:?} on {:?}", settings.model_path, settings.testing_file);

    let (loaded, labels) = load_trained(&settings)?;

    let dataset = ClassificationDataset::from_csv(&settings.testing_file, &settings.csv_columns())?;
    tracing::info!("{}", dataset.stats());

    let loader = DataLoader::new(&dataset, &loaded.tokenizer, &labels, settings.valid_batch_size)?
        .with_max_words(settings.max_words());

    let (stats, report) = eval_epoch_with_report(loader.iter(), &loaded.model, &labels)?;
    tracing::info!("Test {}", stats);

    let chart_path = settings.confusion_matrix_path();
    write_svg(&report.confusion_matrix_svg(), &chart_path)?;

    println!("Loss: {:.4}", stats.loss);
    println!("Accuracy: {:.4}", stats.accuracy);
    println!("Confusion matrix: {:?}", chart_path);

    Ok(())
}

/// Execute the predict command
pub fn predict(settings: Settings, texts: Vec<String>) -> Result<()> {
    if texts.is_empty() {
        bail!("Nothing to classify");
    }
    settings.validate()?;

    let (loaded, labels) = load_trained(&settings)?;
    let max_words = settings.max_words();
    let inputs: Vec<String> = texts.iter().map(|t| truncate_words(t, max_words)).collect();

    let rows = loaded.tokenizer.encode_batch(&inputs)?;
    let (input_ids, attention_mask, token_type_ids) = rows.to_tensors(&loaded.device)?;
    let logits = loaded
        .model
        .forward(&input_ids, &attention_mask, &token_type_ids, false)?;
    let probs = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec2::<f32>()?;

    for (text, row) in texts.iter().zip(probs) {
        let (best, confidence) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });
        println!("{}\t{:.4}\t{}", labels.decode(best as u32)?, confidence, text);
    }

    Ok(())
}

/// Execute the devices command
pub fn devices() -> Result<()> {
    print_available_devices();
    Ok(())
}
