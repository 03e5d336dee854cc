use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clinclass::cli;
use clinclass::config::Settings;
use clinclass::training::{DevicePreference, ScheduleKind};

#[derive(Parser)]
#[command(name = "clinclass")]
#[command(about = "Fine-tune and evaluate BERT-family classifiers on clinical sentences", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the classification head and keep the best checkpoint
    Train {
        #[command(flatten)]
        common: CommonArgs,

        /// Training CSV file
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Number of epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Training batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Learning rate
        #[arg(long)]
        learning_rate: Option<f64>,

        /// Warmup ratio (fraction of total steps)
        #[arg(long)]
        warmup_ratio: Option<f64>,

        /// Learning-rate decay: linear or cosine
        #[arg(long)]
        scheduler: Option<ScheduleKind>,

        /// Fraction of the training file held out for validation
        #[arg(long)]
        validation_split: Option<f64>,

        /// Random seed for shuffling
        #[arg(long)]
        seed: Option<u64>,

        /// Log every N batches
        #[arg(long)]
        logging_steps: Option<usize>,
    },

    /// Evaluate a trained head, print the classification report and
    /// write the confusion matrix
    Evaluate {
        #[command(flatten)]
        common: CommonArgs,

        /// Test CSV file
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Classify sentences given on the command line
    Predict {
        #[command(flatten)]
        common: CommonArgs,

        /// Sentences to classify
        #[arg(required = true)]
        texts: Vec<String>,
    },

    /// List available compute devices
    Devices,
}

/// Flags shared by every model command
#[derive(Args)]
struct CommonArgs {
    /// JSON settings file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Encoder: HuggingFace model ID or local directory
    #[arg(short, long)]
    model: Option<String>,

    /// Head checkpoint path (safetensors)
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Output directory for history and charts
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum sequence length in tokens
    #[arg(long)]
    max_len: Option<usize>,

    /// Device: auto, cpu, cuda, or metal
    #[arg(long)]
    device: Option<DevicePreference>,
}

impl CommonArgs {
    fn settings(self) -> anyhow::Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(model) = self.model {
            settings.model_id = model;
        }
        if let Some(path) = self.model_path {
            settings.model_path = path;
        }
        if let Some(output) = self.output {
            settings.output_dir = output;
        }
        if let Some(max_len) = self.max_len {
            settings.max_len = max_len;
        }
        if let Some(device) = self.device {
            settings.device = device;
        }
        Ok(settings)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clinclass=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            common,
            data,
            epochs,
            batch_size,
            learning_rate,
            warmup_ratio,
            scheduler,
            validation_split,
            seed,
            logging_steps,
        } => {
            let mut settings = common.settings()?;
            if let Some(data) = data {
                settings.training_file = data;
            }
            if let Some(epochs) = epochs {
                settings.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                settings.train_batch_size = batch_size;
            }
            if let Some(lr) = learning_rate {
                settings.learning_rate = lr;
            }
            if let Some(ratio) = warmup_ratio {
                settings.warmup_ratio = ratio;
            }
            if let Some(scheduler) = scheduler {
                settings.scheduler = scheduler;
            }
            if let Some(split) = validation_split {
                settings.validation_split = split;
            }
            if let Some(seed) = seed {
                settings.seed = seed;
            }
            if let Some(steps) = logging_steps {
                settings.logging_steps = steps;
            }
            cli::train(settings)?;
        }

        Commands::Evaluate { common, data } => {
            let mut settings = common.settings()?;
            if let Some(data) = data {
                settings.testing_file = data;
            }
            cli::evaluate(settings)?;
        }

        Commands::Predict { common, texts } => {
            cli::predict(common.settings()?, texts)?;
        }

        Commands::Devices => {
            cli::devices()?;
        }
    }

    Ok(())
}
