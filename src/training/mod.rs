//! Fine-tuning a classification head on a frozen BERT-family encoder
//!
//! # Modules
//!
//! - `device` - CPU/CUDA/Metal device selection
//! - `hub` - HuggingFace Hub integration
//! - `models` - classifier model and tokenizer
//! - `loss` - cross-entropy and accuracy
//! - `optimizer` - AdamW and learning-rate schedule
//! - `engine` - single-epoch training and evaluation passes
//! - `trainer` - multi-epoch loop with checkpointing

pub mod device;
pub mod engine;
pub mod hub;
pub mod loss;
pub mod models;
pub mod optimizer;
pub mod trainer;

pub use device::{select_device, DevicePreference};
pub use engine::{eval_epoch, eval_epoch_with_report, train_epoch, EpochStats, EvaluationReport};
pub use hub::{ModelLoader, ModelPath};
pub use models::{BertClassifier, ClassifierModel, TokenizerWrapper};
pub use optimizer::{AdamW, AdamWConfig, LearningRateScheduler, ScheduleKind};
pub use trainer::{load_head, save_head, Trainer, TrainingHistory, TrainingResult};
