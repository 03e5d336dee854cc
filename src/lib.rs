//! # clinclass
//!
//! Fine-tunes and evaluates a sentence classifier built on a pretrained
//! BERT-family encoder (Bio_ClinicalBERT by default) for clinical text.
//!
//! ## Architecture
//!
//! - `config` - run settings with defaults and JSON overrides
//! - `data` - CSV loading, label encoding and batching
//! - `training` - model, optimizer and the per-epoch train/eval passes
//! - `evaluation` - classification report, confusion matrix and charts
//! - `cli` - command handlers used by the binary

pub mod cli;
pub mod config;
pub mod data;
pub mod evaluation;
pub mod training;

pub use anyhow::{Error, Result};
