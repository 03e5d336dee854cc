//! Sequence classification models and their tokenizer

mod classifier;
mod tokenizer;

pub use classifier::{BertClassifier, HEAD_PREFIX};
pub use tokenizer::{EncodedRows, TokenizerWrapper};

#[cfg(test)]
pub(crate) use classifier::tiny_classifier;
#[cfg(test)]
pub(crate) use tokenizer::test_tokenizer;

use anyhow::Result;
use candle_core::{Device, Tensor};

/// A model mapping token batches to per-class scores
pub trait ClassifierModel {
    /// Forward pass
    ///
    /// # Arguments
    /// * `input_ids` - Token IDs `[batch_size, seq_len]`
    /// * `attention_mask` - 1 for real tokens, 0 for padding `[batch_size, seq_len]`
    /// * `token_type_ids` - Segment IDs `[batch_size, seq_len]`
    /// * `train` - Enables dropout
    ///
    /// # Returns
    /// * Logits `[batch_size, num_labels]`
    fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
        train: bool,
    ) -> Result<Tensor>;

    fn num_labels(&self) -> usize;

    /// Device the model's parameters live on
    fn device(&self) -> &Device;
}
