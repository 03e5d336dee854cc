//! Batching: tokenizes dataset records into fixed-shape batches

use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};

use super::dataset::{truncate_words, ClassificationDataset};
use super::label_encoder::LabelEncoder;
use crate::training::models::{EncodedRows, TokenizerWrapper};

/// A tokenized batch held in host memory
#[derive(Debug, Clone)]
pub struct ClassificationBatch {
    pub rows: EncodedRows,
    /// Class index per record `[batch_size]`
    pub targets: Vec<u32>,
}

impl ClassificationBatch {
    pub fn new(rows: EncodedRows, targets: Vec<u32>) -> Result<Self> {
        if rows.batch_size != targets.len() {
            return Err(anyhow!(
                "Batch has {} token rows but {} targets",
                rows.batch_size,
                targets.len()
            ));
        }
        Ok(Self { rows, targets })
    }

    /// Number of records in the batch
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Copy the batch onto `device`
    pub fn to_device(&self, device: &Device) -> Result<DeviceBatch> {
        let (input_ids, attention_mask, token_type_ids) = self.rows.to_tensors(device)?;
        let targets = Tensor::from_slice(&self.targets, self.targets.len(), device)?;

        Ok(DeviceBatch {
            input_ids,
            attention_mask,
            token_type_ids,
            targets,
        })
    }
}

/// A batch resident on the model's device
#[derive(Debug, Clone)]
pub struct DeviceBatch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
    pub targets: Tensor,
}

/// Iterates a dataset in tokenized batches
pub struct DataLoader<'a> {
    dataset: &'a ClassificationDataset,
    tokenizer: &'a TokenizerWrapper,
    labels: &'a LabelEncoder,
    batch_size: usize,
    max_words: Option<usize>,
    shuffle_seed: Option<u64>,
}

impl<'a> DataLoader<'a> {
    pub fn new(
        dataset: &'a ClassificationDataset,
        tokenizer: &'a TokenizerWrapper,
        labels: &'a LabelEncoder,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(anyhow!("batch_size must be greater than zero"));
        }
        Ok(Self {
            dataset,
            tokenizer,
            labels,
            batch_size,
            max_words: None,
            shuffle_seed: None,
        })
    }

    /// Cut sentences to at most `max_words` words before tokenizing
    pub fn with_max_words(mut self, max_words: usize) -> Self {
        self.max_words = Some(max_words.max(1));
        self
    }

    /// Visit records in a fresh seeded order every epoch
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Number of batches per epoch
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn num_records(&self) -> usize {
        self.dataset.len()
    }

    pub fn iter(&self) -> BatchIter<'_, 'a> {
        self.iter_epoch(0)
    }

    /// Batches for a given epoch; the order only differs between epochs when shuffling
    pub fn iter_epoch(&self, epoch: usize) -> BatchIter<'_, 'a> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(seed) = self.shuffle_seed {
            use rand::seq::SliceRandom;
            use rand::SeedableRng;

            let mut rng = rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }

        BatchIter {
            loader: self,
            order,
            position: 0,
        }
    }

    fn encode(&self, indices: &[usize]) -> Result<ClassificationBatch> {
        let mut texts = Vec::with_capacity(indices.len());
        let mut targets = Vec::with_capacity(indices.len());

        for &i in indices {
            let record = self
                .dataset
                .get(i)
                .ok_or_else(|| anyhow!("Record index {} out of range", i))?;
            texts.push(match self.max_words {
                Some(max_words) => truncate_words(&record.text, max_words),
                None => record.text.clone(),
            });
            targets.push(self.labels.encode(&record.label)?);
        }

        let rows = self.tokenizer.encode_batch(&texts)?;
        ClassificationBatch::new(rows, targets)
    }
}

/// Iterator over one epoch of batches
pub struct BatchIter<'l, 'a> {
    loader: &'l DataLoader<'a>,
    order: Vec<usize>,
    position: usize,
}

impl Iterator for BatchIter<'_, '_> {
    type Item = Result<ClassificationBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }

        let end = (self.position + self.loader.batch_size).min(self.order.len());
        let batch = self.loader.encode(&self.order[self.position..end]);
        self.position = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.position).div_ceil(self.loader.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BatchIter<'_, '_> {}
