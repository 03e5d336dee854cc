//! Classification loss and accuracy

use anyhow::Result;
use candle_core::{DType, Tensor, D};

/// Mean cross-entropy between `logits` `[batch, num_labels]` and class indices `[batch]`
pub fn cross_entropy(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let log_softmax = candle_nn::ops::log_softmax(logits, D::Minus1)?;
    let targets = targets.flatten_all()?;
    Ok(candle_nn::loss::nll(&log_softmax, &targets)?)
}

/// Most likely class per row
pub fn predictions(logits: &Tensor) -> Result<Tensor> {
    Ok(logits.argmax(D::Minus1)?)
}

/// Number of rows whose arg-max matches the target, and the number of rows
pub fn batch_accuracy(logits: &Tensor, targets: &Tensor) -> Result<(usize, usize)> {
    let preds = predictions(logits)?;
    let targets = targets.flatten_all()?.to_dtype(DType::U32)?;
    let correct = preds
        .eq(&targets)?
        .to_dtype(DType::U32)?
        .sum_all()?
        .to_scalar::<u32>()?;
    Ok((correct as usize, targets.dim(0)?))
}
