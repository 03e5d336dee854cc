//! BERT encoder with a sequence classification head
//!
//! The pretrained encoder is memory-mapped from safetensors (or read from a
//! PyTorch `pytorch_model.bin`) and stays frozen.
//! Only the head (dropout + linear over the `[CLS]` state) is trainable; its
//! parameters live in a caller-owned `VarMap`.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Dropout, Linear, VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};

use super::ClassifierModel;
use crate::training::hub::ModelPath;

/// Prefix under which head parameters are stored in the `VarMap`
pub const HEAD_PREFIX: &str = "classifier";

pub struct BertClassifier {
    encoder: BertModel,
    dropout: Dropout,
    head: Linear,
    hidden_size: usize,
    num_labels: usize,
    device: Device,
}

impl BertClassifier {
    /// Load a pretrained encoder and attach a freshly initialised head
    pub fn from_model_path(
        model_path: &ModelPath,
        num_labels: usize,
        dropout: f32,
        var_map: &VarMap,
        device: &Device,
    ) -> Result<Self> {
        model_path.validate()?;

        let config_str = std::fs::read_to_string(&model_path.config_file)
            .context("Failed to read config.json")?;
        let config: BertConfig =
            serde_json::from_str(&config_str).context("Failed to parse BERT config")?;

        let encoder_vb = if model_path.is_pytorch_weights() {
            tracing::info!("  Reading PyTorch weights from {:?}", model_path.weights_file);
            VarBuilder::from_pth(&model_path.weights_file, DType::F32, device)
                .context("Failed to load pytorch_model.bin weights")?
        } else {
            unsafe {
                VarBuilder::from_mmaped_safetensors(&[&model_path.weights_file], DType::F32, device)
                    .context("Failed to load safetensors weights")?
            }
        };

        let classifier = Self::from_config(&config, encoder_vb, num_labels, dropout, var_map, device)?;

        tracing::info!(
            "Loaded {} encoder: {} layers, hidden size {}, {} labels",
            model_path.model_id,
            config.num_hidden_layers,
            config.hidden_size,
            num_labels
        );

        Ok(classifier)
    }

    /// Build the classifier from an encoder config and a source for its weights
    pub fn from_config(
        config: &BertConfig,
        encoder_vb: VarBuilder,
        num_labels: usize,
        dropout: f32,
        var_map: &VarMap,
        device: &Device,
    ) -> Result<Self> {
        if num_labels < 2 {
            anyhow::bail!("A classifier needs at least 2 labels, got {}", num_labels);
        }

        let encoder = BertModel::load(encoder_vb.clone(), config)
            .or_else(|_| BertModel::load(encoder_vb.pp("bert"), config))
            .context("Failed to initialize BERT encoder from weights")?;

        let head_vb = VarBuilder::from_varmap(var_map, DType::F32, device);
        let head = candle_nn::linear(config.hidden_size, num_labels, head_vb.pp(HEAD_PREFIX))?;

        Ok(Self {
            encoder,
            dropout: Dropout::new(dropout),
            head,
            hidden_size: config.hidden_size,
            num_labels,
            device: device.clone(),
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// `[CLS]` hidden state for each sequence: `[batch, hidden]`
    fn pooled(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
    ) -> Result<Tensor> {
        let hidden_states = self
            .encoder
            .forward(input_ids, token_type_ids, Some(attention_mask))?;
        // Frozen encoder: gradients stop here.
        let hidden_states = hidden_states.detach();
        Ok(hidden_states.narrow(1, 0, 1)?.squeeze(1)?)
    }
}

impl ClassifierModel for BertClassifier {
    fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let pooled = self.pooled(input_ids, attention_mask, token_type_ids)?;
        let pooled = self.dropout.forward(&pooled, train)?;
        Ok(candle_nn::Module::forward(&self.head, &pooled)?)
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// A tiny randomly initialised classifier for tests that must not touch the Hub
#[cfg(test)]
pub(crate) fn tiny_classifier(
    vocab_size: usize,
    num_labels: usize,
    var_map: &VarMap,
) -> BertClassifier {
    let config: BertConfig = serde_json::from_str(&format!(
        r#"{{
            "vocab_size": {},
            "hidden_size": 8,
            "num_hidden_layers": 1,
            "num_attention_heads": 2,
            "intermediate_size": 16,
            "hidden_act": "gelu",
            "hidden_dropout_prob": 0.0,
            "max_position_embeddings": 32,
            "type_vocab_size": 2,
            "initializer_range": 0.02,
            "layer_norm_eps": 1e-12,
            "pad_token_id": 0,
            "model_type": "bert"
        }}"#,
        vocab_size
    ))
    .expect("tiny bert config");

    let device = Device::Cpu;
    // Encoder weights come from their own map so the optimizer never sees them.
    let encoder_map = VarMap::new();
    let encoder_vb = VarBuilder::from_varmap(&encoder_map, DType::F32, &device);
    BertClassifier::from_config(&config, encoder_vb, num_labels, 0.0, var_map, &device)
        .expect("tiny classifier")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_shape() {
        let var_map = VarMap::new();
        let model = tiny_classifier(20, 3, &var_map);

        let device = Device::Cpu;
        let ids = Tensor::new(&[[2u32, 3, 4, 0], [5, 6, 0, 0]], &device).unwrap();
        let mask = Tensor::new(&[[1f32, 1., 1., 0.], [1., 1., 0., 0.]], &device).unwrap();
        let types = ids.zeros_like().unwrap();

        let logits = model.forward(&ids, &mask, &types, false).unwrap();
        assert_eq!(logits.dims(), &[2, 3]);
        assert_eq!(model.num_labels(), 3);
        assert_eq!(model.hidden_size(), 8);
    }

    #[test]
    fn test_only_head_is_trainable() {
        let var_map = VarMap::new();
        let _model = tiny_classifier(20, 4, &var_map);

        let data = var_map.data().lock().unwrap();
        let mut names: Vec<_> = data.keys().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["classifier.bias", "classifier.weight"]);
        assert_eq!(data["classifier.weight"].dims(), &[4, 8]);
    }

    #[test]
    fn test_single_label_rejected() {
        let var_map = VarMap::new();
        let config: BertConfig = serde_json::from_str(
            r#"{"vocab_size": 10, "hidden_size": 8, "num_hidden_layers": 1,
                "num_attention_heads": 2, "intermediate_size": 16, "hidden_act": "gelu",
                "hidden_dropout_prob": 0.0, "max_position_embeddings": 16,
                "type_vocab_size": 2, "initializer_range": 0.02, "layer_norm_eps": 1e-12,
                "pad_token_id": 0}"#,
        )
        .unwrap();
        let encoder_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&encoder_map, DType::F32, &Device::Cpu);
        assert!(BertClassifier::from_config(&config, vb, 1, 0.1, &var_map, &Device::Cpu).is_err());
    }

    #[test]
    #[ignore]
    fn test_default_encoder_from_pytorch_weights() {
        let loader = crate::training::hub::ModelLoader::new().unwrap();
        let model_path = loader.load_model_path("emilyalsentzer/Bio_ClinicalBERT").unwrap();
        let var_map = VarMap::new();
        let model =
            BertClassifier::from_model_path(&model_path, 3, 0.3, &var_map, &Device::Cpu).unwrap();

        let tokenizer =
            crate::training::TokenizerWrapper::from_model_path(&model_path, 16).unwrap();
        let rows = tokenizer
            .encode_batch(&["Patient denies chest pain.".to_string()])
            .unwrap();
        let (ids, mask, types) = rows.to_tensors(&Device::Cpu).unwrap();
        let logits = model.forward(&ids, &mask, &types, false).unwrap();
        assert_eq!(logits.dims(), &[1, 3]);
    }
}
