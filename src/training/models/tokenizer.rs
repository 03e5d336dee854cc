//! Tokenizer wrapper for HuggingFace tokenizers
//!
//! Every sentence is truncated and padded to the same fixed length so that
//! batches always have shape `[batch_size, max_len]`.

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use std::path::Path;
use std::str::FromStr;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::training::hub::ModelPath;

/// Fixed-length sentence tokenizer
#[derive(Clone)]
pub struct TokenizerWrapper {
    tokenizer: Tokenizer,
    max_length: usize,
}

impl TokenizerWrapper {
    /// Wrap an existing tokenizer, configuring truncation and padding to `max_length`
    pub fn from_tokenizer(mut tokenizer: Tokenizer, max_length: usize) -> Result<Self> {
        if max_length == 0 {
            return Err(anyhow!("max_length must be greater than zero"));
        }

        let pad_token = ["[PAD]", "<pad>"]
            .into_iter()
            .find(|t| tokenizer.token_to_id(t).is_some())
            .unwrap_or("[PAD]");
        let pad_id = tokenizer.token_to_id(pad_token).unwrap_or(0);

        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            pad_id,
            pad_token: pad_token.to_string(),
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("Failed to set truncation: {}", e))?;

        Ok(Self {
            tokenizer,
            max_length,
        })
    }

    pub fn from_file(path: impl AsRef<Path>, max_length: usize) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path.as_ref())
            .map_err(|e| anyhow!("Failed to load tokenizer {:?}: {}", path.as_ref(), e))?;
        Self::from_tokenizer(tokenizer, max_length)
    }

    /// Build a BERT WordPiece tokenizer from a `vocab.txt` (one token per line,
    /// id = line number)
    pub fn from_vocab_file(
        vocab_file: impl AsRef<Path>,
        lowercase: bool,
        max_length: usize,
    ) -> Result<Self> {
        let vocab_file = vocab_file.as_ref();
        let text = std::fs::read_to_string(vocab_file)
            .with_context(|| format!("Failed to read vocabulary {:?}", vocab_file))?;

        let mut vocab = serde_json::Map::new();
        for (id, token) in text.lines().map(|l| l.trim_end_matches('\r')).enumerate() {
            if !token.is_empty() && !vocab.contains_key(token) {
                vocab.insert(token.to_string(), serde_json::json!(id));
            }
        }
        if vocab.is_empty() {
            return Err(anyhow!("Vocabulary {:?} is empty", vocab_file));
        }

        let id_of = |token: &str| {
            vocab
                .get(token)
                .and_then(|id| id.as_u64())
                .ok_or_else(|| anyhow!("Vocabulary {:?} has no {} token", vocab_file, token))
        };
        let cls_id = id_of("[CLS]")?;
        let sep_id = id_of("[SEP]")?;
        id_of("[UNK]")?;

        let added_tokens: Vec<serde_json::Value> = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]"]
            .into_iter()
            .filter_map(|token| vocab.get(token).map(|id| (token, id.clone())))
            .map(|(token, id)| {
                serde_json::json!({
                    "id": id, "content": token, "single_word": false, "lstrip": false,
                    "rstrip": false, "normalized": false, "special": true
                })
            })
            .collect();

        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": {
                "type": "BertNormalizer",
                "clean_text": true,
                "handle_chinese_chars": true,
                "strip_accents": null,
                "lowercase": lowercase
            },
            "pre_tokenizer": {"type": "BertPreTokenizer"},
            "post_processor": {
                "type": "BertProcessing",
                "sep": ["[SEP]", sep_id],
                "cls": ["[CLS]", cls_id]
            },
            "decoder": {"type": "WordPiece", "prefix": "##", "cleanup": true},
            "model": {
                "type": "WordPiece",
                "unk_token": "[UNK]",
                "continuing_subword_prefix": "##",
                "max_input_chars_per_word": 100,
                "vocab": vocab
            }
        });

        let tokenizer = Tokenizer::from_str(&tokenizer_json.to_string())
            .map_err(|e| anyhow!("Failed to build tokenizer from {:?}: {}", vocab_file, e))?;
        tracing::debug!(
            "Built WordPiece tokenizer from {:?} ({} tokens, lowercase: {})",
            vocab_file,
            tokenizer.get_vocab_size(true),
            lowercase
        );
        Self::from_tokenizer(tokenizer, max_length)
    }

    /// Prefer `tokenizer.json`; fall back to `vocab.txt` with the casing from
    /// `tokenizer_config.json` (lowercase when unspecified)
    pub fn from_model_path(model_path: &ModelPath, max_length: usize) -> Result<Self> {
        if let Some(tokenizer_file) = &model_path.tokenizer_file {
            return Self::from_file(tokenizer_file, max_length);
        }

        let vocab_file = model_path.vocab_file.as_ref().ok_or_else(|| {
            anyhow!(
                "{} has neither tokenizer.json nor vocab.txt",
                model_path.model_id
            )
        })?;
        let lowercase = match &model_path.tokenizer_config_file {
            Some(path) => read_do_lower_case(path)?,
            None => true,
        };
        tracing::info!("  Tokenizer: {:?} (lowercase: {})", vocab_file, lowercase);
        Self::from_vocab_file(vocab_file, lowercase, max_length)
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// Encode a batch of sentences into flattened `[batch, max_length]` rows
    pub fn encode_batch(&self, texts: &[String]) -> Result<EncodedRows> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow!("Batch tokenization failed: {}", e))?;

        let batch_size = encodings.len();
        let seq_len = self.max_length;

        let mut rows = EncodedRows {
            input_ids: Vec::with_capacity(batch_size * seq_len),
            attention_mask: Vec::with_capacity(batch_size * seq_len),
            token_type_ids: Vec::with_capacity(batch_size * seq_len),
            batch_size,
            seq_len,
        };

        for encoding in &encodings {
            if encoding.get_ids().len() != seq_len {
                return Err(anyhow!(
                    "Tokenizer produced {} ids, expected {}",
                    encoding.get_ids().len(),
                    seq_len
                ));
            }
            rows.input_ids.extend(encoding.get_ids());
            rows.attention_mask.extend(encoding.get_attention_mask());
            rows.token_type_ids.extend(encoding.get_type_ids());
        }

        Ok(rows)
    }
}

fn read_do_lower_case(path: &Path) -> Result<bool> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    let config: serde_json::Value = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(config
        .get("do_lower_case")
        .and_then(|v| v.as_bool())
        .unwrap_or(true))
}

/// Token rows for a batch, flattened row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRows {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub token_type_ids: Vec<u32>,
    pub batch_size: usize,
    pub seq_len: usize,
}

impl EncodedRows {
    /// `(input_ids, attention_mask, token_type_ids)` on `device`; the mask is `f32`
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
        let shape = (self.batch_size, self.seq_len);
        let input_ids = Tensor::from_slice(&self.input_ids, shape, device)?;
        let attention_mask =
            Tensor::from_slice(&self.attention_mask, shape, device)?.to_dtype(DType::F32)?;
        let token_type_ids = Tensor::from_slice(&self.token_type_ids, shape, device)?;
        Ok((input_ids, attention_mask, token_type_ids))
    }
}

#[cfg(test)]
pub(crate) fn test_tokenizer(max_length: usize) -> TokenizerWrapper {
    let words = [
        "[PAD]", "[UNK]", "patient", "denies", "chest", "pain", "cbc", "was", "ordered",
        "started", "on", "aspirin", "fever", "x-ray", "shows", "no", "acute", "findings",
    ];
    let vocab = words
        .iter()
        .enumerate()
        .map(|(i, w)| format!("\"{}\": {}", w, i))
        .collect::<Vec<_>>()
        .join(", ");
    let json = format!(
        r#"{{
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": {{"type": "Lowercase"}},
            "pre_tokenizer": {{"type": "WhitespaceSplit"}},
            "post_processor": null,
            "decoder": null,
            "model": {{"type": "WordLevel", "vocab": {{{}}}, "unk_token": "[UNK]"}}
        }}"#,
        vocab
    );

    let tokenizer = Tokenizer::from_str(&json).expect("test tokenizer json");
    TokenizerWrapper::from_tokenizer(tokenizer, max_length).expect("test tokenizer config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_batch_pads_and_truncates() {
        let tokenizer = test_tokenizer(4);
        let rows = tokenizer
            .encode_batch(&[
                "patient denies chest pain on aspirin".to_string(),
                "CBC ordered".to_string(),
            ])
            .unwrap();

        assert_eq!(rows.batch_size, 2);
        assert_eq!(rows.seq_len, 4);
        assert_eq!(rows.input_ids, vec![2, 3, 4, 5, 6, 8, 0, 0]);
        assert_eq!(rows.attention_mask, vec![1, 1, 1, 1, 1, 1, 0, 0]);
        assert_eq!(rows.token_type_ids.len(), 8);
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let tokenizer = test_tokenizer(3);
        let rows = tokenizer.encode_batch(&["zebra fever".to_string()]).unwrap();
        assert_eq!(rows.input_ids, vec![1, 12, 0]);
    }

    #[test]
    fn test_zero_max_length_rejected() {
        let tokenizer = test_tokenizer(2);
        assert!(TokenizerWrapper::from_tokenizer(tokenizer.tokenizer, 0).is_err());
    }

    fn write_vocab(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("vocab.txt");
        let tokens = [
            "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "patient", "denies", "chest", "pain",
            "fever", "##s", ".",
        ];
        std::fs::write(&path, tokens.join("\n")).unwrap();
        path
    }

    #[test]
    fn test_vocab_file_wordpiece() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = TokenizerWrapper::from_vocab_file(write_vocab(dir.path()), true, 8).unwrap();
        assert_eq!(tokenizer.vocab_size(), 12);

        let rows = tokenizer.encode_batch(&["Patient denies fevers".to_string()]).unwrap();
        assert_eq!(rows.input_ids, vec![2, 5, 6, 9, 10, 3, 0, 0]);
        assert_eq!(rows.attention_mask, vec![1, 1, 1, 1, 1, 1, 0, 0]);
    }

    #[test]
    fn test_vocab_file_truncation_keeps_sep() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = TokenizerWrapper::from_vocab_file(write_vocab(dir.path()), true, 4).unwrap();
        let rows = tokenizer
            .encode_batch(&["patient denies chest pain.".to_string()])
            .unwrap();
        assert_eq!(rows.input_ids, vec![2, 5, 6, 3]);
    }

    #[test]
    fn test_vocab_file_without_cls_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        std::fs::write(&path, "[PAD]\n[UNK]\npatient\n").unwrap();
        assert!(TokenizerWrapper::from_vocab_file(&path, true, 8).is_err());
    }

    #[test]
    fn test_model_path_falls_back_to_vocab() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        std::fs::write(dir.path().join("pytorch_model.bin"), b"").unwrap();
        write_vocab(dir.path());
        std::fs::write(
            dir.path().join("tokenizer_config.json"),
            r#"{"do_lower_case": false}"#,
        )
        .unwrap();

        let model_path = ModelPath::from_local(dir.path()).unwrap();
        let tokenizer = TokenizerWrapper::from_model_path(&model_path, 6).unwrap();
        // cased vocabulary: "Patient" is unknown, "patient" is not
        let rows = tokenizer
            .encode_batch(&["Patient patient".to_string()])
            .unwrap();
        assert_eq!(rows.input_ids, vec![2, 1, 5, 3, 0, 0]);
    }

    #[test]
    #[ignore]
    fn test_pretrained_tokenizer() {
        let loader = crate::training::hub::ModelLoader::new().unwrap();
        let path = loader.load_model_path("emilyalsentzer/Bio_ClinicalBERT").unwrap();
        let tokenizer = TokenizerWrapper::from_model_path(&path, 128).unwrap();
        let rows = tokenizer.encode_batch(&["Patient denies chest pain.".to_string()]).unwrap();
        assert_eq!(rows.input_ids.len(), 128);
    }
}
