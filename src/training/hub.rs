//! HuggingFace Hub integration
//!
//! Resolves a pretrained model identifier (e.g. `emilyalsentzer/Bio_ClinicalBERT`)
//! or a local directory to the files the classifier needs: `config.json`,
//! the encoder weights (safetensors or a PyTorch pickle) and either
//! `tokenizer.json` or a WordPiece `vocab.txt`.

use anyhow::{anyhow, Context, Result};
use hf_hub::api::sync::Api;
use std::path::{Path, PathBuf};

/// Weight files in order of preference
const WEIGHT_FILES: [&str; 2] = ["model.safetensors", "pytorch_model.bin"];

/// Files making up a pretrained encoder on disk
#[derive(Debug, Clone)]
pub struct ModelPath {
    /// Directory holding the files
    pub path: PathBuf,
    /// Hub identifier, or the directory name for local models
    pub model_id: String,
    /// Whether the files came from a local directory
    pub is_local: bool,
    pub config_file: PathBuf,
    /// `model.safetensors`, or `pytorch_model.bin` when no safetensors are published
    pub weights_file: PathBuf,
    pub tokenizer_file: Option<PathBuf>,
    /// WordPiece vocabulary, used when there is no `tokenizer.json`
    pub vocab_file: Option<PathBuf>,
    pub tokenizer_config_file: Option<PathBuf>,
}

impl ModelPath {
    /// Use an already-downloaded model directory
    pub fn from_local(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.is_dir() {
            return Err(anyhow!("Model directory does not exist: {:?}", path));
        }

        let config_file = path.join("config.json");
        if !config_file.exists() {
            return Err(anyhow!("config.json not found in {:?}", path));
        }

        let weights_file = WEIGHT_FILES
            .iter()
            .map(|name| path.join(name))
            .find(|p| p.exists())
            .ok_or_else(|| {
                anyhow!(
                    "No model weights in {:?} (tried {})",
                    path,
                    WEIGHT_FILES.join(", ")
                )
            })?;

        let existing = |name: &str| Some(path.join(name)).filter(|p| p.exists());
        let tokenizer_file = existing("tokenizer.json");
        let vocab_file = existing("vocab.txt");
        let tokenizer_config_file = existing("tokenizer_config.json");

        Ok(Self {
            model_id: path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "local".to_string()),
            path,
            is_local: true,
            config_file,
            weights_file,
            tokenizer_file,
            vocab_file,
            tokenizer_config_file,
        })
    }

    /// Whether the weights are a PyTorch pickle rather than safetensors
    pub fn is_pytorch_weights(&self) -> bool {
        self.weights_file.extension().is_some_and(|ext| ext == "bin")
    }

    /// Check that the required files are present
    pub fn validate(&self) -> Result<()> {
        if !self.config_file.exists() {
            return Err(anyhow!("Config file not found: {:?}", self.config_file));
        }
        if !self.weights_file.exists() {
            return Err(anyhow!("Weights file not found: {:?}", self.weights_file));
        }
        Ok(())
    }

    /// Whether a tokenizer can be built from the available files
    pub fn has_tokenizer(&self) -> bool {
        self.tokenizer_file.is_some() || self.vocab_file.is_some()
    }
}

/// The subset of `config.json` used for validation and logging
#[derive(Debug, Clone, serde::Deserialize)]
pub struct HubModelConfig {
    #[serde(default)]
    pub architectures: Vec<String>,
    pub model_type: Option<String>,
    pub vocab_size: Option<usize>,
    pub hidden_size: Option<usize>,
    pub num_hidden_layers: Option<usize>,
    pub num_attention_heads: Option<usize>,
    pub max_position_embeddings: Option<usize>,
}

impl HubModelConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        serde_json::from_str(&content).context("Failed to parse config.json")
    }

    /// BERT-family models share the encoder layout loaded by candle's `BertModel`
    pub fn is_bert_family(&self) -> bool {
        match &self.model_type {
            Some(model_type) => matches!(model_type.as_str(), "bert" | "roberta" | "camembert"),
            None => self
                .architectures
                .iter()
                .any(|arch| arch.contains("Bert") || arch.contains("Roberta")),
        }
    }

    pub fn validate_bert_compatibility(&self, max_len: usize) -> Result<()> {
        if !self.is_bert_family() {
            return Err(anyhow!(
                "Model is not BERT-family. Architectures: {:?}, model_type: {:?}",
                self.architectures,
                self.model_type
            ));
        }

        if self.hidden_size.is_none() {
            return Err(anyhow!("Config missing required field: hidden_size"));
        }

        if let Some(max_positions) = self.max_position_embeddings {
            if max_len > max_positions {
                return Err(anyhow!(
                    "max_len {} exceeds the model's max_position_embeddings {}",
                    max_len,
                    max_positions
                ));
            }
        }

        Ok(())
    }
}

/// Resolves model identifiers to local files, downloading when needed
pub struct ModelLoader {
    api: Api,
}

impl ModelLoader {
    pub fn new() -> Result<Self> {
        let api = Api::new().context("Failed to initialize HuggingFace Hub API")?;
        Ok(Self { api })
    }

    /// Local paths win; anything else is treated as a Hub model id.
    pub fn load_model_path(&self, model_id_or_path: &str) -> Result<ModelPath> {
        let local_path = Path::new(model_id_or_path);
        let looks_local = model_id_or_path.starts_with('.')
            || model_id_or_path.starts_with('/')
            || model_id_or_path.starts_with('~');

        if local_path.exists() {
            tracing::info!("Loading model from local path: {}", model_id_or_path);
            ModelPath::from_local(local_path)
        } else if looks_local {
            Err(anyhow!("Local model path does not exist: {}", model_id_or_path))
        } else {
            self.download(model_id_or_path)
        }
    }

    fn download(&self, model_id: &str) -> Result<ModelPath> {
        tracing::info!("Fetching model from HuggingFace Hub: {}", model_id);
        let repo = self.api.model(model_id.to_string());

        let config_file = repo
            .get("config.json")
            .with_context(|| format!("Failed to download config.json for {}", model_id))?;
        let weights_file = if let Ok(path) = repo.get(WEIGHT_FILES[0]) {
            path
        } else if let Ok(path) = repo.get(WEIGHT_FILES[1]) {
            tracing::warn!("Safetensors not available for {}, using pytorch_model.bin", model_id);
            path
        } else {
            return Err(anyhow!(
                "No model weights found for {} (tried {})",
                model_id,
                WEIGHT_FILES.join(", ")
            ));
        };

        let tokenizer_file = repo.get("tokenizer.json").ok();
        let vocab_file = if tokenizer_file.is_none() {
            tracing::warn!("No tokenizer.json for {}, building one from vocab.txt", model_id);
            Some(repo.get("vocab.txt").with_context(|| {
                format!("{} has neither tokenizer.json nor vocab.txt", model_id)
            })?)
        } else {
            None
        };
        let tokenizer_config_file = repo.get("tokenizer_config.json").ok();

        let path = config_file
            .parent()
            .ok_or_else(|| anyhow!("Invalid config path: {:?}", config_file))?
            .to_path_buf();

        Ok(ModelPath {
            path,
            model_id: model_id.to_string(),
            is_local: false,
            config_file,
            weights_file,
            tokenizer_file,
            vocab_file,
            tokenizer_config_file,
        })
    }
}
