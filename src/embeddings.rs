use crate::error::{RagError, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::api::tokio::Api;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};
use tokio::sync::OnceCell;

/// Default sentence-transformers model (384 dimensions)
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Longest token sequence fed to the model; longer inputs are truncated
const MAX_TOKENS: usize = 256;

/// Output of an embedder; every vector from one model has the same length
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Anything that turns text into a fixed-length vector.
///
/// Implementations may write `async fn embed`; the returned future must be
/// `Send` so engines can be shared by the web server.
pub trait Embedder: Send + Sync {
    /// Name of the underlying model, for logs and status output
    fn model_name(&self) -> &str;

    /// Embed a single text. The same text always maps to the same vector.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Embedding>> + Send;
}

/// Weights, tokenizer and device, loaded together once
struct LoadedModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl LoadedModel {
    /// Tokenize, run the encoder, mean-pool and L2-normalize
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self.tokenizer.encode(text, true).map_err(inference)?;

        let input_ids = Tensor::new(encoding.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(inference)?;
        let attention_mask = Tensor::new(encoding.get_attention_mask(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(inference)?;
        let token_type_ids = input_ids.zeros_like().map_err(inference)?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(inference)?;

        // single unpadded sequence, so a plain mean over tokens is the masked mean
        let pooled = output.mean(1).map_err(inference)?;
        let norm = pooled
            .sqr()
            .and_then(|t| t.sum_keepdim(1))
            .and_then(|t| t.sqrt())
            .and_then(|t| t.clamp(1e-12, f64::MAX))
            .map_err(inference)?;

        pooled
            .broadcast_div(&norm)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(inference)
    }
}

fn inference(err: impl Display) -> RagError {
    RagError::Embedding(err.to_string())
}

fn unavailable(what: &str, err: impl Display) -> RagError {
    RagError::ModelUnavailable(format!("{what}: {err}"))
}

/// BERT sentence embedder backed by candle. The model is downloaded from the
/// Hugging Face hub (or taken from its local cache) on first use and kept for
/// the lifetime of the embedder.
pub struct SentenceEmbedder {
    model_id: String,
    model: OnceCell<Arc<LoadedModel>>,
}

impl SentenceEmbedder {
    pub fn new(model_id: impl Into<String>) -> Self {
        SentenceEmbedder {
            model_id: model_id.into(),
            model: OnceCell::new(),
        }
    }

    /// Load the model now instead of on the first `embed` call
    pub async fn load(&self) -> Result<()> {
        self.loaded().await.map(|_| ())
    }

    async fn loaded(&self) -> Result<&Arc<LoadedModel>> {
        self.model
            .get_or_try_init(|| async {
                let model = load_model(&self.model_id).await?;
                Ok(Arc::new(model))
            })
            .await
    }
}

async fn load_model(model_id: &str) -> Result<LoadedModel> {
    info!("Loading embedding model {}", model_id);

    let api = Api::new().map_err(|e| unavailable("failed to create hub client", e))?;
    let repo = api.model(model_id.to_string());

    debug!("Fetching tokenizer, config and weights");
    let tokenizer_path = repo
        .get("tokenizer.json")
        .await
        .map_err(|e| unavailable("failed to fetch tokenizer", e))?;
    let config_path = repo
        .get("config.json")
        .await
        .map_err(|e| unavailable("failed to fetch config", e))?;
    let weights_path = repo
        .get("model.safetensors")
        .await
        .map_err(|e| unavailable("failed to fetch weights", e))?;

    let mut tokenizer =
        Tokenizer::from_file(&tokenizer_path).map_err(|e| unavailable("bad tokenizer", e))?;
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: MAX_TOKENS,
            ..Default::default()
        }))
        .map_err(|e| unavailable("bad truncation settings", e))?;
    tokenizer.with_padding(None);

    let config = std::fs::read_to_string(&config_path)
        .map_err(|e| unavailable("failed to read config", e))?;
    let config: Config =
        serde_json::from_str(&config).map_err(|e| unavailable("bad model config", e))?;

    let device = Device::Cpu;
    // SAFETY: the weights file is only read, and the hub cache does not rewrite it in place.
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
            .map_err(|e| unavailable("failed to map weights", e))?
    };
    let model = BertModel::load(vb, &config).map_err(|e| unavailable("failed to build model", e))?;

    info!("Embedding model {} ready", model_id);
    Ok(LoadedModel {
        model,
        tokenizer,
        device,
    })
}

impl Embedder for SentenceEmbedder {
    fn model_name(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let model = Arc::clone(self.loaded().await?);
        let text = text.to_string();

        let values = tokio::task::spawn_blocking(move || model.encode(&text))
            .await
            .map_err(inference)??;

        Ok(Embedding { values })
    }
}
