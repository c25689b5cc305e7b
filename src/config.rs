use crate::database::{LocalStore, QdrantConfig, QdrantStore, StoreBackend};
use crate::embeddings::DEFAULT_MODEL_ID;
use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;

/// Which vector store backs the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Local,
    Qdrant,
}

/// Runtime configuration, read from the environment (and `.env`)
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory of the local store
    pub db_path: PathBuf,
    /// Name of the single live collection
    pub collection: String,
    /// Hugging Face id of the sentence-embedding model
    pub model_id: String,
    pub store: StoreKind,
    /// Only set when `store` is `StoreKind::Qdrant`
    pub qdrant: Option<QdrantConfig>,
    /// Where chunks are written for inspection
    pub chunks_file: PathBuf,
    /// Document used when no file is given
    pub document_path: PathBuf,
    /// Listen address of the web UI
    pub bind: String,
}

impl Config {
    /// Read `RAG_*` and `QDRANT_*` variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let store = match var("RAG_STORE", "local").to_lowercase().as_str() {
            "local" => StoreKind::Local,
            "qdrant" => StoreKind::Qdrant,
            other => return Err(anyhow!("Unknown RAG_STORE '{}', expected local or qdrant", other)),
        };

        let qdrant = match store {
            StoreKind::Qdrant => {
                let url = lookup("QDRANT_URL").context("Missing QDRANT_URL")?;
                Some(QdrantConfig {
                    url,
                    api_key: lookup("QDRANT_API_KEY"),
                })
            }
            StoreKind::Local => None,
        };

        Ok(Config {
            db_path: PathBuf::from(var("RAG_DB_PATH", "./rag_db")),
            collection: var("RAG_COLLECTION", "md_chunks"),
            model_id: var("RAG_MODEL", DEFAULT_MODEL_ID),
            store,
            qdrant,
            chunks_file: PathBuf::from(var("RAG_CHUNKS_FILE", "chunks.txt")),
            document_path: PathBuf::from(var("RAG_DOCUMENT", "PLAN.md")),
            bind: var("RAG_BIND", "127.0.0.1:8501"),
        })
    }

    /// Open the configured store
    pub fn open_store(&self) -> Result<StoreBackend> {
        match (self.store, &self.qdrant) {
            (StoreKind::Local, _) => Ok(StoreBackend::Local(LocalStore::new(&self.db_path))),
            (StoreKind::Qdrant, Some(qdrant)) => {
                let store = QdrantStore::new(qdrant.clone())
                    .context("Failed to initialize Qdrant client")?;
                Ok(StoreBackend::Qdrant(store))
            }
            (StoreKind::Qdrant, None) => Err(anyhow!("Missing QDRANT_URL")),
        }
    }
}
