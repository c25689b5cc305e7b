//! Embedders shared by the integration tests.

#![allow(dead_code)]

use md_rag::database::LocalStore;
use md_rag::embeddings::{Embedder, Embedding};
use md_rag::error::{RagError, Result};
use md_rag::rag::RagEngine;
use std::path::Path;

pub const COLLECTION: &str = "md_chunks";

/// Length of every `KeywordEmbedder` vector
pub const KEYWORD_DIMENSION: usize = 11;

pub const TWO_SECTIONS: &str = "# A\ntext one here please\n# B\nsecond chunk content";

/// Counts vocabulary words; a small constant component keeps vectors non-zero
pub struct KeywordEmbedder {
    vocab: Vec<&'static str>,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        KeywordEmbedder {
            vocab: vec![
                "one", "two", "second", "chunk", "content", "text", "alpha", "beta", "gamma",
                "delta",
            ],
        }
    }
}

impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let mut values: Vec<f32> = self
            .vocab
            .iter()
            .map(|term| words.iter().filter(|w| *w == term).count() as f32)
            .collect();
        values.push(0.1);
        Ok(Embedding { values })
    }
}

/// Embedder whose model never loads
pub struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }

    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Err(RagError::ModelUnavailable("weights missing".to_string()))
    }
}

/// Returns the same vector for every text, standing in for a different model
pub struct FixedEmbedder(pub Vec<f32>);

impl Embedder for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Ok(Embedding {
            values: self.0.clone(),
        })
    }
}

/// Never finishes embedding
pub struct StalledEmbedder;

impl Embedder for StalledEmbedder {
    fn model_name(&self) -> &str {
        "stalled"
    }

    async fn embed(&self, _text: &str) -> Result<Embedding> {
        std::future::pending().await
    }
}

pub fn keyword_engine(dir: &Path) -> RagEngine<KeywordEmbedder, LocalStore> {
    RagEngine::new(KeywordEmbedder::new(), LocalStore::new(dir), COLLECTION)
}
