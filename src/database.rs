//! Persistent vector index behind a small trait, with an on-disk backend and
//! a Qdrant backend.

mod local;
mod qdrant;

pub use local::LocalStore;
pub use qdrant::{QdrantConfig, QdrantStore};

use crate::chunking::TextChunk;
use crate::embeddings::Embedding;
use crate::error::Result;
use std::future::Future;

/// Whether a named collection exists in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Found,
    NotFound,
}

/// A stored chunk returned by a nearest-neighbour query
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: u64,
    pub text: String,
    /// Cosine distance to the query vector, `1 - cos`
    pub distance: f32,
}

/// Vector index holding named collections of (id, text, embedding) entries.
///
/// Implementations may use `async fn`; the futures must be `Send`.
pub trait IndexStore: Send + Sync {
    fn collection_state(
        &self,
        collection: &str,
    ) -> impl Future<Output = Result<CollectionState>> + Send;

    /// Drop the collection if present, then create it again empty.
    /// `dimension` is the length of every vector the collection will accept.
    fn rebuild(&self, collection: &str, dimension: usize) -> impl Future<Output = Result<()>> + Send;

    /// Insert the chunk, replacing any entry with the same id.
    /// Fails with `DimensionMismatch` when the vector has the wrong length.
    fn upsert(
        &self,
        collection: &str,
        chunk: &TextChunk,
        embedding: &Embedding,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Up to `k` nearest entries, closest first.
    /// Fails with `CollectionNotFound` when the collection does not exist.
    fn query(
        &self,
        collection: &str,
        embedding: &Embedding,
        k: usize,
    ) -> impl Future<Output = Result<Vec<Neighbor>>> + Send;
}

/// The store selected by configuration
pub enum StoreBackend {
    Local(LocalStore),
    Qdrant(QdrantStore),
}

impl StoreBackend {
    pub fn name(&self) -> &'static str {
        match self {
            StoreBackend::Local(_) => "local",
            StoreBackend::Qdrant(_) => "qdrant",
        }
    }
}

impl IndexStore for StoreBackend {
    async fn collection_state(&self, collection: &str) -> Result<CollectionState> {
        match self {
            StoreBackend::Local(store) => store.collection_state(collection).await,
            StoreBackend::Qdrant(store) => store.collection_state(collection).await,
        }
    }

    async fn rebuild(&self, collection: &str, dimension: usize) -> Result<()> {
        match self {
            StoreBackend::Local(store) => store.rebuild(collection, dimension).await,
            StoreBackend::Qdrant(store) => store.rebuild(collection, dimension).await,
        }
    }

    async fn upsert(
        &self,
        collection: &str,
        chunk: &TextChunk,
        embedding: &Embedding,
    ) -> Result<()> {
        match self {
            StoreBackend::Local(store) => store.upsert(collection, chunk, embedding).await,
            StoreBackend::Qdrant(store) => store.upsert(collection, chunk, embedding).await,
        }
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &Embedding,
        k: usize,
    ) -> Result<Vec<Neighbor>> {
        match self {
            StoreBackend::Local(store) => store.query(collection, embedding, k).await,
            StoreBackend::Qdrant(store) => store.query(collection, embedding, k).await,
        }
    }
}

/// Normalize a collection name for use as a file or collection identifier
fn sanitize_collection_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase()
}

/// Cosine distance `1 - cos(a, b)`; a zero vector is at distance 1 from everything
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}
