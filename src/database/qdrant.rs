use super::{sanitize_collection_name, CollectionState, IndexStore, Neighbor};
use crate::chunking::TextChunk;
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use log::info;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointStruct, ScoredPoint, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::json;

/// Where to reach the Qdrant server
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
}

/// Index store backed by a Qdrant server using cosine distance
pub struct QdrantStore {
    client: Qdrant,
}

fn store_error(action: &str, collection: &str, err: QdrantError) -> RagError {
    RagError::StoreIo(format!("{} {}: {}", action, collection, err))
}

impl QdrantStore {
    /// Connect lazily; nothing is sent until the first request
    pub fn new(config: QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder
            .build()
            .map_err(|e| RagError::StoreIo(format!("failed to create Qdrant client: {}", e)))?;

        Ok(QdrantStore { client })
    }
}

/// Qdrant reports cosine similarity as the score; points without a text
/// payload are skipped
fn neighbor_from_point(point: ScoredPoint) -> Option<Neighbor> {
    let payload = point.payload;
    let text = payload.get("text")?.as_str()?.to_string();
    let id = payload
        .get("chunk_index")
        .and_then(|v| v.as_integer())
        .map(|v| v as u64)
        .unwrap_or_default();

    Some(Neighbor {
        id,
        text,
        distance: 1.0 - point.score,
    })
}

impl IndexStore for QdrantStore {
    async fn collection_state(&self, collection: &str) -> Result<CollectionState> {
        let collection_name = sanitize_collection_name(collection);

        match self.client.collection_info(&collection_name).await {
            Ok(_) => Ok(CollectionState::Found),
            Err(QdrantError::ResponseError { status })
                if status.code() == tonic::Code::NotFound =>
            {
                Ok(CollectionState::NotFound)
            }
            Err(e) => Err(store_error("failed to inspect", &collection_name, e)),
        }
    }

    async fn rebuild(&self, collection: &str, dimension: usize) -> Result<()> {
        let collection_name = sanitize_collection_name(collection);

        if self.collection_state(collection).await? == CollectionState::Found {
            self.client
                .delete_collection(collection_name.clone())
                .await
                .map_err(|e| store_error("failed to delete", &collection_name, e))?;
            info!("Deleted existing collection {}", collection_name);
        }

        let create_collection = CreateCollectionBuilder::new(collection_name.clone())
            .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine));

        self.client
            .create_collection(create_collection)
            .await
            .map_err(|e| store_error("failed to create", &collection_name, e))?;

        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        chunk: &TextChunk,
        embedding: &Embedding,
    ) -> Result<()> {
        let collection_name = sanitize_collection_name(collection);

        let payload = Payload::try_from(json!({
            "text": chunk.text,
            "chunk_index": chunk.id,
        }))
        .map_err(|e| store_error("failed to build payload for", &collection_name, e))?;
        let point = PointStruct::new(chunk.id, embedding.values.clone(), payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection_name.clone(), vec![point]).wait(true))
            .await
            .map_err(|e| store_error("failed to upsert into", &collection_name, e))?;

        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &Embedding,
        k: usize,
    ) -> Result<Vec<Neighbor>> {
        let collection_name = sanitize_collection_name(collection);

        if self.collection_state(collection).await? == CollectionState::NotFound {
            return Err(RagError::CollectionNotFound(collection.to_string()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let search_request =
            SearchPointsBuilder::new(collection_name.clone(), embedding.values.clone(), k as u64)
                .with_payload(true);

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .map_err(|e| store_error("failed to search", &collection_name, e))?;

        let neighbors = search_response
            .result
            .into_iter()
            .filter_map(neighbor_from_point)
            .collect();

        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::Value;
    use std::collections::HashMap;

    fn point(payload: &[(&str, Value)], score: f32) -> ScoredPoint {
        ScoredPoint {
            payload: payload
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect::<HashMap<_, _>>(),
            score,
            ..Default::default()
        }
    }

    #[test]
    fn test_score_becomes_distance() {
        let neighbor = neighbor_from_point(point(
            &[
                ("text", Value::from("install steps".to_string())),
                ("chunk_index", Value::from(3_i64)),
            ],
            0.75,
        ))
        .unwrap();

        assert_eq!(neighbor.id, 3);
        assert_eq!(neighbor.text, "install steps");
        assert!((neighbor.distance - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_point_without_text_is_skipped() {
        let payload = [("chunk_index", Value::from(1_i64))];
        assert!(neighbor_from_point(point(&payload, 0.9)).is_none());
    }

    #[test]
    fn test_missing_index_defaults_to_zero() {
        let neighbor =
            neighbor_from_point(point(&[("text", Value::from("orphan".to_string()))], -0.5)).unwrap();
        assert_eq!(neighbor.id, 0);
        assert!((neighbor.distance - 1.5).abs() < 1e-6);
    }
}
