use super::{cosine_distance, sanitize_collection_name, CollectionState, IndexStore, Neighbor};
use crate::chunking::TextChunk;
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// First line of a collection file
#[derive(Debug, Serialize, Deserialize)]
struct Header {
    dimension: usize,
}

/// Every following line of a collection file
#[derive(Debug, Serialize, Deserialize)]
struct Record {
    id: u64,
    text: String,
    embedding: Vec<f32>,
}

/// Durable store in a local directory.
///
/// Each collection is an append-only JSON-lines file that starts with a
/// header fixing the vector dimension; when an id appears more than once the
/// last line wins. Queries scan every entry.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        LocalStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.root
            .join(format!("{}.jsonl", sanitize_collection_name(collection)))
    }

    /// Read only the header line of a collection
    async fn read_dimension(&self, collection: &str) -> Result<usize> {
        let path = self.collection_path(collection);
        let file = fs::File::open(&path)
            .await
            .map_err(|e| missing_or_io(collection, &path, e))?;

        let mut first_line = String::new();
        BufReader::new(file)
            .read_line(&mut first_line)
            .await
            .map_err(|e| missing_or_io(collection, &path, e))?;

        parse_header(&path, &first_line)
    }

    /// Load the dimension and the live entries of a collection, keyed by id
    async fn load(&self, collection: &str) -> Result<(usize, HashMap<u64, Record>)> {
        let path = self.collection_path(collection);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| missing_or_io(collection, &path, e))?;

        let mut lines = content.lines().enumerate();
        let dimension = parse_header(&path, lines.next().map_or("", |(_, line)| line))?;

        let mut records = HashMap::new();
        for (line_no, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(line).map_err(|e| {
                RagError::StoreIo(format!(
                    "corrupt entry at {}:{}: {}",
                    path.display(),
                    line_no + 1,
                    e
                ))
            })?;
            records.insert(record.id, record);
        }
        Ok((dimension, records))
    }
}

fn missing_or_io(collection: &str, path: &Path, err: std::io::Error) -> RagError {
    if err.kind() == ErrorKind::NotFound {
        RagError::CollectionNotFound(collection.to_string())
    } else {
        RagError::StoreIo(format!("failed to open {}: {}", path.display(), err))
    }
}

fn parse_header(path: &Path, line: &str) -> Result<usize> {
    serde_json::from_str::<Header>(line.trim())
        .map(|header| header.dimension)
        .map_err(|e| {
            RagError::StoreIo(format!(
                "missing or corrupt header in {}: {}",
                path.display(),
                e
            ))
        })
}

fn check_dimension(collection: &str, expected: usize, embedding: &Embedding) -> Result<()> {
    if embedding.dimension() == expected {
        Ok(())
    } else {
        Err(RagError::DimensionMismatch {
            collection: collection.to_string(),
            expected,
            actual: embedding.dimension(),
        })
    }
}

impl IndexStore for LocalStore {
    async fn collection_state(&self, collection: &str) -> Result<CollectionState> {
        let exists = fs::try_exists(self.collection_path(collection)).await?;
        Ok(if exists {
            CollectionState::Found
        } else {
            CollectionState::NotFound
        })
    }

    async fn rebuild(&self, collection: &str, dimension: usize) -> Result<()> {
        let path = self.collection_path(collection);
        fs::create_dir_all(&self.root).await?;

        match fs::remove_file(&path).await {
            Ok(()) => info!("Deleted existing collection {}", collection),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut header = serde_json::to_string(&Header { dimension })
            .map_err(|e| RagError::StoreIo(format!("failed to encode header: {}", e)))?;
        header.push('\n');
        fs::write(&path, header).await?;
        debug!(
            "Created empty collection at {} ({} dimensions)",
            path.display(),
            dimension
        );
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        chunk: &TextChunk,
        embedding: &Embedding,
    ) -> Result<()> {
        let dimension = self.read_dimension(collection).await?;
        check_dimension(collection, dimension, embedding)?;

        let path = self.collection_path(collection);
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| missing_or_io(collection, &path, e))?;

        let record = Record {
            id: chunk.id,
            text: chunk.text.clone(),
            embedding: embedding.values.clone(),
        };
        let mut line = serde_json::to_string(&record)
            .map_err(|e| RagError::StoreIo(format!("failed to encode entry: {}", e)))?;
        line.push('\n');

        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &Embedding,
        k: usize,
    ) -> Result<Vec<Neighbor>> {
        let (dimension, records) = self.load(collection).await?;
        check_dimension(collection, dimension, embedding)?;

        let mut neighbors: Vec<Neighbor> = records
            .into_values()
            .map(|record| Neighbor {
                distance: cosine_distance(&embedding.values, &record.embedding),
                id: record.id,
                text: record.text,
            })
            .collect();

        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        neighbors.truncate(k);
        Ok(neighbors)
    }
}
