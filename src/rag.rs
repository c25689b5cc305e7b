use crate::chunking::{number_chunks, split_into_chunks, ChunkMethod};
use crate::database::{CollectionState, IndexStore, Neighbor};
use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use log::{debug, error, info};
use std::future::Future;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Number of characters of each hit shown by the query loop
const PREVIEW_CHARS: usize = 300;

/// A retrieved chunk with its similarity to the question
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: u64,
    pub text: String,
    /// `1 - distance`
    pub similarity: f32,
}

impl From<Neighbor> for Hit {
    fn from(neighbor: Neighbor) -> Self {
        Hit {
            id: neighbor.id,
            text: neighbor.text,
            similarity: 1.0 - neighbor.distance,
        }
    }
}

/// Result of asking a question
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// No collection has been built yet
    NotBuilt,
    /// Closest chunks first; empty when nothing matched
    Hits(Vec<Hit>),
}

/// Builds the vector index from a document and answers questions against it.
///
/// Owns the embedder and the store for its whole lifetime, so the model is
/// loaded at most once and every build targets the same collection.
pub struct RagEngine<E, S> {
    embedder: E,
    store: S,
    collection: String,
}

impl<E: Embedder, S: IndexStore> RagEngine<E, S> {
    pub fn new(embedder: E, store: S, collection: impl Into<String>) -> Self {
        RagEngine {
            embedder,
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether the collection has been built
    pub async fn collection_state(&self) -> Result<CollectionState> {
        self.store.collection_state(&self.collection).await
    }

    /// Chunk a document and replace the collection with its chunks.
    /// `progress` receives `(processed, total)` after every stored chunk.
    pub async fn build<F>(&self, content: &str, method: ChunkMethod, progress: F) -> Result<usize>
    where
        F: FnMut(usize, usize),
    {
        let chunks = split_into_chunks(content, method);
        info!("Split into {} chunks", chunks.len());
        self.build_from_chunks(chunks, progress).await
    }

    /// Replace the collection with already prepared chunks.
    ///
    /// The first chunk is embedded before anything is deleted, so a model
    /// that cannot load leaves the previous collection untouched.
    pub async fn build_from_chunks<F>(&self, chunks: Vec<String>, mut progress: F) -> Result<usize>
    where
        F: FnMut(usize, usize),
    {
        if chunks.is_empty() {
            return Err(RagError::EmptyInput(
                "document produced no chunks longer than 20 characters".to_string(),
            ));
        }

        let total = chunks.len();
        info!(
            "Embedding {} chunks with {}",
            total,
            self.embedder.model_name()
        );
        let mut rebuilt = false;

        for chunk in number_chunks(chunks) {
            let embedding = self.embedder.embed(&chunk.text).await?;

            if !rebuilt {
                self.store
                    .rebuild(&self.collection, embedding.dimension())
                    .await?;
                info!(
                    "Rebuilt collection {} ({} dimensions)",
                    self.collection,
                    embedding.dimension()
                );
                rebuilt = true;
            }

            self.store
                .upsert(&self.collection, &chunk, &embedding)
                .await?;

            let processed = chunk.id as usize + 1;
            debug!("Processing chunk {}/{}", processed, total);
            progress(processed, total);
        }

        info!("Stored {} chunks in {}", total, self.collection);
        Ok(total)
    }

    /// Embed the question and fetch the `k` closest chunks
    pub async fn query(&self, question: &str, k: usize) -> Result<QueryOutcome> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyInput("question is blank".to_string()));
        }

        if self.collection_state().await? == CollectionState::NotFound {
            return Ok(QueryOutcome::NotBuilt);
        }

        let question_embedding = self.embedder.embed(question).await?;

        match self
            .store
            .query(&self.collection, &question_embedding, k)
            .await
        {
            Ok(neighbors) => Ok(QueryOutcome::Hits(
                neighbors.into_iter().map(Hit::from).collect(),
            )),
            // dropped between the existence check and the search
            Err(RagError::CollectionNotFound(_)) => Ok(QueryOutcome::NotBuilt),
            Err(e) => Err(e),
        }
    }

    /// Run the interactive question loop until `exit`, end of input or Ctrl-C.
    /// Errors from a single question are printed and the loop keeps going.
    pub async fn run_query_loop<R, W>(&self, input: R, out: &mut W, k: usize) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let interrupted = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        self.run_query_loop_until(input, out, k, interrupted).await
    }

    /// Same as [`run_query_loop`](Self::run_query_loop), but stops when
    /// `shutdown` completes, whether the loop is waiting for input or
    /// searching.
    pub async fn run_query_loop_until<R, W, F>(
        &self,
        input: R,
        out: &mut W,
        k: usize,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
        F: Future<Output = ()>,
    {
        writeln!(out, "RAG Query System - Ask questions about your document!")?;
        writeln!(out, "Type 'exit' to quit")?;

        tokio::pin!(shutdown);
        let mut lines = input.lines();

        loop {
            write!(out, "\nYour question: ")?;
            out.flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = &mut shutdown => None,
            };

            let Some(line) = line else {
                writeln!(out, "\nGoodbye!")?;
                break;
            };

            let question = line.trim();
            if question.eq_ignore_ascii_case("exit") {
                writeln!(out, "Goodbye!")?;
                break;
            }
            if question.is_empty() {
                writeln!(out, "Please enter a valid question.")?;
                continue;
            }

            let outcome = tokio::select! {
                outcome = self.query(question, k) => outcome,
                _ = &mut shutdown => {
                    writeln!(out, "\nGoodbye!")?;
                    break;
                }
            };

            match outcome {
                Ok(QueryOutcome::NotBuilt) => {
                    writeln!(out, "Vector database not found. Build it first.")?;
                }
                Ok(QueryOutcome::Hits(hits)) if hits.is_empty() => {
                    writeln!(out, "No relevant documents found.")?;
                }
                Ok(QueryOutcome::Hits(hits)) => {
                    writeln!(out, "\nFound {} relevant chunks:\n", hits.len())?;
                    for (rank, hit) in hits.iter().enumerate() {
                        write!(out, "{}", format_hit(rank + 1, hit))?;
                    }
                }
                Err(e) => {
                    error!("Query failed: {}", e);
                    writeln!(out, "Error: {}", e)?;
                }
            }
        }

        Ok(())
    }
}

/// Render one ranked hit for the terminal
pub fn format_hit(rank: usize, hit: &Hit) -> String {
    let preview: String = hit.text.chars().take(PREVIEW_CHARS).collect();
    format!(
        "--- Result {} (relevance {:.2}%) ---\n{}...\n\n",
        rank,
        hit.similarity * 100.0,
        preview
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_from_neighbor() {
        let hit = Hit::from(Neighbor {
            id: 4,
            text: "chunk".to_string(),
            distance: 0.25,
        });
        assert_eq!(hit.id, 4);
        assert!((hit.similarity - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_format_hit_truncates_preview() {
        let hit = Hit {
            id: 0,
            text: "x".repeat(500),
            similarity: 0.5,
        };
        let rendered = format_hit(1, &hit);
        assert!(rendered.starts_with("--- Result 1 (relevance 50.00%) ---\n"));
        assert!(rendered.contains(&format!("{}...", "x".repeat(300))));
        assert!(!rendered.contains(&"x".repeat(301)));
    }
}
