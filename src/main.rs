use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{info, warn};
use std::io::{self, Write};
use std::path::PathBuf;

use md_rag::chunking::{prepare_chunks, read_chunks_file, ChunkMethod};
use md_rag::config::Config;
use md_rag::database::{CollectionState, StoreBackend};
use md_rag::document::Document;
use md_rag::embeddings::SentenceEmbedder;
use md_rag::rag::RagEngine;
use md_rag::web::{run_server, AppState};

/// Ask questions about a markdown document using sentence embeddings and a vector index
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a document into chunks and write the chunks file
    Prepare {
        /// Document to split (defaults to RAG_DOCUMENT, then PLAN.md)
        file: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = ChunkMethod::Headings)]
        method: ChunkMethod,
    },
    /// Build the vector database from the chunks file
    Index,
    /// Split a document and build the vector database from it
    Ingest {
        /// Document to index (defaults to RAG_DOCUMENT, then PLAN.md)
        file: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = ChunkMethod::Headings)]
        method: ChunkMethod,
    },
    /// Ask questions about the indexed document
    Ask {
        /// Number of chunks to show per question
        #[arg(short, default_value_t = 3)]
        k: usize,
    },
    /// Start the web UI
    Serve {
        /// Listen address, overrides RAG_BIND
        #[arg(long)]
        bind: Option<String>,
    },
}

type Engine = RagEngine<SentenceEmbedder, StoreBackend>;

fn open_engine(config: &Config) -> Result<Engine> {
    let store = config.open_store()?;
    info!(
        "Using {} store, collection {}",
        store.name(),
        config.collection
    );
    let embedder = SentenceEmbedder::new(config.model_id.clone());
    Ok(RagEngine::new(embedder, store, config.collection.clone()))
}

fn print_progress(processed: usize, total: usize) {
    print!("\rProcessing chunk {}/{}", processed, total);
    let _ = io::stdout().flush();
    if processed == total {
        println!();
    }
}

async fn build(engine: &Engine, chunks: Vec<String>) -> Result<()> {
    let count = engine
        .build_from_chunks(chunks, print_progress)
        .await
        .context("Failed to build vector database")?;
    println!(
        "Vector database built and ready! {} chunks processed.",
        count
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let mut config = Config::from_env().context("Invalid configuration")?;

    match args.command {
        Command::Prepare { file, method } => {
            let path = file.unwrap_or_else(|| config.document_path.clone());
            let document = Document::from_file(&path).context("Failed to process document")?;
            let chunks = prepare_chunks(&document.content, method, &config.chunks_file)?;
            println!(
                "Split {} into {} chunks, written to {}",
                document.document_id,
                chunks.len(),
                config.chunks_file.display()
            );
        }
        Command::Index => {
            let chunks = read_chunks_file(&config.chunks_file).with_context(|| {
                format!(
                    "Failed to read {}; run `prepare` first",
                    config.chunks_file.display()
                )
            })?;
            let engine = open_engine(&config)?;
            build(&engine, chunks).await?;
        }
        Command::Ingest { file, method } => {
            let path = file.unwrap_or_else(|| config.document_path.clone());
            let document = Document::from_file(&path).context("Failed to process document")?;
            info!("Document type: {}", document.mime_type);

            let chunks = prepare_chunks(&document.content, method, &config.chunks_file)?;
            println!("Document split into {} chunks", chunks.len());

            let engine = open_engine(&config)?;
            build(&engine, chunks).await?;
        }
        Command::Ask { k } => {
            let engine = open_engine(&config)?;
            if engine.collection_state().await? == CollectionState::NotFound {
                bail!("Vector database not found. Run `ingest` (or `prepare` and `index`) first");
            }
            println!("Connected to vector database!");

            engine
                .embedder()
                .load()
                .await
                .context("Failed to load embedding model")?;

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            engine
                .run_query_loop(stdin, &mut io::stdout(), k)
                .await
                .context("Error in query loop")?;
        }
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            let engine = open_engine(&config)?;
            if let Err(e) = engine.embedder().load().await {
                warn!("Embedding model not loaded yet: {}", e);
            }
            run_server(AppState::new(engine, config)).await?;
        }
    }

    Ok(())
}
