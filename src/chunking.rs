use crate::error::Result;
use log::{debug, info};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

/// Chunks at or below this many characters (after trimming) are dropped
pub const MIN_CHUNK_CHARS: usize = 20;

/// Separator line written after every chunk in the chunks file
pub const CHUNK_SEPARATOR: &str = "---";

/// How a document is split into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ChunkMethod {
    /// Split before every markdown heading (`#` to `######`)
    #[default]
    Headings,
    /// Split on blank lines
    Paragraphs,
}

impl ChunkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkMethod::Headings => "headings",
            ChunkMethod::Paragraphs => "paragraphs",
        }
    }
}

impl FromStr for ChunkMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "headings" => Ok(ChunkMethod::Headings),
            "paragraphs" => Ok(ChunkMethod::Paragraphs),
            other => Err(format!("unknown chunking method '{}'", other)),
        }
    }
}

/// A chunk as it is stored in the index
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Position of the chunk in the document, starting at 0
    pub id: u64,
    pub text: String,
}

/// Attach dense ids `0..n-1` to chunk texts, keeping their order
pub fn number_chunks(chunks: Vec<String>) -> Vec<TextChunk> {
    chunks
        .into_iter()
        .enumerate()
        .map(|(idx, text)| TextChunk {
            id: idx as u64,
            text,
        })
        .collect()
}

fn heading_boundary() -> &'static Regex {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    HEADING.get_or_init(|| Regex::new(r"\n#{1,6} ").expect("heading pattern is valid"))
}

/// Split text into chunks using the given method.
///
/// The heading marker itself is discarded, so a heading's text becomes the
/// first line of the chunk that follows it. Candidates are trimmed and
/// anything of `MIN_CHUNK_CHARS` characters or fewer is dropped.
pub fn split_into_chunks(text: &str, method: ChunkMethod) -> Vec<String> {
    let candidates: Vec<&str> = match method {
        ChunkMethod::Headings => heading_boundary().split(text).collect(),
        ChunkMethod::Paragraphs => text.split("\n\n").collect(),
    };
    let total = candidates.len();

    let chunks: Vec<String> = candidates
        .into_iter()
        .map(str::trim)
        .filter(|chunk| chunk.chars().count() > MIN_CHUNK_CHARS)
        .map(str::to_string)
        .collect();

    debug!(
        "{} split produced {} candidates, kept {}",
        method.as_str(),
        total,
        chunks.len()
    );
    chunks
}

/// Split a document and save the chunks file next to it for inspection
pub fn prepare_chunks<P: AsRef<Path>>(
    text: &str,
    method: ChunkMethod,
    chunks_file: P,
) -> Result<Vec<String>> {
    let chunks = split_into_chunks(text, method);
    write_chunks_file(&chunks_file, &chunks)?;
    info!(
        "Split into {} chunks, saved to {}",
        chunks.len(),
        chunks_file.as_ref().display()
    );
    Ok(chunks)
}

/// Write chunks to a plain-text file, each followed by a `---` line
pub fn write_chunks_file<P: AsRef<Path>>(path: P, chunks: &[String]) -> Result<()> {
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(chunk);
        out.push('\n');
        out.push_str(CHUNK_SEPARATOR);
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

/// Read chunks back from a file written by `write_chunks_file`
pub fn read_chunks_file<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(parse_chunks(&content))
}

fn parse_chunks(content: &str) -> Vec<String> {
    let separator = format!("\n{}\n", CHUNK_SEPARATOR);
    content
        .split(separator.as_str())
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .collect()
}
