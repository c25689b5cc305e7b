use crate::error::{RagError, Result};
use log::{debug, info};
use mime_guess::from_path;
use std::fs;
use std::path::Path;

/// A markdown or plain-text file, read from disk or uploaded through the web UI
#[derive(Debug, Clone)]
pub struct Document {
    /// UTF-8 text with `\r\n` line endings turned into `\n`
    pub content: String,
    /// Bare file name, shown in build messages
    pub document_id: String,
    /// Guessed from the file extension, always `text/*`
    pub mime_type: String,
}

impl Document {
    /// Read a document from disk
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| RagError::Document(format!("invalid file name: {}", path.display())))?
            .to_string();

        info!("Reading document {}", path.display());
        let bytes = fs::read(path)
            .map_err(|e| RagError::Document(format!("failed to read {}: {}", path.display(), e)))?;

        Self::from_bytes(&file_name, bytes)
    }

    /// Create a document from uploaded bytes and the name the client gave them
    pub fn from_bytes(file_name: &str, bytes: Vec<u8>) -> Result<Self> {
        let mime_type = detect_mime_type(file_name)?;

        let content = String::from_utf8(bytes)
            .map_err(|_| RagError::Document(format!("{} is not valid UTF-8", file_name)))?;

        Ok(Document {
            content: normalize_line_endings(&content),
            document_id: file_name.to_string(),
            mime_type,
        })
    }
}

/// Guess the MIME type from the file name; only text documents are accepted
fn detect_mime_type(file_name: &str) -> Result<String> {
    let mime = from_path(file_name).first_or_octet_stream();
    let mime_type = mime.to_string();
    debug!("Detected MIME type: {}", mime_type);

    if mime.type_() == mime_guess::mime::TEXT {
        Ok(mime_type)
    } else {
        Err(RagError::Document(format!(
            "unsupported document format: {}. Only markdown and text files are supported.",
            mime_type
        )))
    }
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_and_text_are_accepted() {
        let doc = Document::from_bytes("PLAN.md", b"# Plan\nsteps".to_vec()).unwrap();
        assert_eq!(doc.document_id, "PLAN.md");
        assert!(doc.mime_type.starts_with("text/"));

        let doc = Document::from_bytes("notes.txt", b"plain".to_vec()).unwrap();
        assert_eq!(doc.mime_type, "text/plain");
    }

    #[test]
    fn test_binary_formats_are_rejected() {
        let err = Document::from_bytes("report.pdf", b"%PDF-1.4".to_vec()).unwrap_err();
        assert!(matches!(err, RagError::Document(_)));
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let err = Document::from_bytes("bad.md", vec![0xff, 0xfe, 0x00]).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_windows_line_endings_are_normalized() {
        let doc = Document::from_bytes("a.md", b"one\r\n\r\ntwo".to_vec()).unwrap();
        assert_eq!(doc.content, "one\n\ntwo");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.md");
        fs::write(&path, "# Title\nbody text").unwrap();

        let doc = Document::from_file(&path).unwrap();
        assert_eq!(doc.document_id, "doc.md");
        assert_eq!(doc.content, "# Title\nbody text");

        let missing = Document::from_file(dir.path().join("missing.md")).unwrap_err();
        assert!(matches!(missing, RagError::Document(_)));
    }
}
