//! Document staging: validate uploaded bytes and give pdfium a file to open.
//!
//! pdfium reads most reliably from a file path, so the document is written into
//! a [`TempDir`] owned by [`StagedDocument`]. Dropping the value removes the
//! directory, which covers every exit path of a rasterization run: success,
//! early `?` return, or a panic inside the blocking task.

use crate::error::IngestError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Leading bytes of every PDF file.
pub const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A document written to a private temporary directory.
pub struct StagedDocument {
    path: PathBuf,
    _temp_dir: TempDir,
}

impl StagedDocument {
    /// Path of the staged PDF file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that disappears when this value is dropped.
    pub fn dir(&self) -> &Path {
        self._temp_dir.path()
    }
}

/// Check if the bytes start with the PDF header.
pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.len() >= PDF_MAGIC.len() && &bytes[..PDF_MAGIC.len()] == PDF_MAGIC
}

/// Reject anything that is obviously not a PDF before the engine sees it.
pub fn validate_document(bytes: &[u8]) -> Result<(), IngestError> {
    if bytes.is_empty() {
        return Err(IngestError::DocumentInvalid {
            reason: "document is empty (0 bytes)".into(),
        });
    }
    if !is_pdf(bytes) {
        let head: Vec<u8> = bytes.iter().take(4).copied().collect();
        return Err(IngestError::DocumentInvalid {
            reason: format!("missing %PDF header, first bytes: {head:?}"),
        });
    }
    Ok(())
}

/// Validate `bytes` and write them to `input.pdf` inside a fresh temp dir.
pub fn stage_document(bytes: &[u8], episode_id: &str) -> Result<StagedDocument, IngestError> {
    validate_document(bytes)?;

    let temp_dir = tempfile::Builder::new()
        .prefix(&format!("pagecast-{episode_id}-"))
        .tempdir()
        .map_err(|e| IngestError::Internal(format!("tempdir: {e}")))?;
    let path = temp_dir.path().join("input.pdf");

    let mut file = std::fs::File::create(&path)
        .map_err(|e| IngestError::Internal(format!("staging file: {e}")))?;
    file.write_all(bytes)
        .map_err(|e| IngestError::Internal(format!("staging write: {e}")))?;

    debug!(
        "Staged {} bytes for episode {} at {}",
        bytes.len(),
        episode_id,
        path.display()
    );

    Ok(StagedDocument {
        path,
        _temp_dir: temp_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pdf() {
        assert!(is_pdf(b"%PDF-1.7\n..."));
        assert!(!is_pdf(b"PK\x03\x04"));
        assert!(!is_pdf(b"%PD"));
        assert!(!is_pdf(b""));
    }

    #[test]
    fn non_pdf_is_document_invalid() {
        let err = validate_document(b"<html></html>").unwrap_err();
        assert!(matches!(err, IngestError::DocumentInvalid { .. }));
        let err = validate_document(b"").unwrap_err();
        assert!(matches!(err, IngestError::DocumentInvalid { .. }));
    }

    #[test]
    fn staged_dir_is_removed_on_drop() {
        let staged = stage_document(b"%PDF-1.4\n%%EOF\n", "ep-1").expect("stage");
        let dir = staged.dir().to_path_buf();
        assert!(staged.path().exists());
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"%PDF-1.4\n%%EOF\n");
        drop(staged);
        assert!(!dir.exists());
    }

    #[test]
    fn invalid_document_is_never_staged() {
        assert!(stage_document(b"GIF89a", "ep-1").is_err());
    }
}
