//! PDF access: signature checks, parsing, per-page validation and page-range extraction.

use super::errors::{ChunkingError, classify_format_error, classify_task_failure};
use super::tokens::PageTextSource;
use lopdf::{Document, Object, ObjectId};
use std::collections::BTreeSet;

const PDF_MAGIC: &[u8] = b"%PDF-";
/// Bytes at the end of the file searched for an encryption dictionary reference.
const TRAILER_SCAN_WINDOW: usize = 2048;

/// Best-effort name of the format `bytes` actually contain.
pub fn detect_format(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"PK\x03\x04") {
        "ZIP/Office document"
    } else if bytes.starts_with(b"<html") || bytes.starts_with(b"<!DOC") {
        "HTML"
    } else if bytes.starts_with(b"RIFF") {
        "RIFF (audio/video)"
    } else if bytes.starts_with(b"\xff\xd8\xff") {
        "JPEG image"
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "PNG image"
    } else {
        "unknown"
    }
}

/// Reject input that does not start with the PDF magic bytes.
pub fn validate_signature(bytes: &[u8]) -> Result<(), ChunkingError> {
    if bytes.len() < PDF_MAGIC.len() {
        return Err(
            ChunkingError::invalid_format("File is empty or too small to be a valid PDF")
                .with_detail("fileSize", bytes.len()),
        );
    }
    if !bytes.starts_with(PDF_MAGIC) {
        let detected = detect_format(bytes);
        return Err(ChunkingError::invalid_format(format!(
            "File is not a valid PDF (missing %PDF- signature); detected {detected}"
        ))
        .with_detail("detectedType", detected)
        .with_detail("firstBytes", hex::encode(&bytes[..bytes.len().min(10)]))
        .with_detail("fileSize", bytes.len()));
    }
    Ok(())
}

fn references_encryption(bytes: &[u8]) -> bool {
    let tail = &bytes[bytes.len().saturating_sub(TRAILER_SCAN_WINDOW)..];
    tail.windows(b"/Encrypt".len()).any(|window| window == b"/Encrypt")
}

/// Run document-sized lopdf work on the blocking pool, inside the caller's span.
///
/// Parsing and rendering never yield, so running them here keeps the async workers free and
/// lets a deadline around the caller fire while the work is still in progress.
pub async fn run_blocking<T, F>(task: &'static str, work: F) -> Result<T, ChunkingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ChunkingError> + Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        work()
    })
    .await
    .map_err(|err| classify_task_failure(task, &err))?
}

/// A parsed PDF with its pages in reading order.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    inner: Document,
    page_ids: Vec<ObjectId>,
}

impl PdfDocument {
    /// Check the signature, parse the document and refuse encrypted files.
    pub fn parse(bytes: &[u8]) -> Result<Self, ChunkingError> {
        validate_signature(bytes)?;
        let inner = Document::load_mem(bytes).map_err(|err| classify_format_error(&err.to_string()))?;
        if inner.trailer.get(b"Encrypt").is_ok() || references_encryption(bytes) {
            return Err(ChunkingError::encrypted(
                "PDF is encrypted and cannot be processed without a password",
            ));
        }
        let page_ids: Vec<ObjectId> = inner.get_pages().into_values().collect();
        tracing::trace!(pages = page_ids.len(), "Parsed PDF");
        Ok(Self { inner, page_ids })
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Verify page `index` can be copied: its dictionary and content streams must resolve.
    pub fn check_page(&self, index: usize) -> Result<(), ChunkingError> {
        let page_id = *self.page_ids.get(index).ok_or_else(|| {
            ChunkingError::corrupted(format!("Page {index} is out of range"))
                .with_detail("page", index)
        })?;
        let page = self.inner.get_dictionary(page_id).map_err(|err| {
            ChunkingError::corrupted(format!("Page {index} dictionary is unreadable: {err}"))
                .with_detail("page", index)
        })?;
        let Ok(contents) = page.get(b"Contents") else {
            // blank page
            return Ok(());
        };
        let unreadable = |detail: String| {
            ChunkingError::corrupted(format!("Page {index} content is unreadable: {detail}"))
                .with_detail("page", index)
        };
        let stream_ids: Vec<ObjectId> = match contents {
            Object::Reference(id) => match self.inner.get_object(*id) {
                Ok(Object::Array(items)) => items
                    .iter()
                    .map(|item| item.as_reference().map_err(|err| unreadable(err.to_string())))
                    .collect::<Result<_, _>>()?,
                Ok(_) => vec![*id],
                Err(err) => return Err(unreadable(format!("object {} {}: {err}", id.0, id.1))),
            },
            Object::Array(items) => items
                .iter()
                .map(|item| item.as_reference().map_err(|err| unreadable(err.to_string())))
                .collect::<Result<_, _>>()?,
            _ => return Err(unreadable("Contents is neither a stream nor an array".into())),
        };
        for stream_id in stream_ids {
            self.inner
                .get_object(stream_id)
                .and_then(|object| object.as_stream())
                .map_err(|err| {
                    unreadable(format!("stream {} {}: {err}", stream_id.0, stream_id.1))
                })?;
        }
        Ok(())
    }

    /// Build a standalone PDF containing only `pages` (0-based, any order), saved compressed.
    pub fn extract_pages(&self, pages: &[usize]) -> Result<Vec<u8>, ChunkingError> {
        let keep: BTreeSet<u32> = pages.iter().map(|page| *page as u32 + 1).collect();
        let remove: Vec<u32> = (1..=self.page_ids.len() as u32)
            .filter(|number| !keep.contains(number))
            .collect();

        let mut document = self.inner.clone();
        if !remove.is_empty() {
            document.delete_pages(&remove);
        }
        document.prune_objects();
        document.compress();

        let mut buffer = Vec::new();
        document.save_to(&mut buffer).map_err(|err| {
            ChunkingError::corrupted(format!("Failed to write chunk document: {err}"))
        })?;
        Ok(buffer)
    }
}

impl PageTextSource for PdfDocument {
    fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    fn page_text(&self, index: usize) -> Result<String, ChunkingError> {
        self.inner
            .extract_text(&[index as u32 + 1])
            .map_err(|err| classify_format_error(&err.to_string()).with_detail("page", index))
    }
}
