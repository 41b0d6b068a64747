//! Per-page text extraction from PDF bytes.
//!
//! The loader depends only on the [`PageExtractor`] trait; [`PdfExtractor`]
//! is the production implementation backed by `pdf-extract`. Extraction never
//! panics out of this module: a failed file is reported as an
//! [`ExtractError`] and the caller skips it.

use std::panic::{self, AssertUnwindSafe};

/// Extraction error. The pipeline logs it and skips the file.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("PDF extractor panicked: {0}")]
    Panicked(String),
}

/// Turns the bytes of one document into the text of each of its pages, in
/// page order. Pages without extractable text come back as empty strings so
/// page numbers stay aligned.
pub trait PageExtractor: Send + Sync {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError>;
}

/// [`PageExtractor`] backed by `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl PageExtractor for PdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        // pdf-extract panics on some malformed inputs.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
        }));
        match outcome {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
            Err(payload) => Err(ExtractError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pdf_returns_error() {
        let result = PdfExtractor.extract_pages(b"not a pdf");
        assert!(result.is_err());
    }

    #[test]
    fn empty_input_returns_error() {
        assert!(PdfExtractor.extract_pages(b"").is_err());
    }
}
