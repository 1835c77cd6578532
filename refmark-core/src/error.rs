use thiserror::Error;

use crate::PageNumber;

/// Failures of a highlight request. Not finding the passage is not an error;
/// it is reported as `HighlightOutcome::NotFound`.
#[derive(Debug, Error)]
pub enum HighlightError {
    #[error("failed to load document {locator}: {reason}")]
    Load { locator: String, reason: String },

    #[error("page {page} out of range (document has {page_count} pages)")]
    PageRange { page: PageNumber, page_count: usize },

    #[error("failed to extract text from page {page}: {reason}")]
    Extraction { page: PageNumber, reason: String },

    #[error("failed to render page {page}: {reason}")]
    Render { page: PageNumber, reason: String },

    #[error("render of page {page} was superseded")]
    RenderCancelled { page: PageNumber },

    #[error("passage not found; text extraction failed on pages {pages:?}")]
    ExtractionFailed { pages: Vec<PageNumber> },

    #[error("reference {index} out of range ({count} references)")]
    ReferenceRange { index: usize, count: usize },
}

impl HighlightError {
    pub fn is_superseded(&self) -> bool {
        matches!(self, HighlightError::RenderCancelled { .. })
    }
}
