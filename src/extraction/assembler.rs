//! Joins region outputs into page transcripts and page transcripts into a document.

use super::extractor::RegionText;

/// Separator between regions of one page.
pub const REGION_SEPARATOR: &str = "\n";
/// Separator between pages of a document.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// Text of one page in reading (top-to-bottom) order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTranscript {
    /// Zero-based page index.
    pub page_index: usize,
    /// Region texts joined by [`REGION_SEPARATOR`].
    pub text: String,
}

/// Ordered concatenation of page transcripts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentTranscript {
    text: String,
    page_count: usize,
}

impl DocumentTranscript {
    /// Wrap text that was transcribed elsewhere (for example a text layer or a prior run).
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            page_count: 1,
        }
    }

    /// Full transcript text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of pages that contributed to the transcript.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// True when no page produced any text.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Join the region texts of one page; `regions` must already be in region order.
pub fn assemble_page(page_index: usize, regions: &[RegionText]) -> PageTranscript {
    let text = regions
        .iter()
        .map(|region| region.text.as_str())
        .collect::<Vec<_>>()
        .join(REGION_SEPARATOR);
    PageTranscript { page_index, text }
}

/// Join page transcripts, in the order given, with a blank line between pages.
pub fn assemble_document(pages: &[PageTranscript]) -> DocumentTranscript {
    let text = pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR);
    DocumentTranscript {
        text,
        page_count: pages.len(),
    }
}
