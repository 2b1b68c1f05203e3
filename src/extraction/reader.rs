//! Page-by-page transcription: classify regions, extract each one, assemble the document.

use thiserror::Error;

use super::assembler::{DocumentTranscript, PageTranscript, assemble_document, assemble_page};
use super::extractor::{ExtractionError, ExtractionMethod, RegionExtractor};
use crate::layout::{DetectionError, Page, RegionClassifier};

/// Structural failure that aborts a page, and with it the document.
#[derive(Debug, Error)]
pub enum PageError {
    /// Layout detection failed for the page.
    #[error("page {page}: {source}")]
    Detection {
        /// Zero-based page index.
        page: usize,
        /// Underlying detection failure.
        #[source]
        source: DetectionError,
    },
    /// A region could not be extracted for a non-OCR reason.
    #[error("page {page}: {source}")]
    Extraction {
        /// Zero-based page index.
        page: usize,
        /// Underlying extraction failure.
        #[source]
        source: ExtractionError,
    },
}

/// Transcribes rasterised pages into a [`DocumentTranscript`].
pub struct DocumentReader {
    classifier: RegionClassifier,
    extractor: RegionExtractor,
}

impl DocumentReader {
    /// Compose a reader from its classifier and extractor.
    pub fn new(classifier: RegionClassifier, extractor: RegionExtractor) -> Self {
        Self {
            classifier,
            extractor,
        }
    }

    /// Transcribe one page. Every kept region contributes exactly one line group.
    pub async fn transcribe_page(&self, page: &Page) -> Result<PageTranscript, PageError> {
        let regions = self
            .classifier
            .classify(page)
            .await
            .map_err(|source| PageError::Detection {
                page: page.index,
                source,
            })?;

        let mut texts = Vec::with_capacity(regions.len());
        for region in &regions {
            let text = self
                .extractor
                .extract(region, &page.image)
                .await
                .map_err(|source| PageError::Extraction {
                    page: page.index,
                    source,
                })?;
            texts.push(text);
        }

        let fallbacks = texts
            .iter()
            .filter(|text| text.method == ExtractionMethod::FallbackOcr)
            .count();
        tracing::debug!(
            page = page.index,
            regions = texts.len(),
            fallbacks,
            "Page transcribed"
        );

        Ok(assemble_page(page.index, &texts))
    }

    /// Transcribe all pages in order; the first structural page failure aborts the document.
    pub async fn transcribe(&self, pages: &[Page]) -> Result<DocumentTranscript, PageError> {
        let mut transcripts = Vec::with_capacity(pages.len());
        for page in pages {
            transcripts.push(self.transcribe_page(page).await?);
        }
        let document = assemble_document(&transcripts);
        tracing::info!(
            pages = document.page_count(),
            characters = document.as_str().chars().count(),
            "Document transcribed"
        );
        Ok(document)
    }
}
