//! Label-driven text extraction for a single region.

use std::sync::Arc;

use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;

use super::formula::FormulaRecognizer;
use crate::layout::{BoundingBox, FormulaHeuristic, OcrEngine, Region, RegionLabel};

/// Prefix applied to table OCR output.
pub const TABLE_MARKER: &str = "TABLE:";
/// Prefix applied when formula OCR failed and plain OCR was used instead.
pub const FORMULA_FALLBACK_MARKER: &str = "FORMULA FALLBACK:";
/// Prefix applied to regions of unknown kind.
pub const UNKNOWN_BLOCK_MARKER: &str = "UNKNOWN BLOCK:";
/// Stand-in text for a region where OCR recognised nothing.
pub const UNREADABLE_MARKER: &str = "[unreadable region]";

/// Non-recoverable extraction failures; fatal to the page.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The region does not describe a usable area of the page image.
    #[error("region {bbox:?} does not overlap the {width}x{height} page image")]
    InvalidRegion {
        /// Offending box.
        bbox: BoundingBox,
        /// Page image width.
        width: u32,
        /// Page image height.
        height: u32,
    },
    /// The blocking OCR worker panicked or was cancelled.
    #[error("OCR worker failed: {0}")]
    Worker(String),
}

/// Which strategy produced a region's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    /// Generic OCR for text, titles, and tables.
    Ocr,
    /// Remote formula-to-markup OCR.
    FormulaOcr,
    /// Generic OCR used as a degraded path (formula failure or unknown region).
    FallbackOcr,
}

/// Extracted text for exactly one region.
#[derive(Debug, Clone)]
pub struct RegionText {
    /// Source region.
    pub region: Region,
    /// Extracted, never empty, text.
    pub text: String,
    /// Strategy that produced `text`.
    pub method: ExtractionMethod,
    /// Formula provider failure that forced a fallback, when one occurred.
    pub formula_error: Option<String>,
}

/// Routes each region to the extraction strategy matching its label.
#[derive(Clone)]
pub struct RegionExtractor {
    ocr: Arc<dyn OcrEngine>,
    formula: Arc<dyn FormulaRecognizer>,
    heuristic: FormulaHeuristic,
}

impl RegionExtractor {
    /// Build an extractor from its OCR providers and the formula pre-filter.
    pub fn new(
        ocr: Arc<dyn OcrEngine>,
        formula: Arc<dyn FormulaRecognizer>,
        heuristic: FormulaHeuristic,
    ) -> Self {
        Self {
            ocr,
            formula,
            heuristic,
        }
    }

    /// Extract the text of `region` from the full page image.
    ///
    /// Per-region OCR problems never escape: empty or failed OCR becomes
    /// [`UNREADABLE_MARKER`], and formula provider failures fall back to plain OCR. Only an
    /// unusable region box or a crashed worker is returned as an error.
    pub async fn extract(
        &self,
        region: &Region,
        page_image: &DynamicImage,
    ) -> Result<RegionText, ExtractionError> {
        let crop = crop_region(page_image, &region.bbox)?;

        let extracted = match region.label {
            RegionLabel::Text | RegionLabel::Title => {
                RegionText::new(region, self.ocr_text(crop).await?, ExtractionMethod::Ocr)
            }
            RegionLabel::Table => RegionText::new(
                region,
                format!("{TABLE_MARKER} {}", self.ocr_text(crop).await?),
                ExtractionMethod::Ocr,
            ),
            RegionLabel::Formula => self.extract_formula(region, crop).await?,
            RegionLabel::Unknown => {
                let verdict = self.heuristic.inspect(&crop).await;
                if verdict.is_formula {
                    tracing::debug!(
                        detection_order = region.detection_order,
                        "Promoted unknown region to formula"
                    );
                    self.extract_formula(region, crop).await?
                } else {
                    let recognized = verdict
                        .recognized
                        .map(|text| text.trim().to_string())
                        .filter(|text| !text.is_empty());
                    let text = match recognized {
                        Some(text) => text,
                        None => self.ocr_text(crop).await?,
                    };
                    RegionText::new(
                        region,
                        format!("{UNKNOWN_BLOCK_MARKER} {text}"),
                        ExtractionMethod::FallbackOcr,
                    )
                }
            }
        };

        Ok(extracted)
    }

    async fn extract_formula(
        &self,
        region: &Region,
        crop: DynamicImage,
    ) -> Result<RegionText, ExtractionError> {
        match self.formula.recognize_math(&crop).await {
            Ok(markup) => Ok(RegionText::new(
                region,
                format!("$$ {} $$", markup.trim()),
                ExtractionMethod::FormulaOcr,
            )),
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    detection_order = region.detection_order,
                    "Formula OCR failed; falling back to plain OCR"
                );
                let mut fallback = RegionText::new(
                    region,
                    format!("{FORMULA_FALLBACK_MARKER} {}", self.ocr_text(crop).await?),
                    ExtractionMethod::FallbackOcr,
                );
                fallback.formula_error = Some(error.to_string());
                Ok(fallback)
            }
        }
    }

    /// Run generic OCR off the async scheduler; recognition failures read as unreadable text.
    async fn ocr_text(&self, crop: DynamicImage) -> Result<String, ExtractionError> {
        let ocr = Arc::clone(&self.ocr);
        let recognized = tokio::task::spawn_blocking(move || ocr.recognize(&crop))
            .await
            .map_err(|error| ExtractionError::Worker(error.to_string()))?;

        let text = match recognized {
            Ok(text) => text.trim().to_string(),
            Err(error) => {
                tracing::warn!(error = %error, "OCR failed for region");
                String::new()
            }
        };

        if text.is_empty() {
            Ok(UNREADABLE_MARKER.to_string())
        } else {
            Ok(text)
        }
    }
}

impl RegionText {
    fn new(region: &Region, text: String, method: ExtractionMethod) -> Self {
        Self {
            region: region.clone(),
            text,
            method,
            formula_error: None,
        }
    }
}

/// Cut a region out of the page image, clamping the box to the image bounds.
pub fn crop_region(
    page_image: &DynamicImage,
    bbox: &BoundingBox,
) -> Result<DynamicImage, ExtractionError> {
    let (width, height) = (page_image.width(), page_image.height());
    let (x, y, crop_width, crop_height) = bbox
        .pixel_bounds(width, height)
        .ok_or(ExtractionError::InvalidRegion {
            bbox: *bbox,
            width,
            height,
        })?;
    Ok(page_image.crop_imm(x, y, crop_width, crop_height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::formula::FormulaProviderError;
    use crate::layout::OcrError;
    use async_trait::async_trait;

    struct ScriptedOcr(&'static str);

    impl OcrEngine for ScriptedOcr {
        fn recognize(&self, _crop: &DynamicImage) -> Result<String, OcrError> {
            Ok(self.0.to_string())
        }
    }

    struct BrokenOcr;

    impl OcrEngine for BrokenOcr {
        fn recognize(&self, _crop: &DynamicImage) -> Result<String, OcrError> {
            Err(OcrError::Recognition("no text layer".into()))
        }
    }

    struct ScriptedFormula(Option<&'static str>);

    #[async_trait]
    impl FormulaRecognizer for ScriptedFormula {
        async fn recognize_math(
            &self,
            _crop: &DynamicImage,
        ) -> Result<String, FormulaProviderError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| FormulaProviderError::Unavailable("connection refused".into()))
        }
    }

    fn extractor(ocr: &'static str, formula: Option<&'static str>) -> RegionExtractor {
        let ocr: Arc<dyn OcrEngine> = Arc::new(ScriptedOcr(ocr));
        RegionExtractor::new(
            Arc::clone(&ocr),
            Arc::new(ScriptedFormula(formula)),
            FormulaHeuristic::new(ocr),
        )
    }

    fn region(label: RegionLabel) -> Region {
        Region {
            bbox: BoundingBox::new(0.0, 0.0, 20.0, 10.0),
            label,
            confidence: 0.9,
            detection_order: 0,
        }
    }

    fn page_image() -> DynamicImage {
        DynamicImage::new_rgb8(40, 40)
    }

    #[tokio::test]
    async fn text_and_title_use_plain_ocr() {
        let extractor = extractor("Introduction", None);
        for label in [RegionLabel::Text, RegionLabel::Title] {
            let result = extractor
                .extract(&region(label), &page_image())
                .await
                .expect("text");
            assert_eq!(result.text, "Introduction");
            assert_eq!(result.method, ExtractionMethod::Ocr);
        }
    }

    #[tokio::test]
    async fn tables_are_marked() {
        let result = extractor("a | b", None)
            .extract(&region(RegionLabel::Table), &page_image())
            .await
            .expect("table");
        assert_eq!(result.text, "TABLE: a | b");
        assert_eq!(result.method, ExtractionMethod::Ocr);
    }

    #[tokio::test]
    async fn formulas_are_wrapped_in_block_delimiters() {
        let result = extractor("unused", Some("x^2+y^2=1"))
            .extract(&region(RegionLabel::Formula), &page_image())
            .await
            .expect("formula");
        assert_eq!(result.text, "$$ x^2+y^2=1 $$");
        assert_eq!(result.method, ExtractionMethod::FormulaOcr);
        assert!(result.formula_error.is_none());
    }

    #[tokio::test]
    async fn formula_provider_failure_falls_back_to_ocr() {
        let result = extractor("x2 + y2 = 1", None)
            .extract(&region(RegionLabel::Formula), &page_image())
            .await
            .expect("fallback");
        assert!(result.text.starts_with(FORMULA_FALLBACK_MARKER));
        assert!(result.text.contains("x2 + y2 = 1"));
        assert_eq!(result.method, ExtractionMethod::FallbackOcr);
        assert!(result.formula_error.is_some());
    }

    #[tokio::test]
    async fn unknown_region_with_math_signal_is_promoted() {
        let result = extractor("a^2 = b_1", Some("a^{2} = b_{1}"))
            .extract(&region(RegionLabel::Unknown), &page_image())
            .await
            .expect("promoted");
        assert_eq!(result.method, ExtractionMethod::FormulaOcr);
        assert_eq!(result.text, "$$ a^{2} = b_{1} $$");
    }

    #[tokio::test]
    async fn unknown_region_without_math_signal_is_marked() {
        let result = extractor("Figure 2", Some("unused"))
            .extract(&region(RegionLabel::Unknown), &page_image())
            .await
            .expect("unknown");
        assert_eq!(result.text, "UNKNOWN BLOCK: Figure 2");
        assert_eq!(result.method, ExtractionMethod::FallbackOcr);
    }

    #[tokio::test]
    async fn failed_ocr_never_yields_empty_text() {
        let ocr: Arc<dyn OcrEngine> = Arc::new(BrokenOcr);
        let extractor = RegionExtractor::new(
            Arc::clone(&ocr),
            Arc::new(ScriptedFormula(None)),
            FormulaHeuristic::new(ocr),
        );
        for label in [
            RegionLabel::Text,
            RegionLabel::Title,
            RegionLabel::Table,
            RegionLabel::Formula,
            RegionLabel::Unknown,
        ] {
            let result = extractor
                .extract(&region(label), &page_image())
                .await
                .expect("degraded text");
            assert!(!result.text.trim().is_empty());
            assert!(result.text.contains(UNREADABLE_MARKER));
        }
    }

    #[tokio::test]
    async fn region_outside_page_is_an_error() {
        let mut outside = region(RegionLabel::Text);
        outside.bbox = BoundingBox::new(100.0, 100.0, 120.0, 120.0);
        let error = extractor("text", None)
            .extract(&outside, &page_image())
            .await
            .expect_err("invalid region");
        assert!(matches!(error, ExtractionError::InvalidRegion { .. }));
    }

    struct CountingOcr {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl OcrEngine for CountingOcr {
        fn recognize(&self, _crop: &DynamicImage) -> Result<String, OcrError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok("Figure 4: apparatus".to_string())
        }
    }

    #[tokio::test]
    async fn unknown_prose_region_is_read_once() {
        let counting = Arc::new(CountingOcr {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let ocr: Arc<dyn OcrEngine> = counting.clone();
        let extractor = RegionExtractor::new(
            Arc::clone(&ocr),
            Arc::new(ScriptedFormula(None)),
            FormulaHeuristic::new(ocr),
        );

        let result = extractor
            .extract(&region(RegionLabel::Unknown), &page_image())
            .await
            .expect("unknown");

        assert_eq!(result.text, "UNKNOWN BLOCK: Figure 4: apparatus");
        assert_eq!(counting.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
