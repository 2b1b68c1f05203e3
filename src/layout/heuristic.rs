//! Cheap OCR-signal test that promotes ambiguous regions to formulas.

use std::sync::Arc;

use image::DynamicImage;

use super::types::OcrEngine;

/// Characters and tokens that suggest mathematical content.
pub const MATH_INDICATORS: &[&str] = &[
    "=", "^", "_", "\\frac", "{", "}", "∑", "∫", "∂", "√", "≠", "≤", "≥", "∈", "⊂", "∞",
];

/// Minimum indicator count for text to be treated as mathematical.
pub const MATH_SIGNAL_THRESHOLD: usize = 2;

/// Count non-overlapping occurrences of every math indicator in `text`.
pub fn count_math_indicators(text: &str) -> usize {
    MATH_INDICATORS
        .iter()
        .map(|indicator| text.matches(indicator).count())
        .sum()
}

/// Whether `text` carries enough math indicators to be considered mathematical.
pub fn has_math_signal(text: &str) -> bool {
    count_math_indicators(text) >= MATH_SIGNAL_THRESHOLD
}

/// Secondary classifier catching formulas the layout model labelled as unknown.
///
/// This is a pre-filter, not formula recognition: it runs a plain OCR pass on the crop and
/// looks for math indicators in the recognised text.
#[derive(Clone)]
pub struct FormulaHeuristic {
    ocr: Arc<dyn OcrEngine>,
}

impl FormulaHeuristic {
    /// Build the heuristic on top of an OCR engine (ideally a fast, low-accuracy one).
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self { ocr }
    }

    /// Decide whether the crop looks like a formula.
    ///
    /// Any OCR failure, including a crashed worker, answers `false`.
    pub async fn is_formula(&self, crop: &DynamicImage) -> bool {
        self.inspect(crop).await.is_formula
    }

    /// Run the OCR pass and keep its text alongside the verdict, so a negative answer can
    /// reuse the recognised text instead of reading the crop again.
    pub async fn inspect(&self, crop: &DynamicImage) -> FormulaVerdict {
        let ocr = Arc::clone(&self.ocr);
        let crop = crop.clone();
        match tokio::task::spawn_blocking(move || ocr.recognize(&crop)).await {
            Ok(Ok(text)) => {
                let indicators = count_math_indicators(&text);
                tracing::trace!(indicators, "Formula heuristic evaluated crop");
                FormulaVerdict {
                    is_formula: indicators >= MATH_SIGNAL_THRESHOLD,
                    recognized: Some(text),
                }
            }
            Ok(Err(error)) => {
                tracing::debug!(error = %error, "Formula heuristic OCR failed; treating as text");
                FormulaVerdict::default()
            }
            Err(error) => {
                tracing::debug!(
                    error = %error,
                    "Formula heuristic worker failed; treating as text"
                );
                FormulaVerdict::default()
            }
        }
    }
}

/// Outcome of [`FormulaHeuristic::inspect`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormulaVerdict {
    /// Whether the crop should be routed to formula recognition.
    pub is_formula: bool,
    /// Text read by the OCR pass; `None` when recognition failed.
    pub recognized: Option<String>,
}
