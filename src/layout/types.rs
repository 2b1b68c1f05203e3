//! Page, region, and provider-facing types shared by layout analysis and extraction.

use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A rasterised page of the source document.
#[derive(Debug, Clone)]
pub struct Page {
    /// Zero-based position of the page within the document.
    pub index: usize,
    /// Rendered page bitmap.
    pub image: DynamicImage,
}

impl Page {
    /// Wrap an already decoded bitmap.
    pub fn new(index: usize, image: DynamicImage) -> Self {
        Self { index, image }
    }

    /// Decode a page from encoded image bytes (PNG or JPEG).
    pub fn from_encoded(index: usize, bytes: &[u8]) -> Result<Self, image::ImageError> {
        Ok(Self {
            index,
            image: image::load_from_memory(bytes)?,
        })
    }
}

/// Axis-aligned box in page pixel coordinates; `(x1, y1)` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x1: f32,
    /// Top edge.
    pub y1: f32,
    /// Right edge.
    pub x2: f32,
    /// Bottom edge.
    pub y2: f32,
}

impl BoundingBox {
    /// Construct a box from its corner coordinates.
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Width of the box, zero when the corners are inverted.
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    /// Height of the box, zero when the corners are inverted.
    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    fn is_finite(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|value| value.is_finite())
    }

    /// Clamp the box to an image of the given size and return integer crop bounds
    /// `(x, y, width, height)`, or `None` when nothing of the box lies on the image.
    pub fn pixel_bounds(
        &self,
        image_width: u32,
        image_height: u32,
    ) -> Option<(u32, u32, u32, u32)> {
        if !self.is_finite() {
            return None;
        }
        let clamp_x = |value: f32| value.clamp(0.0, image_width as f32);
        let clamp_y = |value: f32| value.clamp(0.0, image_height as f32);

        let left = clamp_x(self.x1).floor() as u32;
        let top = clamp_y(self.y1).floor() as u32;
        let right = clamp_x(self.x2).ceil() as u32;
        let bottom = clamp_y(self.y2).ceil() as u32;

        if right <= left || bottom <= top {
            return None;
        }
        Some((left, top, right - left, bottom - top))
    }
}

/// Closed vocabulary of region labels understood by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionLabel {
    /// Body text.
    Text,
    /// Heading or section title.
    Title,
    /// Tabular content.
    Table,
    /// Display or inline mathematics.
    Formula,
    /// Anything the detector could not place in the vocabulary.
    Unknown,
}

impl RegionLabel {
    /// Map a detector class name onto the fixed vocabulary.
    ///
    /// Layout models disagree on naming (`plain text`, `isolate_formula`, `equation`, ...),
    /// so matching is case-insensitive and tolerant of separators.
    pub fn from_class_name(name: &str) -> Self {
        let normalized = name.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "text" | "plain text" | "paragraph" | "list" | "caption" | "figure caption"
            | "table caption" | "footnote" => Self::Text,
            "title" | "section header" | "doc title" | "paragraph title" => Self::Title,
            "table" => Self::Table,
            "formula" | "isolate formula" | "equation" | "display formula" | "inline formula" => {
                Self::Formula
            }
            _ => Self::Unknown,
        }
    }

    /// Lowercase label name as stored in logs and metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Title => "title",
            Self::Table => "table",
            Self::Formula => "formula",
            Self::Unknown => "unknown",
        }
    }
}

/// A labelled area of a page produced by the region classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Location on the page.
    pub bbox: BoundingBox,
    /// Semantic label.
    pub label: RegionLabel,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
    /// Position in the detector's emission order, used to break vertical ties.
    pub detection_order: usize,
}

/// Raw detection emitted by a layout provider before thresholding and labelling.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// Detected box.
    pub bbox: BoundingBox,
    /// Detection score.
    pub score: f32,
    /// Index into the provider's label table.
    pub class_id: usize,
}

/// Failure of the layout-detection provider; fatal to the page.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// Provider could not run inference on the page.
    #[error("layout detection failed: {0}")]
    Provider(String),
    /// Provider returned something the classifier cannot interpret.
    #[error("layout detector returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Failure of the OCR provider.
#[derive(Debug, Error)]
pub enum OcrError {
    /// OCR engine failed to recognise the crop.
    #[error("OCR failed: {0}")]
    Recognition(String),
}

/// Layout-detection capability provider.
#[async_trait]
pub trait LayoutDetector: Send + Sync {
    /// Detect regions on a page image.
    async fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, DetectionError>;

    /// Class names indexed by `RawDetection::class_id`.
    fn class_names(&self) -> &[String];
}

/// Optical character recognition capability provider.
///
/// Recognition is CPU-bound, so implementations are synchronous and callers dispatch them
/// onto the blocking pool.
pub trait OcrEngine: Send + Sync {
    /// Recognise the text contained in an image crop. Best effort; may return an empty string.
    fn recognize(&self, crop: &DynamicImage) -> Result<String, OcrError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_map_onto_vocabulary() {
        assert_eq!(RegionLabel::from_class_name("Plain Text"), RegionLabel::Text);
        assert_eq!(RegionLabel::from_class_name("title"), RegionLabel::Title);
        assert_eq!(RegionLabel::from_class_name("table"), RegionLabel::Table);
        assert_eq!(
            RegionLabel::from_class_name("isolate_formula"),
            RegionLabel::Formula
        );
        assert_eq!(RegionLabel::from_class_name("figure"), RegionLabel::Unknown);
        assert_eq!(RegionLabel::from_class_name("abandon"), RegionLabel::Unknown);
    }

    #[test]
    fn pixel_bounds_clamp_to_image() {
        let bbox = BoundingBox::new(-5.0, 10.0, 120.0, 30.5);
        assert_eq!(bbox.pixel_bounds(100, 100), Some((0, 10, 100, 21)));
    }

    #[test]
    fn pixel_bounds_reject_degenerate_boxes() {
        assert!(BoundingBox::new(50.0, 50.0, 50.0, 80.0).pixel_bounds(100, 100).is_none());
        assert!(BoundingBox::new(150.0, 0.0, 180.0, 10.0).pixel_bounds(100, 100).is_none());
        assert!(BoundingBox::new(f32::NAN, 0.0, 10.0, 10.0).pixel_bounds(100, 100).is_none());
    }
}
