//! Region classification on top of a layout-detection provider.

use std::sync::Arc;

use super::types::{DetectionError, LayoutDetector, Page, RawDetection, Region, RegionLabel};

/// Default minimum detection score.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Turns a page image into vertically ordered, labelled regions.
///
/// The classifier owns the confidence threshold and the mapping from the provider's class
/// table onto [`RegionLabel`]; the provider itself only reports raw boxes.
pub struct RegionClassifier {
    detector: Arc<dyn LayoutDetector>,
    threshold: f32,
    labels: Vec<RegionLabel>,
}

impl RegionClassifier {
    /// Build a classifier with the given threshold, clamped into `[0, 1]`.
    pub fn new(detector: Arc<dyn LayoutDetector>, threshold: f32) -> Self {
        let labels = detector
            .class_names()
            .iter()
            .map(|name| RegionLabel::from_class_name(name))
            .collect();
        Self {
            detector,
            threshold: if threshold.is_finite() {
                threshold.clamp(0.0, 1.0)
            } else {
                DEFAULT_CONFIDENCE_THRESHOLD
            },
            labels,
        }
    }

    /// Confidence threshold in effect.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Detect and label the regions of one page, top of page first.
    ///
    /// Detections scoring below the threshold are dropped. Regions sharing a top edge keep
    /// the detector's emission order. A blank page yields an empty list. Provider failures
    /// are not retried.
    pub async fn classify(&self, page: &Page) -> Result<Vec<Region>, DetectionError> {
        let detections = self.detector.detect(&page.image).await?;
        let emitted = detections.len();
        let regions = self.label_detections(detections);
        tracing::debug!(
            page = page.index,
            emitted,
            kept = regions.len(),
            threshold = self.threshold,
            "Classified page regions"
        );
        Ok(regions)
    }

    fn label_detections(&self, detections: Vec<RawDetection>) -> Vec<Region> {
        let mut regions: Vec<Region> = detections
            .into_iter()
            .enumerate()
            .filter(|(_, detection)| detection.score >= self.threshold)
            .map(|(order, detection)| Region {
                bbox: detection.bbox,
                label: self.label_for(detection.class_id),
                confidence: detection.score.clamp(0.0, 1.0),
                detection_order: order,
            })
            .collect();

        // `sort_by` is stable, which is what keeps ties in emission order.
        regions.sort_by(|left, right| left.bbox.y1.total_cmp(&right.bbox.y1));
        regions
    }

    fn label_for(&self, class_id: usize) -> RegionLabel {
        self.labels
            .get(class_id)
            .copied()
            .unwrap_or(RegionLabel::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::types::BoundingBox;
    use async_trait::async_trait;
    use image::DynamicImage;

    struct FixedDetector {
        names: Vec<String>,
        detections: Vec<RawDetection>,
        fail: bool,
    }

    #[async_trait]
    impl LayoutDetector for FixedDetector {
        async fn detect(&self, _image: &DynamicImage) -> Result<Vec<RawDetection>, DetectionError> {
            if self.fail {
                return Err(DetectionError::Provider("model offline".into()));
            }
            Ok(self.detections.clone())
        }

        fn class_names(&self) -> &[String] {
            &self.names
        }
    }

    fn detection(y1: f32, score: f32, class_id: usize) -> RawDetection {
        RawDetection {
            bbox: BoundingBox::new(0.0, y1, 50.0, y1 + 10.0),
            score,
            class_id,
        }
    }

    fn classifier(detections: Vec<RawDetection>, fail: bool) -> RegionClassifier {
        let detector = FixedDetector {
            names: vec!["title".into(), "plain text".into(), "isolate_formula".into()],
            detections,
            fail,
        };
        RegionClassifier::new(Arc::new(detector), DEFAULT_CONFIDENCE_THRESHOLD)
    }

    fn page() -> Page {
        Page::new(0, DynamicImage::new_rgb8(64, 64))
    }

    #[tokio::test]
    async fn regions_are_filtered_labelled_and_sorted() {
        let classifier = classifier(
            vec![
                detection(40.0, 0.9, 1),
                detection(5.0, 0.8, 0),
                detection(20.0, 0.3, 1),
                detection(25.0, 0.7, 2),
                detection(30.0, 0.95, 9),
            ],
            false,
        );

        let regions = classifier.classify(&page()).await.expect("regions");
        let tops: Vec<f32> = regions.iter().map(|region| region.bbox.y1).collect();
        assert_eq!(tops, vec![5.0, 25.0, 30.0, 40.0]);
        let labels: Vec<RegionLabel> = regions.iter().map(|region| region.label).collect();
        assert_eq!(
            labels,
            vec![
                RegionLabel::Title,
                RegionLabel::Formula,
                RegionLabel::Unknown,
                RegionLabel::Text
            ]
        );
    }

    #[tokio::test]
    async fn score_equal_to_threshold_is_kept() {
        let classifier = classifier(
            vec![
                detection(10.0, DEFAULT_CONFIDENCE_THRESHOLD, 1),
                detection(20.0, 0.49, 1),
            ],
            false,
        );

        let regions = classifier.classify(&page()).await.expect("regions");
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox.y1, 10.0);
        assert_eq!(regions[0].confidence, DEFAULT_CONFIDENCE_THRESHOLD);
    }

    #[tokio::test]
    async fn ties_keep_detector_order() {
        let classifier = classifier(
            vec![
                detection(10.0, 0.9, 1),
                detection(10.0, 0.9, 0),
                detection(10.0, 0.9, 2),
            ],
            false,
        );

        let first = classifier.classify(&page()).await.expect("regions");
        let second = classifier.classify(&page()).await.expect("regions");
        let orders: Vec<usize> = first.iter().map(|region| region.detection_order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn blank_page_yields_no_regions() {
        let classifier = classifier(Vec::new(), false);
        assert!(classifier.classify(&page()).await.expect("regions").is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_propagated() {
        let classifier = classifier(vec![detection(1.0, 0.9, 0)], true);
        let error = classifier.classify(&page()).await.expect_err("failure");
        assert!(matches!(error, DetectionError::Provider(_)));
    }

    #[test]
    fn threshold_is_clamped() {
        let classifier = RegionClassifier::new(
            Arc::new(FixedDetector {
                names: Vec::new(),
                detections: Vec::new(),
                fail: false,
            }),
            1.7,
        );
        assert_eq!(classifier.threshold(), 1.0);
    }
}
