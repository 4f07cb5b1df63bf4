// THEORY:
// The `classifier` module turns an ROI sample into a verdict. There are two
// interchangeable ways to reach that verdict, and the rest of the system must not
// care which one is active.
//
// Key architectural principles:
// 1.  **One Contract**: Both strategies implement `Classifier` and return the same
//     `Classification` shape. The pipeline holds a `Box<dyn Classifier>` and is
//     written once against the trait.
// 2.  **Detector Strategy**: The detection model is a black box behind the
//     `Detector` trait. This module only decides which of its detections counts:
//     confident enough, centered inside the ROI, highest confidence first and the
//     lexically smallest label on a tie. The model returns boxes in no particular
//     order, so the tie-break is what makes the verdict reproducible.
// 3.  **Difference Strategy**: Compares the ROI against a saved baseline in HSV
//     space and thresholds the mean difference. Without a baseline there is
//     nothing to compare against, and the verdict says so explicitly.
// 4.  **Four Outcomes, Not Two**: `NoProduct` and `AwaitingBaseline` exist so an
//     empty line or an unconfigured rig is never mistaken for a good product.

use image::{RgbImage, imageops};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core_modules::hsv::hsv::{MeanDiff, mean_difference};
use crate::core_modules::roi::{Roi, RoiSample, match_score};
use crate::error::ClassificationError;

/// The verdict for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Normal,
    Defective,
    /// The presence check failed; the ROI does not hold a product.
    NoProduct,
    /// The difference strategy has no baseline to compare against yet.
    AwaitingBaseline,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Normal => "Normal",
            Outcome::Defective => "Defective",
            Outcome::NoProduct => "No product detected",
            Outcome::AwaitingBaseline => "Awaiting baseline",
        }
    }

    /// Only real inspection verdicts may be written to the event log.
    pub fn is_loggable(&self) -> bool {
        matches!(self, Outcome::Normal | Outcome::Defective)
    }
}

/// Axis-aligned box in frame pixel coordinates, corner form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Model confidence in [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Strategy-specific evidence behind a verdict, kept for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Diagnostic {
    None,
    Presence { match_score: f64 },
    Difference { mean_diff: MeanDiff, match_score: Option<f64> },
    Detections(Vec<Detection>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub outcome: Outcome,
    pub label: Option<String>,
    pub confidence: Option<f64>,
    pub diagnostic: Diagnostic,
}

impl Classification {
    pub fn awaiting_baseline() -> Self {
        Self {
            outcome: Outcome::AwaitingBaseline,
            label: None,
            confidence: None,
            diagnostic: Diagnostic::None,
        }
    }

    /// The label written to the event log: the explicit label, else the outcome name.
    pub fn log_label(&self) -> &str {
        match self.label.as_deref() {
            Some(label) if !label.trim().is_empty() => label,
            _ => self.outcome.as_str(),
        }
    }
}

/// The external detection capability. Implementations make no ordering promise.
pub trait Detector {
    fn detect(&mut self, image: &RgbImage, confidence_cutoff: f32) -> Result<Vec<Detection>, ClassificationError>;
}

impl<F> Detector for F
where
    F: FnMut(&RgbImage, f32) -> Result<Vec<Detection>, ClassificationError>,
{
    fn detect(&mut self, image: &RgbImage, confidence_cutoff: f32) -> Result<Vec<Detection>, ClassificationError> {
        self(image, confidence_cutoff)
    }
}

pub trait Classifier {
    fn classify(&mut self, sample: &RoiSample<'_>) -> Result<Classification, ClassificationError>;

    /// Replaces the reference image. Strategies without one ignore it.
    fn rebase(&mut self, _baseline: RgbImage) {}

    fn name(&self) -> &'static str;
}

/// Which image the detector is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorInput {
    #[default]
    FullFrame,
    Roi,
}

pub struct DetectorClassifier<D: Detector> {
    detector: D,
    confidence_cutoff: f32,
    input: DetectorInput,
}

impl<D: Detector> DetectorClassifier<D> {
    pub fn new(detector: D, confidence_cutoff: f32, input: DetectorInput) -> Self {
        Self {
            detector,
            confidence_cutoff,
            input,
        }
    }
}

impl<D: Detector> Classifier for DetectorClassifier<D> {
    fn classify(&mut self, sample: &RoiSample<'_>) -> Result<Classification, ClassificationError> {
        let (image, dx, dy) = match self.input {
            DetectorInput::FullFrame => (sample.frame, 0.0, 0.0),
            DetectorInput::Roi => (&sample.image, sample.roi.x as f32, sample.roi.y as f32),
        };

        let detections: Vec<Detection> = self
            .detector
            .detect(image, self.confidence_cutoff)?
            .into_iter()
            .map(|d| Detection {
                bbox: d.bbox.translated(dx, dy),
                ..d
            })
            .collect();

        let winner = select_detection(&detections, sample.roi, self.confidence_cutoff).cloned();
        debug!(
            candidates = detections.len(),
            winner = winner.as_ref().map(|d| d.label.as_str()),
            "detector pass"
        );

        let classification = match winner {
            Some(d) => Classification {
                outcome: Outcome::Defective,
                label: Some(d.label),
                confidence: Some(d.confidence as f64),
                diagnostic: Diagnostic::Detections(detections),
            },
            None => Classification {
                outcome: Outcome::Normal,
                label: None,
                confidence: None,
                diagnostic: Diagnostic::Detections(detections),
            },
        };
        Ok(classification)
    }

    fn name(&self) -> &'static str {
        "detector"
    }
}

/// Picks the detection that speaks for the ROI: confidence at or above the cutoff,
/// box center inside the ROI, highest confidence, then smallest label.
pub fn select_detection(detections: &[Detection], roi: Roi, confidence_cutoff: f32) -> Option<&Detection> {
    detections
        .iter()
        .filter(|d| d.confidence.is_finite() && d.confidence >= confidence_cutoff)
        .filter(|d| {
            let (cx, cy) = d.bbox.center();
            roi.contains(cx, cy)
        })
        .max_by(|a, b| {
            a.confidence
                .total_cmp(&b.confidence)
                .then_with(|| b.label.cmp(&a.label))
        })
}

pub struct DifferenceClassifier {
    baseline: Option<RgbImage>,
    threshold: f64,
    presence_threshold: Option<f64>,
}

impl DifferenceClassifier {
    pub fn new(threshold: f64, presence_threshold: Option<f64>, baseline: Option<RgbImage>) -> Self {
        Self {
            baseline,
            threshold,
            presence_threshold,
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }
}

impl Classifier for DifferenceClassifier {
    fn classify(&mut self, sample: &RoiSample<'_>) -> Result<Classification, ClassificationError> {
        let Some(baseline) = self.baseline.as_ref() else {
            return Ok(Classification::awaiting_baseline());
        };
        let (bw, bh) = baseline.dimensions();
        if bw == 0 || bh == 0 {
            return Err(ClassificationError::EmptyBaseline);
        }

        let presence = match self.presence_threshold {
            Some(presence_threshold) => {
                let score = match_score(&sample.image, baseline);
                if score < presence_threshold {
                    return Ok(Classification {
                        outcome: Outcome::NoProduct,
                        label: None,
                        confidence: None,
                        diagnostic: Diagnostic::Presence { match_score: score },
                    });
                }
                Some(score)
            }
            None => None,
        };

        let resized;
        let current = if sample.image.dimensions() != (bw, bh) {
            resized = imageops::resize(&sample.image, bw, bh, imageops::FilterType::Triangle);
            &resized
        } else {
            &sample.image
        };

        let mean_diff = mean_difference(current, baseline).ok_or(ClassificationError::EmptyBaseline)?;
        let outcome = if mean_diff > self.threshold {
            Outcome::Defective
        } else {
            Outcome::Normal
        };
        debug!(mean_diff, ?presence, outcome = outcome.as_str(), "difference pass");

        Ok(Classification {
            outcome,
            label: Some(outcome.as_str().to_string()),
            confidence: None,
            diagnostic: Diagnostic::Difference {
                mean_diff,
                match_score: presence,
            },
        })
    }

    fn rebase(&mut self, baseline: RgbImage) {
        self.baseline = Some(baseline);
    }

    fn name(&self) -> &'static str {
        "difference"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn detection(label: &str, confidence: f32, cx: f32, cy: f32) -> Detection {
        Detection {
            label: label.to_string(),
            confidence,
            bbox: BoundingBox {
                x1: cx - 5.0,
                y1: cy - 5.0,
                x2: cx + 5.0,
                y2: cy + 5.0,
            },
        }
    }

    fn sample(frame: &RgbImage, roi: Roi) -> RoiSample<'_> {
        RoiSample {
            frame,
            roi,
            image: imageops::crop_imm(frame, roi.x, roi.y, roi.width, roi.height).to_image(),
        }
    }

    fn dark_saturated(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([40 + (x % 20) as u8, 0, (y % 10) as u8]))
    }

    #[test]
    fn highest_confidence_inside_roi_wins() {
        let roi = Roi::new(100, 100, 100, 100);
        let detections = vec![
            detection("scratch", 0.80, 150.0, 150.0),
            detection("tearing", 0.95, 150.0, 150.0),
            detection("dent", 0.99, 20.0, 20.0),
            detection("stain", 0.30, 150.0, 150.0),
        ];
        let winner = select_detection(&detections, roi, 0.5).unwrap();
        assert_eq!(winner.label, "tearing");
    }

    #[test]
    fn confidence_ties_go_to_smallest_label() {
        let roi = Roi::new(0, 0, 50, 50);
        let detections = vec![
            detection("tearing", 0.9, 25.0, 25.0),
            detection("contaminated", 0.9, 25.0, 25.0),
            detection("scratch", 0.9, 25.0, 25.0),
        ];
        assert_eq!(select_detection(&detections, roi, 0.25).unwrap().label, "contaminated");

        let mut reversed = detections.clone();
        reversed.reverse();
        assert_eq!(select_detection(&reversed, roi, 0.25).unwrap().label, "contaminated");
    }

    #[test]
    fn detector_classifier_reports_defect_with_label() {
        let frame = RgbImage::new(300, 300);
        let roi = Roi::new(100, 100, 100, 100);
        let detector = |_: &RgbImage, _: f32| -> Result<Vec<Detection>, ClassificationError> {
            Ok(vec![detection("contaminated", 0.87, 120.0, 180.0)])
        };
        let mut classifier = DetectorClassifier::new(detector, 0.5, DetectorInput::FullFrame);
        let result = classifier.classify(&sample(&frame, roi)).unwrap();
        assert_eq!(result.outcome, Outcome::Defective);
        assert_eq!(result.label.as_deref(), Some("contaminated"));
        assert!((result.confidence.unwrap() - 0.87).abs() < 1e-6);
    }

    #[test]
    fn detector_classifier_without_qualifying_box_is_normal() {
        let frame = RgbImage::new(300, 300);
        let roi = Roi::new(100, 100, 100, 100);
        let detector = |_: &RgbImage, _: f32| -> Result<Vec<Detection>, ClassificationError> {
            Ok(vec![detection("scratch", 0.9, 10.0, 10.0)])
        };
        let mut classifier = DetectorClassifier::new(detector, 0.5, DetectorInput::FullFrame);
        let result = classifier.classify(&sample(&frame, roi)).unwrap();
        assert_eq!(result.outcome, Outcome::Normal);
        assert_eq!(result.label, None);
        assert_eq!(result.log_label(), "Normal");
        assert!(matches!(result.diagnostic, Diagnostic::Detections(ref d) if d.len() == 1));
    }

    #[test]
    fn roi_input_boxes_are_translated_to_frame_coordinates() {
        let frame = RgbImage::new(300, 300);
        let roi = Roi::new(100, 100, 50, 50);
        let detector = |image: &RgbImage, _: f32| -> Result<Vec<Detection>, ClassificationError> {
            assert_eq!(image.dimensions(), (50, 50));
            Ok(vec![detection("dent", 0.7, 25.0, 25.0)])
        };
        let mut classifier = DetectorClassifier::new(detector, 0.5, DetectorInput::Roi);
        let result = classifier.classify(&sample(&frame, roi)).unwrap();
        assert_eq!(result.outcome, Outcome::Defective);
        match result.diagnostic {
            Diagnostic::Detections(d) => assert_eq!(d[0].bbox.center(), (125.0, 125.0)),
            other => panic!("unexpected diagnostic {other:?}"),
        }
    }

    #[test]
    fn detector_failure_propagates() {
        let frame = RgbImage::new(20, 20);
        let detector = |_: &RgbImage, _: f32| -> Result<Vec<Detection>, ClassificationError> {
            Err(ClassificationError::Detector("timeout".into()))
        };
        let mut classifier = DetectorClassifier::new(detector, 0.5, DetectorInput::FullFrame);
        assert!(classifier.classify(&sample(&frame, Roi::new(0, 0, 10, 10))).is_err());
    }

    #[test]
    fn difference_without_baseline_awaits_one() {
        let frame = dark_saturated(40, 40);
        let mut classifier = DifferenceClassifier::new(25.0, Some(0.4), None);
        let result = classifier.classify(&sample(&frame, Roi::new(0, 0, 20, 20))).unwrap();
        assert_eq!(result.outcome, Outcome::AwaitingBaseline);
        assert!(!result.outcome.is_loggable());
    }

    #[test]
    fn identical_baseline_is_normal() {
        let frame = dark_saturated(40, 40);
        let s = sample(&frame, Roi::new(5, 5, 20, 20));
        let mut classifier = DifferenceClassifier::new(25.0, Some(0.4), Some(s.image.clone()));
        let result = classifier.classify(&s).unwrap();
        assert_eq!(result.outcome, Outcome::Normal);
        match result.diagnostic {
            Diagnostic::Difference { mean_diff, match_score } => {
                assert_eq!(mean_diff, 0.0);
                assert!(match_score.unwrap() > 0.99);
            }
            other => panic!("unexpected diagnostic {other:?}"),
        }
    }

    #[test]
    fn inverted_roi_is_defective() {
        let frame = dark_saturated(40, 40);
        let s = sample(&frame, Roi::new(0, 0, 40, 40));
        let mut baseline = s.image.clone();
        imageops::invert(&mut baseline);

        let mut classifier = DifferenceClassifier::new(30.0, None, Some(baseline));
        let result = classifier.classify(&s).unwrap();
        assert_eq!(result.outcome, Outcome::Defective);
        assert_eq!(result.label.as_deref(), Some("Defective"));
        match result.diagnostic {
            Diagnostic::Difference { mean_diff, .. } => assert!(mean_diff > 150.0, "mean_diff {mean_diff}"),
            other => panic!("unexpected diagnostic {other:?}"),
        }
    }

    #[test]
    fn empty_roi_reports_no_product() {
        let frame = RgbImage::from_pixel(40, 40, Rgb([200, 200, 200]));
        let baseline = dark_saturated(20, 20);
        let mut classifier = DifferenceClassifier::new(25.0, Some(0.4), Some(baseline));
        let result = classifier.classify(&sample(&frame, Roi::new(0, 0, 20, 20))).unwrap();
        assert_eq!(result.outcome, Outcome::NoProduct);
        assert!(matches!(result.diagnostic, Diagnostic::Presence { .. }));
    }

    #[test]
    fn presence_score_equal_to_threshold_is_inspected() {
        let frame = dark_saturated(40, 40);
        let s = sample(&frame, Roi::new(0, 0, 20, 20));
        let baseline = imageops::crop_imm(&frame, 3, 2, 20, 20).to_image();
        let score = match_score(&s.image, &baseline);
        assert!(score < 1.0);

        let mut at_threshold = DifferenceClassifier::new(255.0, Some(score), Some(baseline.clone()));
        let result = at_threshold.classify(&s).unwrap();
        assert_eq!(result.outcome, Outcome::Normal);
        assert!(matches!(result.diagnostic, Diagnostic::Difference { match_score: Some(m), .. } if m == score));

        let mut above = DifferenceClassifier::new(255.0, Some(score + 1e-9), Some(baseline));
        assert_eq!(above.classify(&s).unwrap().outcome, Outcome::NoProduct);
    }

    #[test]
    fn rebase_replaces_missing_baseline() {
        let frame = dark_saturated(40, 40);
        let s = sample(&frame, Roi::new(0, 0, 16, 16));
        let mut classifier = DifferenceClassifier::new(25.0, Some(0.4), None);
        assert!(!classifier.has_baseline());
        classifier.rebase(s.image.clone());
        assert_eq!(classifier.classify(&s).unwrap().outcome, Outcome::Normal);
    }

    #[test]
    fn current_image_is_resized_to_baseline() {
        let frame = RgbImage::from_pixel(40, 40, Rgb([10, 120, 60]));
        let baseline = RgbImage::from_pixel(8, 8, Rgb([10, 120, 60]));
        let mut classifier = DifferenceClassifier::new(25.0, None, Some(baseline));
        let result = classifier.classify(&sample(&frame, Roi::new(0, 0, 20, 20))).unwrap();
        assert_eq!(result.outcome, Outcome::Normal);
    }
}
