//! Classifier capability and its named variants

use crate::config::ClassifierConfig;
use crate::error::{PipelineError, Result};
use crate::types::{ClassificationResult, Detection, Frame};
use image::imageops;

/// Given a frame and its detections, produce one classification.
///
/// Returns `Ok(None)` when `detections` is empty.
pub trait Classifier: Send {
    fn classify(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
    ) -> Result<Option<ClassificationResult>>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierKind {
    ResNet,
    EfficientNet,
    MobileNetV3,
    ViT,
}

impl ClassifierKind {
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.starts_with("resnet") {
            ClassifierKind::ResNet
        } else if name.contains("efficientnet") {
            ClassifierKind::EfficientNet
        } else if name.contains("mobilenet") {
            ClassifierKind::MobileNetV3
        } else {
            ClassifierKind::ViT
        }
    }

    fn fallback_confidence(&self) -> f32 {
        match self {
            ClassifierKind::MobileNetV3 => 0.12,
            _ => 0.1,
        }
    }

    pub fn create(&self, config: &ClassifierConfig) -> Box<dyn Classifier> {
        if let Some(path) = &config.model_path {
            log::warn!(
                "No inference backend for {:?} weights at {}, using fallback output",
                self,
                path
            );
        }
        Box::new(FallbackClassifier::new(*self, config.clone()))
    }
}

pub fn build_classifier(config: &ClassifierConfig) -> Box<dyn Classifier> {
    let kind = ClassifierKind::from_name(&config.name);
    log::info!("Classifier '{}' -> {:?}", config.name, kind);
    kind.create(config)
}

/// Crop a detection's box out of the frame, clamped to the frame bounds
pub fn crop_detection(frame: &Frame, detection: &Detection) -> Result<Frame> {
    let (fw, fh) = (frame.width() as i32, frame.height() as i32);
    let b = detection.bbox;
    let x1 = b.x1.clamp(0, fw);
    let y1 = b.y1.clamp(0, fh);
    let x2 = b.x2.clamp(0, fw);
    let y2 = b.y2.clamp(0, fh);
    if x2 <= x1 || y2 <= y1 {
        return Err(PipelineError::classification(format!(
            "box {} lies outside the {}x{} frame",
            b, fw, fh
        )));
    }
    Ok(imageops::crop_imm(frame, x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32).to_image())
}

/// Stand-in used when no weights are loaded. Crops the first detection so
/// malformed boxes still surface as errors, then reports `unclassified`.
pub struct FallbackClassifier {
    kind: ClassifierKind,
    config: ClassifierConfig,
    name: String,
}

impl FallbackClassifier {
    pub fn new(kind: ClassifierKind, config: ClassifierConfig) -> Self {
        let name = format!("{}-fallback", config.name);
        Self { kind, config, name }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }
}

impl Classifier for FallbackClassifier {
    fn classify(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
    ) -> Result<Option<ClassificationResult>> {
        let Some(detection) = detections.first() else {
            return Ok(None);
        };
        crop_detection(frame, detection)?;

        Ok(Some(ClassificationResult::new(
            "unclassified",
            self.kind.fallback_confidence(),
        )))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ioutrack::Bbox;

    #[test]
    fn test_kind_from_name() {
        assert_eq!(ClassifierKind::from_name("resnet50"), ClassifierKind::ResNet);
        assert_eq!(ClassifierKind::from_name("efficientnet_b4"), ClassifierKind::EfficientNet);
        assert_eq!(ClassifierKind::from_name("mobilenet_v3_large"), ClassifierKind::MobileNetV3);
        assert_eq!(ClassifierKind::from_name("vit_b_16"), ClassifierKind::ViT);
    }

    #[test]
    fn test_no_detections_no_result() {
        let mut classifier = build_classifier(&ClassifierConfig::default());
        assert_eq!(classifier.classify(&Frame::new(32, 32), &[]).unwrap(), None);
    }

    #[test]
    fn test_fallback_result() {
        let mut classifier = build_classifier(&ClassifierConfig {
            name: "mobilenet_v3_large".to_string(),
            ..ClassifierConfig::default()
        });
        let det = Detection::new("stop", 0.9, Bbox::new(4, 4, 20, 20));
        let result = classifier.classify(&Frame::new(32, 32), &[det]).unwrap().unwrap();
        assert_eq!(result.label, "unclassified");
        assert_eq!(result.confidence, 0.12);
        assert!(result.raw_scores.is_none());
    }

    #[test]
    fn test_crop_is_clamped() {
        let frame = Frame::new(32, 32);
        let det = Detection::new("stop", 0.9, Bbox::new(-10, 20, 10, 50));
        assert_eq!(crop_detection(&frame, &det).unwrap().dimensions(), (10, 12));

        let outside = Detection::new("stop", 0.9, Bbox::new(40, 40, 50, 50));
        assert!(matches!(
            crop_detection(&frame, &outside),
            Err(PipelineError::Classification(_))
        ));
    }
}
