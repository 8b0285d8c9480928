/// Detector capability and its named variants
///
/// The pipeline depends only on the `Detector` trait. Concrete model families
/// are selected at startup by name through `DetectorKind`.
use crate::config::DetectorConfig;
use crate::error::Result;
use crate::types::{Detection, Frame};
use ioutrack::Bbox;

/// Common interface for object detectors
pub trait Detector: Send {
    /// Detect objects in a single frame. May return an empty list.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Detector name (for logging)
    fn name(&self) -> &str;
}

/// Detector family, chosen by the configured model name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Yolo,
    EfficientDet,
    SsdMobileNet,
}

impl DetectorKind {
    /// `yolo*` and `efficientdet*` by prefix, anything else is SSD
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.starts_with("yolo") {
            DetectorKind::Yolo
        } else if name.starts_with("efficientdet") {
            DetectorKind::EfficientDet
        } else {
            DetectorKind::SsdMobileNet
        }
    }

    /// Create a detector instance of this kind
    pub fn create(&self, config: &DetectorConfig) -> Box<dyn Detector> {
        if let Some(path) = &config.model_path {
            log::warn!(
                "No inference backend for {:?} weights at {}, using fallback output",
                self,
                path
            );
        }
        Box::new(FallbackDetector::new(*self, config.clone()))
    }

    /// Label, confidence and box divisor of the no-model output
    fn fallback(&self) -> (&'static str, f32, i32) {
        match self {
            DetectorKind::Yolo => ("unknown", 0.2, 4),
            DetectorKind::EfficientDet => ("efficientdet_stub", 0.18, 3),
            DetectorKind::SsdMobileNet => ("ssd_stub", 0.15, 5),
        }
    }
}

/// Build the detector named in the configuration
pub fn build_detector(config: &DetectorConfig) -> Box<dyn Detector> {
    let kind = DetectorKind::from_name(&config.name);
    log::info!("Detector '{}' -> {:?}", config.name, kind);
    kind.create(config)
}

/// Stand-in used when no model weights are loaded: emits one low-confidence
/// box whose placement depends on the model family.
pub struct FallbackDetector {
    kind: DetectorKind,
    config: DetectorConfig,
    name: String,
}

impl FallbackDetector {
    pub fn new(kind: DetectorKind, config: DetectorConfig) -> Self {
        let name = format!("{}-fallback", config.name);
        Self { kind, config, name }
    }

    pub fn kind(&self) -> DetectorKind {
        self.kind
    }
}

impl Detector for FallbackDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (w, h) = (frame.width() as i32, frame.height() as i32);
        let (label, confidence, div) = self.kind.fallback();
        let mut detections = vec![Detection::new(
            label,
            confidence,
            Bbox::new(w / div, h / div, w / 2, h / 2),
        )];
        detections.truncate(self.config.max_det);
        Ok(detections)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
