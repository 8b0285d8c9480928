//! Type definitions shared by every pipeline stage

use ioutrack::{Bbox, TrackInput};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw or preprocessed video frame
pub type Frame = image::RgbImage;

/// A single labelled box produced by the detector for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: Bbox,
    /// Attached by the tracker, never by the detector
    pub track_id: Option<u32>,
}

impl Detection {
    pub fn new<S: Into<String>>(label: S, confidence: f32, bbox: Bbox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
            track_id: None,
        }
    }
}

impl TrackInput for Detection {
    fn label(&self) -> &str {
        &self.label
    }

    fn bbox(&self) -> Bbox {
        self.bbox
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }

    fn set_track_id(&mut self, track_id: u32) {
        self.track_id = Some(track_id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f32,
    /// Per-class scores from the classifier, passed through untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_scores: Option<Vec<f32>>,
}

impl ClassificationResult {
    pub fn new<S: Into<String>>(label: S, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            raw_scores: None,
        }
    }

    pub fn with_raw_scores(mut self, scores: Vec<f32>) -> Self {
        self.raw_scores = Some(scores);
        self
    }
}

/// Discrete bucket summarising fused confidence for downstream action policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyTier {
    Adas,
    Safe,
    Warn,
    Ignore,
    Unknown,
}

impl SafetyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyTier::Adas => "adas",
            SafetyTier::Safe => "safe",
            SafetyTier::Warn => "warn",
            SafetyTier::Ignore => "ignore",
            SafetyTier::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the pipeline knows about one processed frame
#[derive(Debug, Clone, Serialize)]
pub struct FrameResult {
    pub frame_id: u64,
    pub detections: Vec<Detection>,
    pub classification: Option<ClassificationResult>,
    pub explanation: Option<String>,
    pub alert_message: Option<String>,
    pub fps: f64,
    pub latency_ms: f64,
    pub degraded: bool,
    pub safety_tier: SafetyTier,
    pub manual_override: bool,
    pub stage_latencies: BTreeMap<String, f64>,
}

impl FrameResult {
    /// Highest-confidence detection that carries a track id
    pub fn primary_detection(&self) -> Option<&Detection> {
        primary_detection(&self.detections)
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Pick the tracked detection with the highest confidence. Ties keep the
/// earlier detection.
pub fn primary_detection(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .filter(|d| d.track_id.is_some())
        .fold(None, |best: Option<&Detection>, d| match best {
            Some(b) if b.confidence >= d.confidence => Some(b),
            _ => Some(d),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, confidence: f32, track_id: Option<u32>) -> Detection {
        Detection {
            track_id,
            ..Detection::new(label, confidence, Bbox::new(0, 0, 10, 10))
        }
    }

    #[test]
    fn test_primary_detection_prefers_confidence() {
        let dets = vec![
            det("stop", 0.6, Some(0)),
            det("yield", 0.9, Some(1)),
            det("speed_50", 0.95, None),
        ];
        assert_eq!(primary_detection(&dets).map(|d| d.label.as_str()), Some("yield"));
    }

    #[test]
    fn test_primary_detection_tie_keeps_first() {
        let dets = vec![det("stop", 0.8, Some(3)), det("yield", 0.8, Some(1))];
        assert_eq!(primary_detection(&dets).and_then(|d| d.track_id), Some(3));
        assert!(primary_detection(&[]).is_none());
    }

    #[test]
    fn test_safety_tier_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SafetyTier::Adas).ok(), Some("\"adas\"".to_string()));
        assert_eq!(SafetyTier::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_detection_track_input() {
        let mut d = det("stop", 0.7, None);
        d.set_track_id(4);
        assert_eq!(d.track_id, Some(4));
        assert_eq!(TrackInput::label(&d), "stop");
    }
}
