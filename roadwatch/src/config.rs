//! Application configuration
//!
//! Every section deserializes with defaults, so a JSON file only needs the
//! values that differ from the stock setup.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Model family, selected by prefix: `yolo*`, `efficientdet*`, else SSD
    pub name: String,
    /// Detections below this confidence are discarded before tracking
    pub conf_threshold: f32,
    /// Non-maximum suppression threshold (0-1)
    pub iou_threshold: f32,
    /// Maximum number of detections per frame
    pub max_det: usize,
    pub model_path: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            name: "yolov8n".to_string(),
            conf_threshold: 0.35,
            iou_threshold: 0.45,
            max_det: 10,
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub name: String,
    pub num_classes: usize,
    pub model_path: Option<String>,
    pub class_names: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            name: "efficientnet_b4".to_string(),
            num_classes: 120,
            model_path: None,
            class_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainerConfig {
    /// `template`, `openai` or `http`
    pub provider: String,
    pub model: String,
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            provider: "template".to_string(),
            model: "gpt-4.1-mini".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key_env: "LLM_API_KEY".to_string(),
            max_tokens: 160,
            temperature: 0.2,
            timeout_ms: 5000,
        }
    }
}

impl ExplainerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub alert_confidence: f32,
    pub critical_confidence: f32,
    pub fps_floor: f64,
    pub allow_manual_override: bool,
    pub risk_tier_high: f32,
    pub risk_tier_med: f32,
    pub risk_tier_warn: f32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            alert_confidence: 0.4,
            critical_confidence: 0.25,
            fps_floor: 10.0,
            allow_manual_override: true,
            risk_tier_high: 0.8,
            risk_tier_med: 0.6,
            risk_tier_warn: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub iou_threshold: f32,
    /// Frames a track may go unmatched before it is forgotten
    pub max_age: u32,
    pub min_stable: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            max_age: 30,
            min_stable: 3,
        }
    }
}

impl From<&TrackingConfig> for ioutrack::TrackerConfig {
    fn from(cfg: &TrackingConfig) -> Self {
        ioutrack::TrackerConfig {
            iou_threshold: cfg.iou_threshold,
            max_age: cfg.max_age,
            min_stable: cfg.min_stable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Fused confidence required before an explanation is requested
    pub min_confidence: f32,
    pub cache_enabled: bool,
    /// Maximum cached explanations; the oldest insert goes first
    pub cache_capacity: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.75,
            cache_enabled: true,
            cache_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Resize to (width, height) before enhancement
    pub target_size: Option<(u32, u32)>,
    pub enable_contrast: bool,
    pub enable_blur: bool,
    pub blur_sigma: f32,
    pub enable_sharpen: bool,
    pub enable_gamma: bool,
    pub gamma: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_size: None,
            enable_contrast: true,
            enable_blur: true,
            blur_sigma: 0.8,
            enable_sharpen: true,
            enable_gamma: false,
            gamma: 1.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Device index (`"0"`) or a path to an image or directory of images
    pub source: String,
    /// Resize captured frames to (width, height)
    pub resize: Option<(u32, u32)>,
    pub max_frames: Option<u64>,
    pub target_fps: f64,
    /// Depth of the drop-oldest frame queue
    pub frame_queue: usize,
    pub poll_timeout_ms: u64,
    pub join_timeout_ms: u64,
    /// Sleep between control checks while paused
    pub pause_sleep_ms: u64,
    /// Log run statistics every N processed frames
    pub stats_interval: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            resize: None,
            max_frames: None,
            target_fps: 20.0,
            frame_queue: 5,
            poll_timeout_ms: 500,
            join_timeout_ms: 1000,
            pause_sleep_ms: 50,
            stats_interval: 100,
        }
    }
}

impl RuntimeConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn pause_sleep(&self) -> Duration {
        Duration::from_millis(self.pause_sleep_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detector: DetectorConfig,
    pub classifier: ClassifierConfig,
    #[serde(alias = "llm")]
    pub explainer: ExplainerConfig,
    pub safety: SafetyConfig,
    pub tracking: TrackingConfig,
    pub gate: GateConfig,
    pub preprocess: PreprocessConfig,
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        log::info!("Loaded configuration from {}", path.display());
        Self::from_json_str(&contents)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f32| -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(PipelineError::config(format!(
                    "{} must be within [0, 1], got {}",
                    name, v
                )))
            }
        };

        unit("detector.conf_threshold", self.detector.conf_threshold)?;
        unit("detector.iou_threshold", self.detector.iou_threshold)?;
        unit("tracking.iou_threshold", self.tracking.iou_threshold)?;
        unit("gate.min_confidence", self.gate.min_confidence)?;
        unit("safety.alert_confidence", self.safety.alert_confidence)?;
        unit("safety.critical_confidence", self.safety.critical_confidence)?;
        unit("safety.risk_tier_high", self.safety.risk_tier_high)?;
        unit("safety.risk_tier_med", self.safety.risk_tier_med)?;
        unit("safety.risk_tier_warn", self.safety.risk_tier_warn)?;

        let s = &self.safety;
        if !(s.risk_tier_high >= s.risk_tier_med && s.risk_tier_med >= s.risk_tier_warn) {
            return Err(PipelineError::config(format!(
                "risk tiers must descend: high {} >= med {} >= warn {}",
                s.risk_tier_high, s.risk_tier_med, s.risk_tier_warn
            )));
        }
        if s.critical_confidence > s.alert_confidence {
            return Err(PipelineError::config(
                "safety.critical_confidence must not exceed safety.alert_confidence",
            ));
        }
        if s.fps_floor < 0.0 {
            return Err(PipelineError::config("safety.fps_floor must not be negative"));
        }

        if self.runtime.frame_queue == 0 {
            return Err(PipelineError::config("runtime.frame_queue must be at least 1"));
        }
        if !(self.runtime.target_fps > 0.0) {
            return Err(PipelineError::config(format!(
                "runtime.target_fps must be positive, got {}",
                self.runtime.target_fps
            )));
        }
        if self.gate.cache_enabled && self.gate.cache_capacity == 0 {
            return Err(PipelineError::config(
                "gate.cache_capacity must be at least 1 when the cache is enabled",
            ));
        }
        if self.detector.max_det == 0 {
            return Err(PipelineError::config("detector.max_det must be at least 1"));
        }
        if self.preprocess.enable_gamma && self.preprocess.gamma <= 0.0 {
            return Err(PipelineError::config("preprocess.gamma must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector.name, "yolov8n");
        assert_eq!(config.tracking.min_stable, 3);
        assert_eq!(config.runtime.frame_queue, 5);
        assert_eq!(config.gate.min_confidence, 0.75);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = AppConfig::from_json_str(
            r#"{ "runtime": { "frame_queue": 2, "target_fps": 5.0 }, "llm": { "max_tokens": 64 } }"#,
        )
        .unwrap();
        assert_eq!(config.runtime.frame_queue, 2);
        assert_eq!(config.runtime.source, "0");
        assert_eq!(config.explainer.max_tokens, 64);
        assert_eq!(config.safety, SafetyConfig::default());
    }

    #[test]
    fn test_rejects_zero_queue() {
        let err = AppConfig::from_json_str(r#"{ "runtime": { "frame_queue": 0 } }"#).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_rejects_inverted_tiers() {
        let mut config = AppConfig::default();
        config.safety.risk_tier_med = 0.9;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let mut config = AppConfig::default();
        config.detector.conf_threshold = 1.5;
        assert!(config.validate().is_err());
        config.detector.conf_threshold = 0.35;
        config.runtime.target_fps = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err = AppConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, PipelineError::Serialization(_)));
    }

    #[test]
    fn test_tracker_config_conversion() {
        let cfg = TrackingConfig {
            iou_threshold: 0.3,
            max_age: 7,
            min_stable: 2,
        };
        let tracker: ioutrack::TrackerConfig = (&cfg).into();
        assert_eq!(tracker.max_age, 7);
        assert_eq!(tracker.min_stable, 2);
    }
}
