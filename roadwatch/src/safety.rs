//! Degradation flag, advisory message and risk tier from live signal quality.
//! Everything here is a pure function of its inputs.

use crate::config::SafetyConfig;
use crate::types::{ClassificationResult, Detection, SafetyTier};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SafetyState {
    pub degraded: bool,
    pub alert_message: Option<String>,
    pub manual_override: bool,
}

#[derive(Debug, Clone)]
pub struct SafetyGuard {
    config: SafetyConfig,
}

impl SafetyGuard {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    /// Evaluate the current frame.
    ///
    /// Only one alert survives: checks run from low FPS through detection to
    /// classification, and each triggered check overwrites the message of the
    /// ones before it. A zero `fps` means "not measured yet" and never
    /// degrades.
    pub fn evaluate(
        &self,
        fps: f64,
        detection: Option<&Detection>,
        classification: Option<&ClassificationResult>,
        manual_override: bool,
    ) -> SafetyState {
        let cfg = &self.config;
        let mut degraded = false;
        let mut alert: Option<String> = None;

        if fps > 0.0 && fps < cfg.fps_floor {
            degraded = true;
            alert = Some(format!("Low FPS ({:.1}) - entering graceful degradation", fps));
        }

        if let Some(det) = detection {
            if det.confidence < cfg.critical_confidence {
                degraded = true;
                alert = Some("Detection confidence critical - holding actions".to_string());
            } else if det.confidence < cfg.alert_confidence {
                alert = Some("Low detection confidence".to_string());
            }
        }

        if let Some(cls) = classification {
            if cls.confidence < cfg.critical_confidence {
                degraded = true;
                alert = Some("Classification confidence critical".to_string());
            } else if cls.confidence < cfg.alert_confidence {
                alert = Some("Low classification confidence".to_string());
            }
        }

        SafetyState {
            degraded,
            alert_message: alert,
            manual_override: manual_override && cfg.allow_manual_override,
        }
    }

    pub fn risk_tier(&self, confidence: Option<f32>) -> SafetyTier {
        risk_tier(confidence, &self.config)
    }
}

/// Map fused confidence to a tier by descending threshold; no result at all
/// is `Unknown`.
pub fn risk_tier(confidence: Option<f32>, cfg: &SafetyConfig) -> SafetyTier {
    match confidence {
        None => SafetyTier::Unknown,
        Some(c) if c >= cfg.risk_tier_high => SafetyTier::Adas,
        Some(c) if c >= cfg.risk_tier_med => SafetyTier::Safe,
        Some(c) if c >= cfg.risk_tier_warn => SafetyTier::Warn,
        Some(_) => SafetyTier::Ignore,
    }
}
