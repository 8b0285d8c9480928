//! Streaming Road Sign Recognition Core
//!
//! Captures frames on a dedicated thread into a bounded drop-oldest queue and
//! runs each frame through preprocessing, detection, IoU tracking,
//! classification, fusion, a safety evaluation and a gated, per-track cached
//! explanation. Operators steer the run through shared control state
//! (pause, manual override, emergency stop, quit).
//!
//! Model inference and text generation sit behind the `Detector`,
//! `Classifier` and `Explainer` traits; the pipeline depends only on those.

pub mod app;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod control;
pub mod detector;
pub mod error;
pub mod explainer;
pub mod fusion;
pub mod gate;
pub mod metrics;
pub mod pipeline;
pub mod preprocessing;
pub mod queue;
pub mod safety;
pub mod source;
pub mod types;
pub mod worker;

pub use app::Session;
pub use capture::{CaptureBackend, CaptureDevice, ImageDirBackend, SourceId, SyntheticBackend};
pub use classifier::{build_classifier, Classifier, ClassifierKind};
pub use config::AppConfig;
pub use control::{ControlKey, ControlListener, ControlState, SharedControl, SystemMode};
pub use detector::{build_detector, Detector, DetectorKind};
pub use error::{PipelineError, Result};
pub use explainer::{build_explainer, Explainer, HttpExplainer, TemplateExplainer};
pub use gate::ExplanationGate;
pub use metrics::ThroughputMeter;
pub use pipeline::{PipelineStats, ResultStream, StreamPipeline};
pub use preprocessing::{ImageEnhancer, Passthrough, Preprocessor};
pub use queue::FrameQueue;
pub use safety::{risk_tier, SafetyGuard, SafetyState};
pub use source::{FrameSource, FrameSourceConfig, Frames};
pub use types::{ClassificationResult, Detection, Frame, FrameResult, SafetyTier};

pub use ioutrack::{calculate_iou, Bbox, IouTracker, TrackerConfig};

/// Get library version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
