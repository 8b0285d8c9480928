/// Per-frame pipeline orchestration
///
/// Runs preprocess -> detect -> track -> classify -> fuse -> explain ->
/// safety for each frame, strictly in order on the caller's thread, and
/// records the latency of every stage. Stage failures degrade the frame
/// instead of aborting the run.
use crate::classifier::{build_classifier, Classifier};
use crate::config::AppConfig;
use crate::control::SharedControl;
use crate::detector::{build_detector, Detector};
use crate::explainer::{build_explainer, Explainer};
use crate::fusion::fuse;
use crate::gate::{ExplanationGate, GateRequest};
use crate::metrics::ThroughputMeter;
use crate::preprocessing::{ImageEnhancer, Preprocessor};
use crate::safety::SafetyGuard;
use crate::types::{primary_detection, Frame, FrameResult};
use ioutrack::IouTracker;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub const STAGE_PREPROCESS: &str = "preprocess_ms";
pub const STAGE_DETECT: &str = "detect_ms";
pub const STAGE_CLASSIFY: &str = "classify_ms";
pub const STAGE_EXPLAIN: &str = "llm_ms";

/// Counters for the current run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub explanation_calls: u64,
    pub detection_failures: u64,
    pub classification_failures: u64,
}

pub struct StreamPipeline {
    config: AppConfig,
    control: SharedControl,
    preprocessor: Box<dyn Preprocessor>,
    detector: Box<dyn Detector>,
    classifier: Box<dyn Classifier>,
    explainer: Box<dyn Explainer>,
    tracker: IouTracker,
    gate: ExplanationGate,
    safety: SafetyGuard,
    meter: ThroughputMeter,
    stats: PipelineStats,
}

impl StreamPipeline {
    /// Build a pipeline with the stages named in `config`
    pub fn new(config: &AppConfig, control: SharedControl) -> Self {
        Self {
            preprocessor: Box::new(ImageEnhancer::new(config.preprocess.clone())),
            detector: build_detector(&config.detector),
            classifier: build_classifier(&config.classifier),
            explainer: build_explainer(&config.explainer),
            tracker: IouTracker::new((&config.tracking).into()),
            gate: ExplanationGate::new(config.gate.clone()),
            safety: SafetyGuard::new(config.safety.clone()),
            meter: ThroughputMeter::default(),
            stats: PipelineStats::default(),
            config: config.clone(),
            control,
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: Box<dyn Preprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_explainer(mut self, explainer: Box<dyn Explainer>) -> Self {
        self.explainer = explainer;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn control(&self) -> &SharedControl {
        &self.control
    }

    pub fn tracker(&self) -> &IouTracker {
        &self.tracker
    }

    pub fn gate(&self) -> &ExplanationGate {
        &self.gate
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            explanation_calls: self.gate.calls(),
            ..self.stats
        }
    }

    /// Forget all tracks and cached explanations, e.g. on stream restart.
    /// Both are cleared together so recycled track ids never see old text.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.gate.clear();
        self.meter.reset();
        log::info!("Pipeline state reset");
    }

    /// Run every stage on one frame and assemble its result
    pub fn process_frame(&mut self, frame_id: u64, frame: &Frame) -> FrameResult {
        let started = Instant::now();
        let control = self.control.snapshot();
        let mut stages = BTreeMap::new();

        let t = Instant::now();
        let processed = self.preprocessor.process(frame);
        stages.insert(STAGE_PREPROCESS.to_string(), elapsed_ms(t));

        let t = Instant::now();
        let mut detections = match self.detector.detect(&processed) {
            Ok(detections) => detections,
            Err(e) => {
                self.stats.detection_failures += 1;
                log::warn!("Frame {}: detector {} failed: {}", frame_id, self.detector.name(), e);
                Vec::new()
            }
        };
        let conf_threshold = self.config.detector.conf_threshold;
        detections.retain(|d| d.confidence >= conf_threshold);
        self.tracker.update(&mut detections);
        self.gate.evict(self.tracker.evicted());
        stages.insert(STAGE_DETECT.to_string(), elapsed_ms(t));

        let primary = primary_detection(&detections).cloned();

        let t = Instant::now();
        let classification = match &primary {
            Some(det) => match self
                .classifier
                .classify(&processed, std::slice::from_ref(det))
            {
                Ok(result) => result,
                Err(e) => {
                    self.stats.classification_failures += 1;
                    log::warn!(
                        "Frame {}: classifier {} failed: {}",
                        frame_id,
                        self.classifier.name(),
                        e
                    );
                    None
                }
            },
            None => None,
        };
        stages.insert(STAGE_CLASSIFY.to_string(), elapsed_ms(t));

        let fused = fuse(primary.as_ref(), classification.as_ref());

        let t = Instant::now();
        let explanation = match (&fused, &primary) {
            (Some(cls), Some(det)) => {
                let stable = det.track_id.is_some_and(|id| self.tracker.is_stable(id));
                let request = GateRequest {
                    classification: cls,
                    track_id: det.track_id,
                    stable,
                    manual_override: control.manual_override(),
                    llm_enabled: control.enable_llm(),
                };
                self.gate.resolve(request, self.explainer.as_mut())
            }
            _ => None,
        };
        stages.insert(STAGE_EXPLAIN.to_string(), elapsed_ms(t));

        let fps = self.meter.tick();
        let latency_ms = elapsed_ms(started);

        let safety = self.safety.evaluate(
            fps,
            primary.as_ref(),
            fused.as_ref(),
            control.manual_override(),
        );
        let safety_tier = self.safety.risk_tier(fused.as_ref().map(|c| c.confidence));

        self.stats.frames_processed += 1;
        log::debug!(
            "Frame {}: {} detections, tier {}, {:.1} ms {:?}",
            frame_id,
            detections.len(),
            safety_tier,
            latency_ms,
            stages
        );
        let interval = self.config.runtime.stats_interval;
        if interval > 0 && self.stats.frames_processed % interval == 0 {
            log::info!(
                "Pipeline: {} frames processed, {:.1} fps, {} tracks, {} explanation calls",
                self.stats.frames_processed,
                fps,
                self.tracker.len(),
                self.gate.calls()
            );
        }

        FrameResult {
            frame_id,
            detections,
            classification: fused,
            explanation,
            alert_message: safety.alert_message,
            fps,
            latency_ms,
            degraded: safety.degraded,
            safety_tier,
            manual_override: safety.manual_override,
            stage_latencies: stages,
        }
    }

    /// Process `frames` lazily, honouring the control state before each frame.
    ///
    /// The stream ends on a quit request, after `runtime.max_frames` results,
    /// or when `frames` is exhausted. While paused or emergency-stopped it
    /// sleeps without taking a frame.
    pub fn run<I>(&mut self, frames: I) -> ResultStream<'_, I>
    where
        I: Iterator<Item = (u64, Frame)>,
    {
        ResultStream {
            pause_sleep: self.config.runtime.pause_sleep(),
            max_frames: self.config.runtime.max_frames,
            pipeline: self,
            frames,
            emitted: 0,
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Lazy sequence of frame results produced by `StreamPipeline::run`
pub struct ResultStream<'a, I> {
    pipeline: &'a mut StreamPipeline,
    frames: I,
    emitted: u64,
    max_frames: Option<u64>,
    pause_sleep: Duration,
}

impl<I> ResultStream<'_, I> {
    /// Results emitted so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl<I> Iterator for ResultStream<'_, I>
where
    I: Iterator<Item = (u64, Frame)>,
{
    type Item = FrameResult;

    fn next(&mut self) -> Option<FrameResult> {
        loop {
            let control = self.pipeline.control.snapshot();
            if control.request_quit() {
                log::info!("Quit requested after {} frames", self.emitted);
                return None;
            }
            if self.max_frames.is_some_and(|max| self.emitted >= max) {
                log::info!("Reached max_frames ({})", self.emitted);
                return None;
            }
            if !control.is_active() {
                std::thread::sleep(self.pause_sleep);
                continue;
            }

            let (frame_id, frame) = self.frames.next()?;
            self.emitted += 1;
            return Some(self.pipeline.process_frame(frame_id, &frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SourceId, SyntheticBackend};
    use crate::error::{PipelineError, Result};
    use crate::preprocessing::Passthrough;
    use crate::source::{FrameSource, FrameSourceConfig};
    use crate::types::{ClassificationResult, Detection, SafetyTier};
    use ioutrack::Bbox;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Yields one scripted frame's detections per call, then nothing
    struct ScriptedDetector {
        frames: Vec<Vec<Detection>>,
        next: usize,
    }

    impl ScriptedDetector {
        fn moving_box(frames: usize, confidence: f32) -> Self {
            let frames = (0..frames as i32)
                .map(|i| {
                    vec![Detection::new(
                        "stop",
                        confidence,
                        Bbox::new(10 + 2 * i, 10, 50 + 2 * i, 50),
                    )]
                })
                .collect();
            Self { frames, next: 0 }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            let out = self.frames.get(self.next).cloned().unwrap_or_default();
            self.next += 1;
            Ok(out)
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Err(PipelineError::detection("model crashed"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct FixedClassifier {
        confidence: f32,
    }

    impl Classifier for FixedClassifier {
        fn classify(
            &mut self,
            _frame: &Frame,
            detections: &[Detection],
        ) -> Result<Option<ClassificationResult>> {
            Ok(detections.first().map(|d| {
                ClassificationResult::new(d.label.clone(), self.confidence)
                    .with_raw_scores(vec![self.confidence, 1.0 - self.confidence])
            }))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct CountingExplainer {
        calls: Arc<AtomicUsize>,
    }

    impl Explainer for CountingExplainer {
        fn explain(&mut self, label: &str, _confidence: f32) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("Sign {} (call {})", label, n))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.tracking.min_stable = 3;
        config.runtime.pause_sleep_ms = 5;
        config
    }

    fn pipeline(
        config: &AppConfig,
        control: SharedControl,
        detector: Box<dyn Detector>,
    ) -> (StreamPipeline, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = StreamPipeline::new(config, control)
            .with_preprocessor(Box::new(Passthrough))
            .with_detector(detector)
            .with_classifier(Box::new(FixedClassifier { confidence: 0.85 }))
            .with_explainer(Box::new(CountingExplainer {
                calls: calls.clone(),
            }));
        (pipeline, calls)
    }

    fn blank_frames(n: u64) -> impl Iterator<Item = (u64, Frame)> {
        (0..n).map(|i| (i, Frame::new(64, 64)))
    }

    #[test]
    fn test_five_frame_stream_end_to_end() {
        init_logger();
        let config = test_config();
        let (mut pipeline, calls) = pipeline(
            &config,
            SharedControl::default(),
            Box::new(ScriptedDetector::moving_box(5, 0.9)),
        );

        let mut source = FrameSource::new(
            FrameSourceConfig {
                source: SourceId::Device(0),
                target_fps: 500.0,
                queue_size: 8,
                poll_timeout: Duration::from_millis(50),
                ..FrameSourceConfig::default()
            },
            Arc::new(SyntheticBackend::new(96, 64, 5)),
        );
        source.start().unwrap();

        let results: Vec<FrameResult> = pipeline.run(source.frames()).collect();
        source.stop();

        assert_eq!(results.len(), 5);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.frame_id, i as u64);
            assert_eq!(result.detections.len(), 1);
            assert_eq!(result.detections[0].track_id, Some(0));
            assert_eq!(result.safety_tier, SafetyTier::Adas);
            assert_eq!(pipeline.tracker().len(), 1);
        }

        // Track becomes stable on the third frame
        assert!(results[0].explanation.is_none());
        assert!(results[1].explanation.is_none());
        let text = results[2].explanation.clone().unwrap();
        assert_eq!(text, "Sign stop (call 1)");
        assert_eq!(results[3].explanation.as_deref(), Some(text.as_str()));
        assert_eq!(results[4].explanation.as_deref(), Some(text.as_str()));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.stats().explanation_calls, 1);
        assert_eq!(pipeline.stats().frames_processed, 5);
    }

    #[test]
    fn test_fused_result_and_stage_latencies() {
        let config = test_config();
        let (mut pipeline, _) = pipeline(
            &config,
            SharedControl::default(),
            Box::new(ScriptedDetector::moving_box(1, 0.9)),
        );
        let result = pipeline.process_frame(7, &Frame::new(64, 64));

        let cls = result.classification.unwrap();
        assert_eq!(cls.label, "stop");
        assert_eq!(cls.confidence, 0.9);
        assert!(cls.raw_scores.is_some());
        assert_eq!(result.fps, 0.0);
        assert!(!result.degraded);

        let keys: Vec<&str> = result.stage_latencies.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["classify_ms", "detect_ms", "llm_ms", "preprocess_ms"]);
        assert!(result.latency_ms >= 0.0);
    }

    #[test]
    fn test_low_confidence_detections_are_discarded() {
        let config = test_config();
        let (mut pipeline, _) = pipeline(
            &config,
            SharedControl::default(),
            Box::new(ScriptedDetector::moving_box(1, 0.2)),
        );
        let result = pipeline.process_frame(0, &Frame::new(64, 64));
        assert!(result.detections.is_empty());
        assert!(result.classification.is_none());
        assert_eq!(result.safety_tier, SafetyTier::Unknown);
        assert!(pipeline.tracker().is_empty());
    }

    #[test]
    fn test_detector_failure_degrades_frame() {
        init_logger();
        let config = test_config();
        let (mut pipeline, _) =
            pipeline(&config, SharedControl::default(), Box::new(FailingDetector));
        let result = pipeline.process_frame(0, &Frame::new(64, 64));
        assert!(result.detections.is_empty());
        assert_eq!(result.safety_tier, SafetyTier::Unknown);
        assert_eq!(pipeline.stats().detection_failures, 1);
    }

    #[test]
    fn test_manual_override_suppresses_explanation() {
        let config = test_config();
        let control = SharedControl::default();
        control.set_manual_override(true);
        let (mut pipeline, calls) = pipeline(
            &config,
            control,
            Box::new(ScriptedDetector::moving_box(5, 0.9)),
        );

        let results: Vec<FrameResult> = pipeline.run(blank_frames(5)).collect();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.manual_override && r.explanation.is_none()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_max_frames_and_quit() {
        let mut config = test_config();
        config.runtime.max_frames = Some(2);
        let control = SharedControl::default();
        let (mut pipeline, _) = pipeline(
            &config,
            control.clone(),
            Box::new(ScriptedDetector::moving_box(5, 0.9)),
        );
        assert_eq!(pipeline.run(blank_frames(5)).count(), 2);

        control.request_quit();
        assert_eq!(pipeline.run(blank_frames(5)).count(), 0);
    }

    #[test]
    fn test_pause_does_not_consume_frames() {
        let config = test_config();
        let control = SharedControl::default();
        control.toggle_pause();
        let (mut pipeline, _) = pipeline(
            &config,
            control.clone(),
            Box::new(ScriptedDetector::moving_box(5, 0.9)),
        );

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let frames = blank_frames(3).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let resume = control.clone();
        let observed = pulled.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            let before = observed.load(Ordering::SeqCst);
            resume.toggle_pause();
            before
        });

        let mut stream = pipeline.run(frames);
        let first = stream.next().map(|r| r.frame_id);
        assert_eq!(handle.join().unwrap(), 0);
        assert_eq!(first, Some(0));
    }

    #[test]
    fn test_aged_out_track_drops_cached_explanation() {
        let mut config = test_config();
        config.tracking.max_age = 1;
        config.tracking.min_stable = 1;

        let mut script = ScriptedDetector::moving_box(1, 0.9);
        script.frames.push(Vec::new());
        script.frames.push(Vec::new());
        script
            .frames
            .push(vec![Detection::new("stop", 0.9, Bbox::new(10, 10, 50, 50))]);

        let (mut pipeline, calls) =
            pipeline(&config, SharedControl::default(), Box::new(script));
        let results: Vec<FrameResult> = pipeline.run(blank_frames(4)).collect();

        assert!(results[0].explanation.is_some());
        assert!(pipeline.gate().cached(0).is_none());
        assert_eq!(results[3].detections[0].track_id, Some(1));
        assert!(results[3].explanation.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reset_clears_tracks_and_cache() {
        let mut config = test_config();
        config.tracking.min_stable = 1;
        let (mut pipeline, calls) = pipeline(
            &config,
            SharedControl::default(),
            Box::new(ScriptedDetector::moving_box(2, 0.9)),
        );
        assert!(pipeline.process_frame(0, &Frame::new(64, 64)).explanation.is_some());
        pipeline.reset();
        assert!(pipeline.tracker().is_empty());
        assert!(pipeline.gate().is_empty());

        let result = pipeline.process_frame(1, &Frame::new(64, 64));
        assert_eq!(result.detections[0].track_id, Some(0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
