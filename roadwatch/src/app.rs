//! A capture source wired to a pipeline

use crate::capture::CaptureBackend;
use crate::config::AppConfig;
use crate::control::SharedControl;
use crate::error::Result;
use crate::pipeline::{PipelineStats, ResultStream, StreamPipeline};
use crate::source::{FrameSource, Frames, SourceStats};
use std::sync::Arc;

/// Owns a running frame source and the pipeline that consumes it
pub struct Session {
    source: FrameSource,
    pipeline: StreamPipeline,
}

impl Session {
    /// Validate the configuration, open the source and build the pipeline.
    /// Fails with `SourceUnavailable` if the capture source cannot be opened.
    pub fn open(
        config: &AppConfig,
        control: SharedControl,
        backend: Arc<dyn CaptureBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = StreamPipeline::new(config, control);
        Self::start(config, pipeline, backend)
    }

    /// Like `open`, with a caller-assembled pipeline
    pub fn start(
        config: &AppConfig,
        pipeline: StreamPipeline,
        backend: Arc<dyn CaptureBackend>,
    ) -> Result<Self> {
        let mut source = FrameSource::new((&config.runtime).into(), backend);
        if let Err(e) = source.start() {
            log::error!("Failed to open video source '{}': {}", config.runtime.source, e);
            return Err(e);
        }
        Ok(Self { source, pipeline })
    }

    /// Live sequence of frame results
    pub fn results(&mut self) -> ResultStream<'_, Frames> {
        let frames = self.source.frames();
        self.pipeline.run(frames)
    }

    pub fn pipeline(&self) -> &StreamPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut StreamPipeline {
        &mut self.pipeline
    }

    pub fn source_stats(&self) -> SourceStats {
        self.source.stats()
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Restart capture from the beginning with a clean tracker and cache
    pub fn restart(&mut self) -> Result<()> {
        self.source.start()?;
        self.pipeline.reset();
        Ok(())
    }

    pub fn stop(&mut self) {
        self.source.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ImageDirBackend, SyntheticBackend};
    use crate::error::PipelineError;
    use crate::preprocessing::Passthrough;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.runtime.target_fps = 500.0;
        config.runtime.poll_timeout_ms = 50;
        config.runtime.frame_queue = 8;
        config
    }

    #[test]
    fn test_open_unavailable_source_is_fatal() {
        let mut config = config();
        config.runtime.source = "/no/such/dir".to_string();
        let err = Session::open(&config, SharedControl::default(), Arc::new(ImageDirBackend))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::SourceUnavailable(_)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = config();
        config.runtime.frame_queue = 0;
        let err = Session::open(&config, SharedControl::default(), Arc::new(SyntheticBackend::default()))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_session_runs_to_end_of_stream() {
        let config = config();
        let control = SharedControl::default();
        let pipeline = StreamPipeline::new(&config, control).with_preprocessor(Box::new(Passthrough));
        let backend = Arc::new(SyntheticBackend::new(64, 48, 4));
        let mut session = Session::start(&config, pipeline, backend).unwrap();

        let results: Vec<_> = session.results().collect();
        assert_eq!(results.len(), 4);
        // Fallback boxes fall below the detector confidence threshold
        assert!(results.iter().all(|r| r.detections.is_empty()));
        assert_eq!(session.pipeline_stats().frames_processed, 4);
        assert_eq!(session.source_stats().frames_captured, 4);

        session.restart().unwrap();
        let ids: Vec<u64> = session.results().map(|r| r.frame_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        session.stop();
    }
}
