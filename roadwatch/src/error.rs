//! Error types for the streaming recognition core

use thiserror::Error;

/// Result type alias for the streaming core
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while capturing and processing a stream
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The capture source could not be opened. Fatal for the run.
    #[error("Video source unavailable: {0}")]
    SourceUnavailable(String),

    /// A read from an opened capture device failed. Ends the producer.
    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Explanation failed: {0}")]
    Explanation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn source_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn capture<S: Into<String>>(msg: S) -> Self {
        Self::Capture(msg.into())
    }

    pub fn detection<S: Into<String>>(msg: S) -> Self {
        Self::Detection(msg.into())
    }

    pub fn classification<S: Into<String>>(msg: S) -> Self {
        Self::Classification(msg.into())
    }

    pub fn explanation<S: Into<String>>(msg: S) -> Self {
        Self::Explanation(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn http<S: Into<String>>(msg: S) -> Self {
        Self::Http(msg.into())
    }

    /// Whether the run must abort rather than degrade
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::Config(_))
    }
}
