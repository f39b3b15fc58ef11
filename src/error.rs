use crate::pipeline::types::DetectorKind;
use std::time::Duration;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Lifecycle Error: {0}")]
    Lifecycle(#[from] LifecycleError),
    #[error("Config Error: {0}")]
    Config(#[from] ConfigError),
    #[error("The pipeline must be started from within a tokio runtime.")]
    NoRuntime,
}

// Raised when start()/stop() are called out of sequence. Never retried.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("The pipeline is already started.")]
    AlreadyStarted,
    #[error("The pipeline has not been started.")]
    NotStarted,
    #[error("The pipeline is already stopped.")]
    AlreadyStopped,
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to initialise detector {detector}: {source}")]
    Init {
        detector: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("Detector {detector} failed to process frame: {source}")]
    Runtime {
        detector: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("Detector {detector} timed out after {after:?}")]
    Timeout {
        detector: &'static str,
        after: Duration,
    },
    #[error("Detector {detector} was used after being closed")]
    Closed { detector: &'static str },
    #[error("Detector {detector} panicked while processing a frame")]
    Panicked { detector: &'static str },
}

impl DetectorError {
    pub fn detector(&self) -> &'static str {
        match self {
            DetectorError::Init { detector, .. }
            | DetectorError::Runtime { detector, .. }
            | DetectorError::Timeout { detector, .. }
            | DetectorError::Closed { detector }
            | DetectorError::Panicked { detector } => detector,
        }
    }

    /// Initialisation failures disable the analyzer for the rest of the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DetectorError::Init { .. })
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("The {0} detector is enabled but no detector was provided")]
    MissingDetector(DetectorKind),
    #[error("No detectors are enabled")]
    NoDetectorsEnabled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },
    #[error("Frame buffer holds {actual} bytes but {expected} are required")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Frame of {width}x{height} is too large to address")]
    TooLarge { width: u32, height: u32 },
    #[error("Unsupported rotation of {0} degrees")]
    InvalidRotation(u32),
}
