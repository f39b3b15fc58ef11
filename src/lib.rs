pub mod common;
pub mod config;
pub mod error;
pub mod pipeline;

pub use common::{Frame, PixelFormat, Rotation};
pub use config::{PipelineSettings, RecognizerConfig};
pub use error::{ConfigError, DetectorError, FrameError, LifecycleError, PipelineError};
pub use pipeline::{Admission, PipelineBuilder, PipelineController, RecognizerResult};
