pub mod context;
pub mod controller;
pub mod detection;
pub mod events;
pub mod orchestration;
pub mod types;

#[cfg(test)]
mod test_support;

pub use controller::{PipelineBuilder, PipelineController};
pub use detection::{Barcode, BarcodeFormat, Detector, TextLine};
pub use events::{DetectionFailure, ErrorSink, ListenerHandle, ResultListener};
pub use orchestration::{Admission, DispatcherState};
pub use types::{DetectorConfig, DetectorKind, RecognizerResult};
