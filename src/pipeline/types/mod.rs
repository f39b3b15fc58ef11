mod recognizer_result;

pub use recognizer_result::{DetectorConfig, DetectorKind, RecognizerResult};
