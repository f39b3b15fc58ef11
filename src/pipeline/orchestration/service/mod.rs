pub mod analyzer_service;

pub use analyzer_service::{AnalyzerService, BoxAnalyzerService, into_detector_error};
