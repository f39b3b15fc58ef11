pub mod analyzer;
pub mod dispatcher;
pub mod service;

pub use analyzer::{Analyzer, AnalyzerAdapter, ResultMapper};
pub use dispatcher::{Admission, DetectionDispatcher, DispatcherState};
pub use service::{AnalyzerService, BoxAnalyzerService};
