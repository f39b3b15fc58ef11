pub mod error_sink;
pub mod result_bus;

pub use error_sink::{DetectionFailure, ErrorSink, TracingErrorSink};
pub use result_bus::{ListenerHandle, ResultBus, ResultListener};
