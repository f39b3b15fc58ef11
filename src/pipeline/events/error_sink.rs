use crate::error::DetectorError;
use crate::pipeline::types::DetectorKind;
use uuid::Uuid;

/// One analyzer failing on one frame.
#[derive(Debug)]
pub struct DetectionFailure {
    pub kind: DetectorKind,
    pub frame_id: Uuid,
    pub error: DetectorError,
}

/// Side channel for detection failures. The pipeline never stops because of them.
pub trait ErrorSink: Send + Sync {
    fn report(&self, failure: &DetectionFailure);
}

impl<F> ErrorSink for F
where
    F: Fn(&DetectionFailure) + Send + Sync,
{
    fn report(&self, failure: &DetectionFailure) {
        self(failure)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, failure: &DetectionFailure) {
        tracing::error!(
            kind = %failure.kind,
            frame = %failure.frame_id,
            "Detection failed: {}",
            failure.error
        );
    }
}
