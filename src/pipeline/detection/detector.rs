use crate::common::Frame;
use crate::error::DetectorError;
use async_trait::async_trait;

/// An opaque vision capability: given a frame, asynchronously produce typed raw results.
///
/// Implementations may hold expensive model state that is loaded on first use. `close`
/// releases that state; the owning analyzer guarantees it is called at most once.
/// A detector is never asked to process two frames at the same time.
#[async_trait]
pub trait Detector: Send + Sync + 'static {
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    async fn detect(&self, frame: &Frame) -> Result<Vec<Self::Output>, DetectorError>;

    async fn close(&self);
}
