use crate::common::Frame;
use crate::error::DetectorError;
use crate::pipeline::detection::{Barcode, Detector, TextLine, map_barcode, map_text_line};
use crate::pipeline::events::ResultBus;
use crate::pipeline::types::{DetectorKind, RecognizerResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// A detector plus the mapping that turns its output into [`RecognizerResult`]s.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn kind(&self) -> DetectorKind;

    fn name(&self) -> &'static str;

    /// `false` once the detector failed to initialise.
    fn is_enabled(&self) -> bool;

    /// Runs detection on `frame` and publishes every mapped result as soon as it is mapped.
    /// Returns the number of results published.
    async fn analyze(&self, frame: &Frame, bus: &ResultBus) -> Result<usize, DetectorError>;

    /// Releases the detector. Only the first call has any effect; returns whether it was this one.
    async fn close(&self) -> bool;
}

pub type ResultMapper<T> = Box<dyn Fn(T) -> Option<RecognizerResult> + Send + Sync>;

pub struct AnalyzerAdapter<D: Detector> {
    kind: DetectorKind,
    detector: D,
    mapper: ResultMapper<D::Output>,
    disabled: AtomicBool,
    closed: AtomicBool,
}

impl<D: Detector> AnalyzerAdapter<D> {
    pub fn new<F>(kind: DetectorKind, detector: D, mapper: F) -> Self
    where
        F: Fn(D::Output) -> Option<RecognizerResult> + Send + Sync + 'static,
    {
        Self {
            kind,
            detector,
            mapper: Box::new(mapper),
            disabled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }
}

impl<D: Detector<Output = TextLine>> AnalyzerAdapter<D> {
    pub fn text(detector: D) -> Self {
        Self::new(DetectorKind::Text, detector, map_text_line)
    }
}

impl<D: Detector<Output = Barcode>> AnalyzerAdapter<D> {
    pub fn barcode(detector: D) -> Self {
        Self::new(DetectorKind::Barcode, detector, map_barcode)
    }
}

#[async_trait]
impl<D: Detector> Analyzer for AnalyzerAdapter<D> {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        self.detector.name()
    }

    fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::Acquire)
    }

    async fn analyze(&self, frame: &Frame, bus: &ResultBus) -> Result<usize, DetectorError> {
        if !self.is_enabled() {
            return Ok(0);
        }
        let raw = match self.detector.detect(frame).await {
            Ok(raw) => raw,
            Err(err) => {
                if err.is_fatal() && !self.disabled.swap(true, Ordering::AcqRel) {
                    warn!(
                        kind = %self.kind,
                        detector = self.name(),
                        "Analyzer disabled for the rest of the session"
                    );
                }
                return Err(err);
            }
        };

        let mut published = 0;
        for item in raw {
            if let Some(result) = (self.mapper)(item) {
                bus.notify(&result);
                published += 1;
            }
        }
        Ok(published)
    }

    async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.detector.close().await;
        true
    }
}
