use super::detector::Detector;
use super::model::LazyModel;
use crate::common::Frame;
use crate::error::{BoxError, DetectorError};
use crate::pipeline::types::RecognizerResult;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarcodeFormat {
    QrCode,
    DataMatrix,
    Aztec,
    Pdf417,
    Ean13,
    Ean8,
    UpcA,
    UpcE,
    Code128,
    Code39,
    Itf,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barcode {
    /// Decoded payload. Absent when the symbol was located but could not be decoded as text.
    pub raw_value: Option<String>,
    pub format: BarcodeFormat,
}

/// Backend that scans one frame for every supported symbology.
#[async_trait]
pub trait BarcodeScanner: Send + Sync {
    async fn scan(&self, frame: &Frame) -> Result<Vec<Barcode>, BoxError>;
}

pub struct BarcodeDetector {
    model: LazyModel<dyn BarcodeScanner>,
}

impl BarcodeDetector {
    pub const NAME: &'static str = "BarcodeDetector";

    pub fn new<F, S>(loader: F) -> Self
    where
        F: Fn() -> Result<S, BoxError> + Send + Sync + 'static,
        S: BarcodeScanner + 'static,
    {
        Self {
            model: LazyModel::new(Self::NAME, move || {
                loader().map(|scanner| Arc::new(scanner) as Arc<dyn BarcodeScanner>)
            }),
        }
    }
}

#[async_trait]
impl Detector for BarcodeDetector {
    type Output = Barcode;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<Barcode>, DetectorError> {
        let scanner = self.model.get().await?;
        scanner
            .scan(frame)
            .await
            .map_err(|source| DetectorError::Runtime {
                detector: Self::NAME,
                source,
            })
    }

    async fn close(&self) {
        if self.model.close().await {
            tracing::debug!(detector = Self::NAME, "Scanner released");
        }
    }
}

pub fn map_barcode(barcode: Barcode) -> Option<RecognizerResult> {
    barcode
        .raw_value
        .filter(|value| !value.is_empty())
        .map(|content| RecognizerResult::Barcode { content })
}
