use serde::{Deserialize, Serialize};
use std::fmt;

/// Which family of detector produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectorKind {
    Text,
    Barcode,
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorKind::Text => write!(f, "text"),
            DetectorKind::Barcode => write!(f, "barcode"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    pub kind: DetectorKind,
    pub enabled: bool,
}

/// A single recognized item, shaped the way consumers receive it:
/// `{"text":{"content":"..","confidencePercentage":90.0}}` or `{"barcode":{"content":".."}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecognizerResult {
    #[serde(rename_all = "camelCase")]
    Text {
        content: String,
        #[serde(rename = "confidencePercentage")]
        confidence_percent: f64,
    },
    Barcode { content: String },
}

impl RecognizerResult {
    pub fn kind(&self) -> DetectorKind {
        match self {
            RecognizerResult::Text { .. } => DetectorKind::Text,
            RecognizerResult::Barcode { .. } => DetectorKind::Barcode,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            RecognizerResult::Text { content, .. } | RecognizerResult::Barcode { content } => {
                content
            }
        }
    }
}
