use super::detector::Detector;
use super::model::LazyModel;
use crate::common::Frame;
use crate::error::{BoxError, DetectorError};
use crate::pipeline::types::RecognizerResult;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    /// Recognizer confidence in `0.0..=1.0`.
    pub confidence: f64,
}

impl TextLine {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextBlock {
    pub lines: Vec<TextLine>,
}

/// Backend that runs text recognition on one frame.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, frame: &Frame) -> Result<Vec<TextBlock>, BoxError>;
}

/// Text detector over a lazily loaded recognizer. Emits lines in reading order.
pub struct TextDetector {
    model: LazyModel<dyn TextRecognizer>,
}

impl TextDetector {
    pub const NAME: &'static str = "TextDetector";

    pub fn new<F, R>(loader: F) -> Self
    where
        F: Fn() -> Result<R, BoxError> + Send + Sync + 'static,
        R: TextRecognizer + 'static,
    {
        Self {
            model: LazyModel::new(Self::NAME, move || {
                loader().map(|recognizer| Arc::new(recognizer) as Arc<dyn TextRecognizer>)
            }),
        }
    }
}

#[async_trait]
impl Detector for TextDetector {
    type Output = TextLine;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<TextLine>, DetectorError> {
        let recognizer = self.model.get().await?;
        let blocks = recognizer
            .recognize(frame)
            .await
            .map_err(|source| DetectorError::Runtime {
                detector: Self::NAME,
                source,
            })?;
        Ok(blocks.into_iter().flat_map(|block| block.lines).collect())
    }

    async fn close(&self) {
        if self.model.close().await {
            tracing::debug!(detector = Self::NAME, "Recognizer released");
        }
    }
}

/// Lines with empty text are dropped; confidence becomes a percentage.
pub fn map_text_line(line: TextLine) -> Option<RecognizerResult> {
    if line.text.is_empty() {
        return None;
    }
    Some(RecognizerResult::Text {
        content: line.text,
        confidence_percent: line.confidence * 100.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PixelFormat;

    struct FixedRecognizer(Vec<TextBlock>);

    #[async_trait]
    impl TextRecognizer for FixedRecognizer {
        async fn recognize(&self, _frame: &Frame) -> Result<Vec<TextBlock>, BoxError> {
            Ok(self.0.clone())
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0u8; 4], 2, 2, PixelFormat::Luma8).unwrap()
    }

    #[tokio::test]
    async fn flattens_blocks_into_lines() {
        let detector = TextDetector::new(|| {
            Ok(FixedRecognizer(vec![
                TextBlock {
                    lines: vec![TextLine::new("A", 0.9), TextLine::new("B", 0.7)],
                },
                TextBlock {
                    lines: vec![TextLine::new("C", 0.5)],
                },
            ]))
        });
        let lines = detector.detect(&frame()).await.unwrap();
        let texts: Vec<_> = lines.iter().map(|line| line.text.as_str()).collect();
        assert_eq!(texts, ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn detect_after_close_fails() {
        let detector = TextDetector::new(|| Ok(FixedRecognizer(Vec::new())));
        detector.detect(&frame()).await.unwrap();
        detector.close().await;
        assert!(matches!(
            detector.detect(&frame()).await,
            Err(DetectorError::Closed { .. })
        ));
    }

    #[test]
    fn mapping_scales_confidence_and_drops_empty_lines() {
        match map_text_line(TextLine::new("A", 0.9)) {
            Some(RecognizerResult::Text {
                content,
                confidence_percent,
            }) => {
                assert_eq!(content, "A");
                assert!((confidence_percent - 90.0).abs() < 1e-9);
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
        assert_eq!(map_text_line(TextLine::new("", 0.99)), None);
        assert_eq!(
            map_text_line(TextLine::new("   ", 0.5)),
            Some(RecognizerResult::Text {
                content: "   ".to_string(),
                confidence_percent: 50.0,
            })
        );
    }
}
