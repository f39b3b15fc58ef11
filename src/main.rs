use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, Rgb};
use live_recognizer::error::BoxError;
use live_recognizer::pipeline::detection::{
    Barcode, BarcodeDetector, BarcodeFormat, BarcodeScanner, TextBlock, TextDetector, TextLine,
    TextRecognizer,
};
use live_recognizer::{Frame, PipelineController, PipelineError, RecognizerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{Level, info, warn};

const CAPTURE_INTERVAL: Duration = Duration::from_millis(33);
const RUN_FOR: Duration = Duration::from_secs(5);

fn init_logging(enabled: bool) {
    let level = if enabled { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt().with_max_level(level).init();
}

/// Reports the mean brightness of the frame as a line of text.
struct BrightnessRecognizer;

#[async_trait]
impl TextRecognizer for BrightnessRecognizer {
    async fn recognize(&self, frame: &Frame) -> Result<Vec<TextBlock>, BoxError> {
        tokio::time::sleep(Duration::from_millis(60)).await;
        let image = frame.to_image().ok_or("frame cannot be decoded")?.to_luma8();
        let pixels = u64::from(image.width() * image.height()).max(1);
        let mean = image.pixels().map(|p| u64::from(p.0[0])).sum::<u64>() / pixels;
        Ok(vec![TextBlock {
            lines: vec![TextLine::new(format!("brightness {mean}"), mean as f64 / 255.0)],
        }])
    }
}

/// Finds a "code" in roughly one frame out of four.
struct RandomScanner;

fn roll_barcode(frame: &Frame) -> Option<Barcode> {
    rand::random_bool(0.25).then(|| Barcode {
        raw_value: Some(frame.id().to_string()),
        format: BarcodeFormat::QrCode,
    })
}

#[async_trait]
impl BarcodeScanner for RandomScanner {
    async fn scan(&self, frame: &Frame) -> Result<Vec<Barcode>, BoxError> {
        tokio::time::sleep(Duration::from_millis(25)).await;
        Ok(roll_barcode(frame).into_iter().collect())
    }
}

fn synthetic_frame(tick: u32) -> Option<Frame> {
    let shade = (tick * 8 % 256) as u8;
    let image = ImageBuffer::from_fn(64, 48, |x, _| Rgb([shade, shade.wrapping_add(x as u8), shade]));
    match Frame::from_image(&DynamicImage::ImageRgb8(image)) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!("Synthetic frame rejected: {}", err);
            None
        }
    }
}

fn spawn_capture(controller: Arc<PipelineController>, running: Arc<AtomicBool>) -> thread::JoinHandle<u32> {
    thread::spawn(move || {
        let mut tick = 0;
        while running.load(Ordering::Acquire) {
            if let Some(frame) = synthetic_frame(tick) {
                controller.on_frame_offered(frame);
            }
            tick += 1;
            thread::sleep(CAPTURE_INTERVAL);
        }
        tick
    })
}

#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = RecognizerConfig::load(path.as_deref())?;
    init_logging(config.logging_enabled);

    let controller = Arc::new(
        PipelineController::builder(config)
            .text_detector(TextDetector::new(|| Ok(BrightnessRecognizer)))
            .barcode_detector(BarcodeDetector::new(|| Ok(RandomScanner)))
            .build()?,
    );

    let (_, mut results) = controller.subscribe_channel();
    let printer = tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            match serde_json::to_string(&result) {
                Ok(json) => println!("{json}"),
                Err(err) => warn!("Result could not be serialised: {}", err),
            }
        }
    });

    controller.start()?;
    let running = Arc::new(AtomicBool::new(true));
    let capture = spawn_capture(controller.clone(), running.clone());

    tokio::time::sleep(RUN_FOR).await;
    if let Some(snapshot) = controller.snapshot() {
        info!(?snapshot, "Pipeline statistics");
    }

    running.store(false, Ordering::Release);
    let captured = tokio::task::spawn_blocking(move || capture.join().unwrap_or_default())
        .await
        .unwrap_or_default();
    controller.stop().await?;
    let _ = printer.await;

    info!(captured, "Capture finished");
    Ok(())
}
