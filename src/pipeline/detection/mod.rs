pub mod barcode_detector;
pub mod detector;
pub mod model;
pub mod text_detector;

pub use barcode_detector::{Barcode, BarcodeDetector, BarcodeFormat, BarcodeScanner, map_barcode};
pub use detector::Detector;
pub use model::LazyModel;
pub use text_detector::{TextBlock, TextDetector, TextLine, TextRecognizer, map_text_line};
