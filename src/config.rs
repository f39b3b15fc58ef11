use crate::error::ConfigError;
use crate::pipeline::types::{DetectorConfig, DetectorKind};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "RECOGNIZER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DetectorToggle {
    pub allow: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Upper bound for one analyzer on one frame. Unset means inference always runs to completion.
    #[serde(alias = "detectorTimeoutMs", alias = "detectortimeoutms")]
    pub detector_timeout_ms: Option<u64>,
    /// Analyzer tasks allowed to run at once across the whole pipeline.
    #[serde(alias = "maxConcurrentDetections", alias = "maxconcurrentdetections")]
    pub max_concurrent_detections: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            detector_timeout_ms: None,
            max_concurrent_detections: 4,
        }
    }
}

impl PipelineSettings {
    pub fn detector_timeout(&self) -> Option<Duration> {
        self.detector_timeout_ms.map(Duration::from_millis)
    }
}

/// Fixed at pipeline construction; changing it means building a new pipeline.
///
/// Plugin-style camelCase keys are accepted too. `config` may hand them over lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    #[serde(alias = "isLoggingEnabled", alias = "isloggingenabled")]
    pub logging_enabled: bool,
    #[serde(alias = "textRecognizer", alias = "textrecognizer")]
    pub text_recognizer: DetectorToggle,
    #[serde(alias = "barcodeScanner", alias = "barcodescanner")]
    pub barcode_scanner: DetectorToggle,
    pub pipeline: PipelineSettings,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            logging_enabled: false,
            text_recognizer: DetectorToggle { allow: true },
            barcode_scanner: DetectorToggle { allow: true },
            pipeline: PipelineSettings::default(),
        }
    }
}

impl RecognizerConfig {
    /// Layers an optional config file under `RECOGNIZER__*` environment variables,
    /// e.g. `RECOGNIZER__BARCODE_SCANNER__ALLOW=false`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn text_enabled(&self) -> bool {
        self.text_recognizer.allow
    }

    pub fn barcode_enabled(&self) -> bool {
        self.barcode_scanner.allow
    }

    pub fn detector_configs(&self) -> [DetectorConfig; 2] {
        [
            DetectorConfig {
                kind: DetectorKind::Text,
                enabled: self.text_enabled(),
            },
            DetectorConfig {
                kind: DetectorKind::Barcode,
                enabled: self.barcode_enabled(),
            },
        ]
    }
}
