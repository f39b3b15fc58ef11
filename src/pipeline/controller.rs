use crate::common::Frame;
use crate::config::RecognizerConfig;
use crate::error::{ConfigError, LifecycleError, PipelineError};
use crate::pipeline::context::LatencySnapshot;
use crate::pipeline::detection::{Barcode, Detector, TextLine};
use crate::pipeline::events::{ErrorSink, ListenerHandle, ResultBus, ResultListener, TracingErrorSink};
use crate::pipeline::orchestration::{Admission, Analyzer, AnalyzerAdapter, DetectionDispatcher};
use crate::pipeline::types::{DetectorKind, RecognizerResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::info;

enum Lifecycle {
    Ready(Vec<Arc<dyn Analyzer>>),
    Running(Arc<DetectionDispatcher>),
    Stopped,
}

/// Owns the result bus and binds the detection dispatcher to the camera lifecycle.
///
/// `start` is called once capture and detector resources are ready, `stop` exactly once on
/// teardown. Frames offered outside that window are dropped.
pub struct PipelineController {
    config: RecognizerConfig,
    bus: Arc<ResultBus>,
    error_sink: Arc<dyn ErrorSink>,
    lifecycle: Mutex<Lifecycle>,
}

impl PipelineController {
    pub fn builder(config: RecognizerConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    /// Must be called from within a tokio runtime; frames may then be offered from any thread.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut lifecycle = self.lock();
        let analyzers = match &mut *lifecycle {
            Lifecycle::Ready(analyzers) => analyzers,
            Lifecycle::Running(_) => return Err(LifecycleError::AlreadyStarted.into()),
            Lifecycle::Stopped => return Err(LifecycleError::AlreadyStopped.into()),
        };
        let runtime = Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;
        let analyzers = std::mem::take(analyzers);

        let kinds: Vec<DetectorKind> = analyzers.iter().map(|analyzer| analyzer.kind()).collect();
        let dispatcher = Arc::new(DetectionDispatcher::new(
            analyzers,
            self.bus.clone(),
            self.error_sink.clone(),
            &self.config.pipeline,
            self.config.logging_enabled,
            runtime,
        ));
        dispatcher.start()?;
        *lifecycle = Lifecycle::Running(dispatcher);
        info!(?kinds, "Recognizer pipeline started");
        Ok(())
    }

    pub fn on_frame_offered(&self, frame: Frame) -> Admission {
        let dispatcher = match &*self.lock() {
            Lifecycle::Running(dispatcher) => dispatcher.clone(),
            Lifecycle::Ready(_) | Lifecycle::Stopped => return Admission::Rejected,
        };
        dispatcher.on_frame_offered(frame)
    }

    /// Drains the in-flight cycle, closes every detector and tears the result bus down.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        let dispatcher = {
            let mut lifecycle = self.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(dispatcher) => dispatcher,
                Lifecycle::Ready(analyzers) => {
                    *lifecycle = Lifecycle::Ready(analyzers);
                    return Err(LifecycleError::NotStarted.into());
                }
                Lifecycle::Stopped => return Err(LifecycleError::AlreadyStopped.into()),
            }
        };

        let snapshot = dispatcher.stop().await?;
        self.bus.clear();
        info!(
            num_runs = snapshot.num_runs,
            fps = snapshot.frames_per_second,
            failed = snapshot.failed_detections,
            "Recognizer pipeline stopped"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.lock(), Lifecycle::Running(_))
    }

    /// Latency and throughput of the running pipeline.
    pub fn snapshot(&self) -> Option<LatencySnapshot> {
        match &*self.lock() {
            Lifecycle::Running(dispatcher) => Some(dispatcher.snapshot()),
            Lifecycle::Ready(_) | Lifecycle::Stopped => None,
        }
    }

    pub fn bus(&self) -> &Arc<ResultBus> {
        &self.bus
    }

    pub fn subscribe(&self, listener: impl ResultListener + 'static) -> ListenerHandle {
        self.bus.subscribe(listener)
    }

    pub fn subscribe_channel(&self) -> (ListenerHandle, mpsc::UnboundedReceiver<RecognizerResult>) {
        self.bus.subscribe_channel()
    }

    pub fn unsubscribe(&self, handle: ListenerHandle) {
        self.bus.unsubscribe(handle)
    }
}

pub struct PipelineBuilder {
    config: RecognizerConfig,
    text: Option<Arc<dyn Analyzer>>,
    barcode: Option<Arc<dyn Analyzer>>,
    error_sink: Option<Arc<dyn ErrorSink>>,
}

impl PipelineBuilder {
    pub fn new(config: RecognizerConfig) -> Self {
        Self {
            config,
            text: None,
            barcode: None,
            error_sink: None,
        }
    }

    // Enables or disables text recognition, this will override the configuration.
    pub fn enable_text(mut self, enabled: bool) -> Self {
        self.config.text_recognizer.allow = enabled;
        self
    }

    // Enables or disables barcode scanning, this will override the configuration.
    pub fn enable_barcode(mut self, enabled: bool) -> Self {
        self.config.barcode_scanner.allow = enabled;
        self
    }

    // Enables verbose logging, this will override the configuration.
    pub fn logging_enabled(mut self, enabled: bool) -> Self {
        self.config.logging_enabled = enabled;
        self
    }

    pub fn text_detector<D>(mut self, detector: D) -> Self
    where
        D: Detector<Output = TextLine>,
    {
        self.text = Some(Arc::new(AnalyzerAdapter::text(detector)));
        self
    }

    pub fn barcode_detector<D>(mut self, detector: D) -> Self
    where
        D: Detector<Output = Barcode>,
    {
        self.barcode = Some(Arc::new(AnalyzerAdapter::barcode(detector)));
        self
    }

    /// Where detection failures are reported. Defaults to logging them.
    pub fn error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    pub fn build(mut self) -> Result<PipelineController, ConfigError> {
        let mut analyzers = Vec::new();
        for detector in self.config.detector_configs() {
            if !detector.enabled {
                continue;
            }
            let analyzer = match detector.kind {
                DetectorKind::Text => self.text.take(),
                DetectorKind::Barcode => self.barcode.take(),
            }
            .ok_or(ConfigError::MissingDetector(detector.kind))?;
            analyzers.push(analyzer);
        }
        if analyzers.is_empty() {
            return Err(ConfigError::NoDetectorsEnabled);
        }

        let bus = Arc::new(ResultBus::new(self.config.logging_enabled));
        Ok(PipelineController {
            bus,
            error_sink: self
                .error_sink
                .unwrap_or_else(|| Arc::new(TracingErrorSink)),
            lifecycle: Mutex::new(Lifecycle::Ready(analyzers)),
            config: self.config,
        })
    }
}
