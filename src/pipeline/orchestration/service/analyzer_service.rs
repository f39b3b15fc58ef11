use crate::common::Frame;
use crate::error::{BoxError, DetectorError};
use crate::pipeline::events::ResultBus;
use crate::pipeline::orchestration::analyzer::Analyzer;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::Semaphore;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::timeout::TimeoutLayer;
use tower::timeout::error::Elapsed;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder};

pub type BoxAnalyzerService = BoxCloneService<Arc<Frame>, usize, BoxError>;

/// Runs one analyzer against a frame and publishes its results on the bus.
#[derive(Clone)]
pub struct AnalyzerService {
    analyzer: Arc<dyn Analyzer>,
    bus: Arc<ResultBus>,
}

impl AnalyzerService {
    pub fn new(analyzer: Arc<dyn Analyzer>, bus: Arc<ResultBus>) -> Self {
        Self { analyzer, bus }
    }

    /// Wraps the service with the shared concurrency limit and an optional timeout.
    ///
    /// A timeout drops the in-progress detection, so leave it unset for detectors that
    /// hold native resources.
    pub fn layered(
        self,
        limit: Arc<Semaphore>,
        timeout: Option<Duration>,
    ) -> BoxAnalyzerService {
        let service = ServiceBuilder::new()
            .layer(GlobalConcurrencyLimitLayer::with_semaphore(limit))
            .option_layer(timeout.map(TimeoutLayer::new))
            .service(self);
        BoxCloneService::new(service)
    }
}

/// Recovers the typed error from whatever the layered service returned.
pub fn into_detector_error(
    err: BoxError,
    detector: &'static str,
    timeout: Option<Duration>,
) -> DetectorError {
    match err.downcast::<DetectorError>() {
        Ok(err) => *err,
        Err(err) if err.is::<Elapsed>() => DetectorError::Timeout {
            detector,
            after: timeout.unwrap_or_default(),
        },
        Err(source) => DetectorError::Runtime { detector, source },
    }
}

impl Service<Arc<Frame>> for AnalyzerService {
    type Response = usize;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, frame: Arc<Frame>) -> Self::Future {
        let analyzer = self.analyzer.clone();
        let bus = self.bus.clone();

        Box::pin(async move {
            analyzer
                .analyze(&frame, &bus)
                .await
                .map_err(BoxError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::detection::TextLine;
    use crate::pipeline::orchestration::analyzer::AnalyzerAdapter;
    use crate::pipeline::test_support::{ScriptedDetector, test_frame};
    use tower::ServiceExt;

    fn text_service(detector: ScriptedDetector<TextLine>, bus: Arc<ResultBus>) -> AnalyzerService {
        AnalyzerService::new(Arc::new(AnalyzerAdapter::text(detector)), bus)
    }

    #[tokio::test]
    async fn test_analyzer_service() {
        let bus = Arc::new(ResultBus::new(false));
        let (_, mut rx) = bus.subscribe_channel();
        let service = text_service(
            ScriptedDetector::new(vec![TextLine::new("HELLO", 0.5)]),
            bus,
        )
        .layered(Arc::new(Semaphore::new(1)), None);

        let published = service.oneshot(Arc::new(test_frame())).await.unwrap();
        assert_eq!(published, 1);
        assert_eq!(rx.try_recv().unwrap().content(), "HELLO");
    }

    #[tokio::test]
    async fn detector_errors_survive_the_layers() {
        let bus = Arc::new(ResultBus::new(false));
        let service = text_service(ScriptedDetector::failing_runtime(), bus)
            .layered(Arc::new(Semaphore::new(1)), Some(Duration::from_secs(5)));

        let err = service.oneshot(Arc::new(test_frame())).await.unwrap_err();
        assert!(matches!(
            into_detector_error(err, "ScriptedDetector", None),
            DetectorError::Runtime { .. }
        ));
    }

    #[tokio::test]
    async fn slow_detection_times_out() {
        let bus = Arc::new(ResultBus::new(false));
        let timeout = Duration::from_millis(20);
        let service = text_service(
            ScriptedDetector::new(Vec::new()).with_delay(Duration::from_secs(5)),
            bus,
        )
        .layered(Arc::new(Semaphore::new(1)), Some(timeout));

        let err = service.oneshot(Arc::new(test_frame())).await.unwrap_err();
        match into_detector_error(err, "ScriptedDetector", Some(timeout)) {
            DetectorError::Timeout { detector, after } => {
                assert_eq!(detector, "ScriptedDetector");
                assert_eq!(after, timeout);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shared_limit_bounds_concurrent_detections() {
        let bus = Arc::new(ResultBus::new(false));
        let limit = Arc::new(Semaphore::new(1));
        let first = ScriptedDetector::<TextLine>::new(Vec::new()).with_delay(Duration::from_millis(30));
        let probe = first.probe();
        let a = text_service(first, bus.clone()).layered(limit.clone(), None);
        let b = a.clone();

        let frame = Arc::new(test_frame());
        let (left, right) = tokio::join!(a.oneshot(frame.clone()), b.oneshot(frame));
        left.unwrap();
        right.unwrap();
        assert_eq!(probe.detect_count(), 2);
        assert_eq!(probe.max_active(), 1);
    }
}
