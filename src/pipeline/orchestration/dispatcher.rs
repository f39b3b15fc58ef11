use crate::common::Frame;
use crate::config::PipelineSettings;
use crate::error::{DetectorError, LifecycleError};
use crate::pipeline::context::metrics::spawn_fps_ticker;
use crate::pipeline::context::{FrameSlot, LatencySnapshot, LatencyTracker, SlotEntry};
use crate::pipeline::events::{DetectionFailure, ErrorSink, ResultBus};
use crate::pipeline::orchestration::analyzer::Analyzer;
use crate::pipeline::orchestration::service::{
    AnalyzerService, BoxAnalyzerService, into_detector_error,
};
use crate::pipeline::types::DetectorKind;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{debug, error, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    AwaitingFrame,
    Detecting,
    Stopped,
}

/// What happened to a frame handed to [`DetectionDispatcher::on_frame_offered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A detection cycle started on this frame.
    Dispatched,
    /// The frame waits in the slot, replacing any older pending frame.
    Buffered,
    /// The dispatcher is not running; the frame was dropped.
    Rejected,
}

struct AnalyzerEntry {
    analyzer: Arc<dyn Analyzer>,
    // BoxCloneService is Send but not Sync.
    service: Mutex<BoxAnalyzerService>,
}

impl AnalyzerEntry {
    fn service(&self) -> BoxAnalyzerService {
        self.service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct DispatcherInner {
    state: Mutex<DispatcherState>,
    slot: FrameSlot,
    latency: Arc<LatencyTracker>,
    analyzers: Vec<AnalyzerEntry>,
    error_sink: Arc<dyn ErrorSink>,
    tasks: TaskTracker,
    cancel: CancellationToken,
    runtime: Handle,
    timeout: Option<Duration>,
    verbose: bool,
}

/// Drives capture -> detect -> emit with at most one detection cycle in flight.
pub struct DetectionDispatcher {
    inner: Arc<DispatcherInner>,
}

impl DetectionDispatcher {
    pub fn new(
        analyzers: Vec<Arc<dyn Analyzer>>,
        bus: Arc<ResultBus>,
        error_sink: Arc<dyn ErrorSink>,
        settings: &PipelineSettings,
        verbose: bool,
        runtime: Handle,
    ) -> Self {
        let limit = Arc::new(Semaphore::new(settings.max_concurrent_detections.max(1)));
        let timeout = settings.detector_timeout();
        let analyzers = analyzers
            .into_iter()
            .map(|analyzer| AnalyzerEntry {
                service: Mutex::new(
                    AnalyzerService::new(analyzer.clone(), bus.clone())
                        .layered(limit.clone(), timeout),
                ),
                analyzer,
            })
            .collect();

        Self {
            inner: Arc::new(DispatcherInner {
                state: Mutex::new(DispatcherState::Idle),
                slot: FrameSlot::new(),
                latency: Arc::new(LatencyTracker::new(verbose)),
                analyzers,
                error_sink,
                tasks: TaskTracker::new(),
                cancel: CancellationToken::new(),
                runtime,
                timeout,
                verbose,
            }),
        }
    }

    pub fn start(&self) -> Result<(), LifecycleError> {
        let mut state = self.inner.lock_state();
        match *state {
            DispatcherState::Idle => {}
            DispatcherState::Stopped => return Err(LifecycleError::AlreadyStopped),
            DispatcherState::AwaitingFrame | DispatcherState::Detecting => {
                return Err(LifecycleError::AlreadyStarted);
            }
        }
        spawn_fps_ticker(
            self.inner.latency.clone(),
            &self.inner.runtime,
            self.inner.cancel.clone(),
        );
        *state = DispatcherState::AwaitingFrame;
        debug!(analyzers = self.inner.analyzers.len(), "Dispatcher started");
        Ok(())
    }

    /// Admits a frame. Never blocks on detection; may be called from any thread.
    pub fn on_frame_offered(&self, frame: Frame) -> Admission {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        if matches!(*state, DispatcherState::Idle | DispatcherState::Stopped) {
            if inner.verbose {
                debug!(frame = %frame.id(), "Frame rejected, dispatcher not running");
            }
            return Admission::Rejected;
        }

        if let Some(dropped) = inner.slot.offer(Arc::new(frame)) {
            if inner.verbose {
                debug!(frame = %dropped.id(), "Superseded pending frame dropped");
            }
        }
        if *state != DispatcherState::AwaitingFrame {
            return Admission::Buffered;
        }
        match inner.slot.take_if_idle() {
            Some(entry) => {
                *state = DispatcherState::Detecting;
                // Spawned under the state lock so stop() cannot miss the new cycle.
                let cycle = inner.clone();
                inner
                    .tasks
                    .spawn_on(run_cycles(cycle, entry), &inner.runtime);
                Admission::Dispatched
            }
            None => Admission::Buffered,
        }
    }

    /// Stops admitting frames, lets the in-flight cycle finish, then closes every analyzer once.
    /// Returns the statistics as they stood after the drain, before they are reset.
    pub async fn stop(&self) -> Result<LatencySnapshot, LifecycleError> {
        let inner = &self.inner;
        {
            let mut state = inner.lock_state();
            match *state {
                DispatcherState::Idle => return Err(LifecycleError::NotStarted),
                DispatcherState::Stopped => return Err(LifecycleError::AlreadyStopped),
                DispatcherState::AwaitingFrame | DispatcherState::Detecting => {}
            }
            *state = DispatcherState::Stopped;
            if let Some(dropped) = inner.slot.discard_pending() {
                debug!(frame = %dropped.id(), "Pending frame discarded on stop");
            }
        }

        inner.cancel.cancel();
        inner.tasks.close();
        inner.tasks.wait().await;
        let snapshot = inner.latency.snapshot();

        for entry in &inner.analyzers {
            if entry.analyzer.close().await {
                debug!(
                    kind = %entry.analyzer.kind(),
                    detector = entry.analyzer.name(),
                    "Detector closed"
                );
            }
        }
        inner.latency.reset();
        debug!("Dispatcher stopped");
        Ok(snapshot)
    }

    pub fn state(&self) -> DispatcherState {
        *self.inner.lock_state()
    }

    pub fn latency(&self) -> Arc<LatencyTracker> {
        self.inner.latency.clone()
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        self.inner.latency.snapshot()
    }
}

impl Drop for DetectionDispatcher {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

/// Processes `entry`, then keeps draining the slot until it is empty or the dispatcher stops.
async fn run_cycles(inner: Arc<DispatcherInner>, mut entry: SlotEntry) {
    loop {
        inner.detect(entry).await;
        match inner.complete_cycle() {
            Some(next) => entry = next,
            None => break,
        }
    }
}

impl DispatcherInner {
    fn lock_state(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete_cycle(&self) -> Option<SlotEntry> {
        let mut state = self.lock_state();
        self.slot.mark_idle();
        if *state == DispatcherState::Stopped {
            return None;
        }
        match self.slot.take_if_idle() {
            Some(next) => {
                *state = DispatcherState::Detecting;
                Some(next)
            }
            None => {
                *state = DispatcherState::AwaitingFrame;
                None
            }
        }
    }

    #[instrument(skip_all, fields(frame = %entry.frame.id()))]
    async fn detect(&self, entry: SlotEntry) {
        let SlotEntry { frame, offered_at } = entry;
        let detector_start = Instant::now();

        let mut cycle = JoinSet::new();
        for entry in self.analyzers.iter().filter(|entry| entry.analyzer.is_enabled()) {
            let service = entry.service();
            let kind = entry.analyzer.kind();
            let name = entry.analyzer.name();
            let frame = frame.clone();
            cycle.spawn_on(
                async move {
                    let outcome = AssertUnwindSafe(service.oneshot(frame))
                        .catch_unwind()
                        .await;
                    (kind, name, outcome)
                },
                &self.runtime,
            );
        }

        while let Some(joined) = cycle.join_next().await {
            let (kind, name, outcome) = match joined {
                Ok(done) => done,
                Err(err) => {
                    error!("Analyzer task did not complete: {err}");
                    continue;
                }
            };
            match outcome {
                Ok(Ok(published)) => {
                    if self.verbose {
                        debug!(%kind, detector = name, published, "Analyzer finished");
                    }
                }
                Ok(Err(err)) => {
                    self.report(kind, frame.id(), into_detector_error(err, name, self.timeout))
                }
                Err(_) => self.report(kind, frame.id(), DetectorError::Panicked { detector: name }),
            }
        }

        let now = Instant::now();
        self.latency
            .record_frame(now - offered_at, now - detector_start);
    }

    fn report(&self, kind: DetectorKind, frame_id: Uuid, error: DetectorError) {
        self.latency.record_failure();
        self.error_sink.report(&DetectionFailure {
            kind,
            frame_id,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::detection::{Barcode, BarcodeFormat, TextLine};
    use crate::pipeline::events::TracingErrorSink;
    use crate::pipeline::orchestration::analyzer::AnalyzerAdapter;
    use crate::pipeline::test_support::{ScriptedDetector, test_frame};
    use crate::pipeline::types::RecognizerResult;
    use tokio::sync::mpsc;

    fn dispatcher(
        analyzers: Vec<Arc<dyn Analyzer>>,
        bus: Arc<ResultBus>,
        sink: Arc<dyn ErrorSink>,
    ) -> DetectionDispatcher {
        DetectionDispatcher::new(
            analyzers,
            bus,
            sink,
            &PipelineSettings::default(),
            true,
            Handle::current(),
        )
    }

    async fn next_started(rx: &mut mpsc::UnboundedReceiver<Uuid>) -> Uuid {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("detection did not start")
            .expect("detector dropped")
    }

    #[tokio::test]
    async fn frames_are_rejected_before_start_and_after_stop() {
        let bus = Arc::new(ResultBus::new(false));
        let detector = ScriptedDetector::<TextLine>::new(Vec::new());
        let probe = detector.probe();
        let dispatcher = dispatcher(
            vec![Arc::new(AnalyzerAdapter::text(detector))],
            bus,
            Arc::new(TracingErrorSink),
        );

        assert_eq!(dispatcher.on_frame_offered(test_frame()), Admission::Rejected);
        assert_eq!(dispatcher.stop().await, Err(LifecycleError::NotStarted));

        dispatcher.start().unwrap();
        assert_eq!(dispatcher.start(), Err(LifecycleError::AlreadyStarted));
        dispatcher.stop().await.unwrap();

        assert_eq!(dispatcher.on_frame_offered(test_frame()), Admission::Rejected);
        assert_eq!(dispatcher.stop().await, Err(LifecycleError::AlreadyStopped));
        assert_eq!(dispatcher.start(), Err(LifecycleError::AlreadyStopped));
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
        assert_eq!(probe.detect_count(), 0);
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn only_the_newest_pending_frame_is_processed() {
        let bus = Arc::new(ResultBus::new(false));
        let gate = Arc::new(Semaphore::new(0));
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let detector = ScriptedDetector::<TextLine>::new(Vec::new())
            .gated(gate.clone())
            .notify_started(started_tx);
        let probe = detector.probe();
        let dispatcher = dispatcher(
            vec![Arc::new(AnalyzerAdapter::text(detector))],
            bus,
            Arc::new(TracingErrorSink),
        );
        dispatcher.start().unwrap();

        let f0 = test_frame();
        let f0_id = f0.id();
        assert_eq!(dispatcher.on_frame_offered(f0), Admission::Dispatched);
        assert_eq!(next_started(&mut started_rx).await, f0_id);
        assert_eq!(dispatcher.state(), DispatcherState::Detecting);

        let f3 = test_frame();
        let f3_id = f3.id();
        assert_eq!(dispatcher.on_frame_offered(test_frame()), Admission::Buffered);
        assert_eq!(dispatcher.on_frame_offered(test_frame()), Admission::Buffered);
        assert_eq!(dispatcher.on_frame_offered(f3), Admission::Buffered);

        gate.add_permits(1);
        assert_eq!(next_started(&mut started_rx).await, f3_id);
        gate.add_permits(1);

        dispatcher.stop().await.unwrap();
        assert_eq!(probe.detected(), vec![f0_id, f3_id]);
        assert_eq!(probe.max_active(), 1);
        assert_eq!(dispatcher.snapshot().num_runs, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_more_than_one_cycle_in_flight() {
        let bus = Arc::new(ResultBus::new(false));
        let detector = ScriptedDetector::<TextLine>::new(vec![TextLine::new("x", 1.0)])
            .with_delay(Duration::from_millis(2));
        let probe = detector.probe();
        let dispatcher = Arc::new(dispatcher(
            vec![Arc::new(AnalyzerAdapter::text(detector))],
            bus,
            Arc::new(TracingErrorSink),
        ));
        dispatcher.start().unwrap();

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        dispatcher.on_frame_offered(test_frame());
                        std::thread::sleep(Duration::from_micros(300));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.state() != DispatcherState::AwaitingFrame {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("dispatcher never went idle");
        let snapshot = dispatcher.snapshot();
        dispatcher.stop().await.unwrap();

        assert_eq!(probe.max_active(), 1);
        assert!(probe.detect_count() >= 1);
        assert!(probe.detect_count() < 200);
        assert_eq!(snapshot.num_runs as usize, probe.detect_count());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_analyzer_does_not_cancel_its_sibling() {
        let bus = Arc::new(ResultBus::new(false));
        let (_, mut results) = bus.subscribe_channel();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink_failures = failures.clone();
        let sink = move |failure: &DetectionFailure| {
            sink_failures
                .lock()
                .unwrap()
                .push((failure.kind, failure.error.detector()));
        };

        let text = ScriptedDetector::new(vec![TextLine::new("r1", 0.5), TextLine::new("r2", 0.6)]);
        let barcode = ScriptedDetector::<Barcode>::failing_runtime().named("FailingScanner");
        let dispatcher = dispatcher(
            vec![
                Arc::new(AnalyzerAdapter::text(text)),
                Arc::new(AnalyzerAdapter::barcode(barcode)),
            ],
            bus,
            Arc::new(sink),
        );
        dispatcher.start().unwrap();
        assert_eq!(dispatcher.on_frame_offered(test_frame()), Admission::Dispatched);

        let r1 = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .unwrap()
            .unwrap();
        let r2 = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .unwrap()
            .unwrap();
        dispatcher.stop().await.unwrap();

        assert_eq!(r1.content(), "r1");
        assert_eq!(r2.content(), "r2");
        assert!(results.try_recv().is_err());
        assert_eq!(
            *failures.lock().unwrap(),
            vec![(DetectorKind::Barcode, "FailingScanner")]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_analyzer_is_reported_and_its_sibling_still_delivers() {
        let bus = Arc::new(ResultBus::new(false));
        let (_, mut results) = bus.subscribe_channel();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink_failures = failures.clone();
        let sink = move |failure: &DetectionFailure| {
            sink_failures.lock().unwrap().push((
                failure.kind,
                matches!(failure.error, DetectorError::Panicked { .. }),
                failure.error.to_string(),
            ));
        };

        let text = ScriptedDetector::new(vec![TextLine::new("ok", 0.8)]);
        let barcode = ScriptedDetector::<Barcode>::panicking().named("Boom");
        let dispatcher = dispatcher(
            vec![
                Arc::new(AnalyzerAdapter::text(text)),
                Arc::new(AnalyzerAdapter::barcode(barcode)),
            ],
            bus,
            Arc::new(sink),
        );
        dispatcher.start().unwrap();
        assert_eq!(dispatcher.on_frame_offered(test_frame()), Admission::Dispatched);

        let delivered = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .unwrap()
            .unwrap();
        dispatcher.stop().await.unwrap();

        assert_eq!(delivered.content(), "ok");
        assert_eq!(
            *failures.lock().unwrap(),
            vec![(
                DetectorKind::Barcode,
                true,
                "Detector Boom panicked while processing a frame".to_string()
            )]
        );
        assert_eq!(dispatcher.snapshot().failed_detections, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn init_failure_skips_the_analyzer_on_later_frames() {
        let bus = Arc::new(ResultBus::new(false));
        let (_, mut results) = bus.subscribe_channel();
        let broken = ScriptedDetector::<TextLine>::failing_init();
        let broken_probe = broken.probe();
        let barcode = ScriptedDetector::new(vec![Barcode {
            raw_value: Some("123".to_string()),
            format: BarcodeFormat::Ean8,
        }]);
        let dispatcher = dispatcher(
            vec![
                Arc::new(AnalyzerAdapter::text(broken)),
                Arc::new(AnalyzerAdapter::barcode(barcode)),
            ],
            bus,
            Arc::new(TracingErrorSink),
        );
        dispatcher.start().unwrap();

        for _ in 0..3 {
            dispatcher.on_frame_offered(test_frame());
            let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                result,
                RecognizerResult::Barcode {
                    content: "123".to_string()
                }
            );
            while dispatcher.state() != DispatcherState::AwaitingFrame {
                tokio::task::yield_now().await;
            }
        }
        let snapshot = dispatcher.snapshot();
        dispatcher.stop().await.unwrap();

        assert_eq!(broken_probe.detect_count(), 1);
        assert_eq!(broken_probe.close_count(), 1);
        assert_eq!(snapshot.failed_detections, 1);
        assert_eq!(snapshot.num_runs, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_the_in_flight_cycle() {
        let bus = Arc::new(ResultBus::new(false));
        let (_, mut results) = bus.subscribe_channel();
        let gate = Arc::new(Semaphore::new(0));
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let detector = ScriptedDetector::new(vec![TextLine::new("late", 0.4)])
            .gated(gate.clone())
            .notify_started(started_tx);
        let probe = detector.probe();
        let dispatcher = Arc::new(dispatcher(
            vec![Arc::new(AnalyzerAdapter::text(detector))],
            bus,
            Arc::new(TracingErrorSink),
        ));
        dispatcher.start().unwrap();
        dispatcher.on_frame_offered(test_frame());
        next_started(&mut started_rx).await;
        assert_eq!(dispatcher.on_frame_offered(test_frame()), Admission::Buffered);

        let stopping = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.stop().await }
        });
        while dispatcher.state() != DispatcherState::Stopped {
            tokio::task::yield_now().await;
        }
        assert_eq!(dispatcher.on_frame_offered(test_frame()), Admission::Rejected);
        assert!(!stopping.is_finished());
        assert_eq!(probe.close_count(), 0);

        gate.add_permits(1);
        let snapshot = stopping.await.unwrap().unwrap();
        assert_eq!(snapshot.num_runs, 1);
        assert_eq!(dispatcher.snapshot().num_runs, 0);
        assert_eq!(results.try_recv().unwrap().content(), "late");
        assert!(results.try_recv().is_err());
        assert_eq!(probe.detect_count(), 1);
        assert_eq!(probe.close_count(), 1);
    }
}
