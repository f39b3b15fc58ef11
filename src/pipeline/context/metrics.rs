use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Rolling latency counters are reset once this many runs have been recorded.
pub const LATENCY_WINDOW_RUNS: u32 = 500;
pub const FPS_INTERVAL: Duration = Duration::from_secs(1);

/// Rolling latency accumulators for frame-to-result and pure detector time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyWindow {
    pub num_runs: u32,
    pub total_frame: Duration,
    pub max_frame: Duration,
    pub min_frame: Duration,
    pub total_detector: Duration,
    pub max_detector: Duration,
    pub min_detector: Duration,
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self {
            num_runs: 0,
            total_frame: Duration::ZERO,
            max_frame: Duration::ZERO,
            min_frame: Duration::MAX,
            total_detector: Duration::ZERO,
            max_detector: Duration::ZERO,
            min_detector: Duration::MAX,
        }
    }
}

impl LatencyWindow {
    fn record(&mut self, frame: Duration, detector: Duration) {
        self.num_runs += 1;
        self.total_frame = self.total_frame.saturating_add(frame);
        self.max_frame = self.max_frame.max(frame);
        self.min_frame = self.min_frame.min(frame);
        self.total_detector = self.total_detector.saturating_add(detector);
        self.max_detector = self.max_detector.max(detector);
        self.min_detector = self.min_detector.min(detector);
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn frame_stats(&self) -> LatencyStats {
        LatencyStats::from_parts(self.num_runs, self.total_frame, self.min_frame, self.max_frame)
    }

    pub fn detector_stats(&self) -> LatencyStats {
        LatencyStats::from_parts(
            self.num_runs,
            self.total_detector,
            self.min_detector,
            self.max_detector,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStats {
    pub avg: Duration,
    /// `None` until the first run of the window is recorded.
    pub min: Option<Duration>,
    pub max: Duration,
}

impl LatencyStats {
    fn from_parts(num_runs: u32, total: Duration, min: Duration, max: Duration) -> Self {
        if num_runs == 0 {
            return Self {
                avg: Duration::ZERO,
                min: None,
                max: Duration::ZERO,
            };
        }
        Self {
            avg: total / num_runs,
            min: Some(min),
            max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub num_runs: u32,
    pub frame: LatencyStats,
    pub detector: LatencyStats,
    pub frames_per_second: u32,
    pub failed_detections: u64,
}

/// Pure observability: latency windows, a one-second FPS counter and a failure count.
/// Nothing in the pipeline branches on these values.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    window: Mutex<LatencyWindow>,
    frames_in_interval: AtomicU32,
    frames_per_second: AtomicU32,
    failed_detections: AtomicU64,
    verbose: bool,
}

impl LatencyTracker {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, LatencyWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_frame(&self, frame_latency: Duration, detector_latency: Duration) {
        let mut window = self.lock();
        if window.num_runs >= LATENCY_WINDOW_RUNS {
            window.reset();
        }
        window.record(frame_latency, detector_latency);

        let in_interval = self.frames_in_interval.fetch_add(1, Ordering::AcqRel) + 1;
        // First frame of a new interval: log the summary at most once per second.
        if self.verbose && in_interval == 1 {
            let frame = window.frame_stats();
            let detector = window.detector_stats();
            debug!(
                num_runs = window.num_runs,
                "Frame latency: max={}ms, min={}ms, avg={}ms; Detector latency: max={}ms, min={}ms, avg={}ms",
                frame.max.as_millis(),
                frame.min.unwrap_or_default().as_millis(),
                frame.avg.as_millis(),
                detector.max.as_millis(),
                detector.min.unwrap_or_default().as_millis(),
                detector.avg.as_millis(),
            );
        }
    }

    pub fn record_failure(&self) {
        self.failed_detections.fetch_add(1, Ordering::Relaxed);
    }

    /// Closes the current FPS interval. Driven by a fixed timer, not by frame arrival.
    pub fn roll_fps_window(&self) {
        let processed = self.frames_in_interval.swap(0, Ordering::AcqRel);
        self.frames_per_second.store(processed, Ordering::Release);
    }

    pub fn current_fps(&self) -> u32 {
        self.frames_per_second.load(Ordering::Acquire)
    }

    pub fn window(&self) -> LatencyWindow {
        *self.lock()
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let window = self.window();
        LatencySnapshot {
            num_runs: window.num_runs,
            frame: window.frame_stats(),
            detector: window.detector_stats(),
            frames_per_second: self.current_fps(),
            failed_detections: self.failed_detections.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.lock().reset();
        self.frames_in_interval.store(0, Ordering::Release);
        self.frames_per_second.store(0, Ordering::Release);
    }
}

/// Spawns the fixed one-second FPS tick. The task ends when `cancel` fires.
pub fn spawn_fps_ticker(
    tracker: Arc<LatencyTracker>,
    handle: &Handle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    handle.spawn(async move {
        let mut interval = tokio::time::interval(FPS_INTERVAL);
        // After a stall, one late tick closes the interval; no catch-up burst.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => tracker.roll_fps_window(),
            }
        }
    })
}
