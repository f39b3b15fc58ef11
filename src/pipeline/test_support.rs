//! Test doubles shared by the pipeline's unit tests.

use crate::common::{Frame, PixelFormat};
use crate::error::DetectorError;
use crate::pipeline::detection::Detector;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use uuid::Uuid;

pub(crate) fn test_frame() -> Frame {
    Frame::new(vec![0u8; 4], 2, 2, PixelFormat::Luma8).unwrap()
}

/// What a scripted detector observed.
#[derive(Default)]
pub(crate) struct DetectorProbe {
    detected: Mutex<Vec<Uuid>>,
    closes: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl DetectorProbe {
    pub(crate) fn detected(&self) -> Vec<Uuid> {
        self.detected.lock().unwrap().clone()
    }

    pub(crate) fn detect_count(&self) -> usize {
        self.detected.lock().unwrap().len()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

enum Behavior<T> {
    Succeed(Vec<T>),
    FailRuntime,
    FailInit,
    Panic,
}

pub(crate) struct ScriptedDetector<T> {
    name: &'static str,
    behavior: Behavior<T>,
    gate: Option<Arc<Semaphore>>,
    started: Option<mpsc::UnboundedSender<Uuid>>,
    delay: Option<Duration>,
    probe: Arc<DetectorProbe>,
}

impl<T> ScriptedDetector<T> {
    fn with_behavior(behavior: Behavior<T>) -> Self {
        Self {
            name: "ScriptedDetector",
            behavior,
            gate: None,
            started: None,
            delay: None,
            probe: Arc::default(),
        }
    }

    pub(crate) fn new(outputs: Vec<T>) -> Self {
        Self::with_behavior(Behavior::Succeed(outputs))
    }

    pub(crate) fn failing_runtime() -> Self {
        Self::with_behavior(Behavior::FailRuntime)
    }

    pub(crate) fn failing_init() -> Self {
        Self::with_behavior(Behavior::FailInit)
    }

    pub(crate) fn panicking() -> Self {
        Self::with_behavior(Behavior::Panic)
    }

    pub(crate) fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Each detection waits for one permit before finishing.
    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Sends the frame id as soon as a detection starts.
    pub(crate) fn notify_started(mut self, started: mpsc::UnboundedSender<Uuid>) -> Self {
        self.started = Some(started);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn probe(&self) -> Arc<DetectorProbe> {
        self.probe.clone()
    }
}

#[async_trait]
impl<T> Detector for ScriptedDetector<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<T>, DetectorError> {
        self.probe.detected.lock().unwrap().push(frame.id());
        let active = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(started) = &self.started {
            let _ = started.send(frame.id());
        }
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.probe.active.fetch_sub(1, Ordering::SeqCst);

        match &self.behavior {
            Behavior::Succeed(outputs) => Ok(outputs.clone()),
            Behavior::FailRuntime => Err(DetectorError::Runtime {
                detector: self.name,
                source: "scripted failure".into(),
            }),
            Behavior::FailInit => Err(DetectorError::Init {
                detector: self.name,
                source: "model unavailable".into(),
            }),
            Behavior::Panic => panic!("{} blew up", self.name),
        }
    }

    async fn close(&self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}
