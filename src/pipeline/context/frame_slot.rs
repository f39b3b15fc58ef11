use crate::common::Frame;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// A frame waiting in the slot together with the instant it was offered.
#[derive(Debug, Clone)]
pub struct SlotEntry {
    pub frame: Arc<Frame>,
    pub offered_at: Instant,
}

#[derive(Debug, Default)]
struct SlotState {
    pending: Option<SlotEntry>,
    in_flight: bool,
}

/// Single-slot, drop-oldest buffer between capture and detection.
///
/// Holds at most one pending frame. Offering a frame while one is pending replaces it,
/// so memory stays bounded to one buffer and detection always sees the newest image.
#[derive(Debug, Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `frame` as pending. Returns the superseded frame, if any.
    pub fn offer(&self, frame: Arc<Frame>) -> Option<Arc<Frame>> {
        let entry = SlotEntry {
            frame,
            offered_at: Instant::now(),
        };
        self.lock().pending.replace(entry).map(|old| old.frame)
    }

    /// Hands out the pending frame only when no cycle is in flight, marking one in flight.
    pub fn take_if_idle(&self) -> Option<SlotEntry> {
        let mut state = self.lock();
        if state.in_flight {
            return None;
        }
        let entry = state.pending.take()?;
        state.in_flight = true;
        Some(entry)
    }

    pub fn mark_idle(&self) {
        self.lock().in_flight = false;
    }

    /// Drops the pending frame without touching the in-flight flag.
    pub fn discard_pending(&self) -> Option<Arc<Frame>> {
        self.lock().pending.take().map(|entry| entry.frame)
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }
}
