pub mod frame_slot;
pub mod metrics;

pub use frame_slot::{FrameSlot, SlotEntry};
pub use metrics::{LatencySnapshot, LatencyStats, LatencyTracker, LatencyWindow};
