//! Edge-triggered watermark hysteresis.
//!
//! The latch remembers whether utilisation last crossed above the high
//! watermark. Only the upward edge produces a notification; the latch re-arms
//! once utilisation falls to the low watermark, so steady operation between
//! the two thresholds stays quiet.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Edge {
    Rising,
    Falling,
}

/// `100 * used / capacity`, or 0 for an empty ring.
#[inline]
pub fn utilization_pct(used: u64, capacity: u64) -> u32 {
    if capacity == 0 {
        return 0;
    }
    ((used as u128 * 100) / capacity as u128) as u32
}

pub(crate) struct WatermarkLatch {
    above_hi: AtomicBool,
}

impl WatermarkLatch {
    pub fn new() -> Self {
        Self {
            above_hi: AtomicBool::new(false),
        }
    }

    /// Updates the latch for the current fill level and reports a transition.
    ///
    /// The producer and the control surface may both evaluate; the
    /// compare-exchange lets exactly one of them own each edge.
    pub fn evaluate(&self, used: u64, capacity: u64, hi_pct: u32, lo_pct: u32) -> Option<Edge> {
        let pct = utilization_pct(used, capacity);
        let latched = self.above_hi.load(Ordering::Acquire);

        if !latched && pct >= hi_pct {
            self.above_hi
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| Edge::Rising)
        } else if latched && pct <= lo_pct {
            self.above_hi
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| Edge::Falling)
        } else {
            None
        }
    }

    pub fn is_set(&self) -> bool {
        self.above_hi.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.above_hi.store(false, Ordering::Release);
    }
}
