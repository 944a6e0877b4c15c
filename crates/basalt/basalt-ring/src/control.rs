//! Administrative surface of a ring.
//!
//! Everything here is off the hot path and serialised by one coarse lock.
//! The producer never takes that lock. Invalid requests are refused before
//! anything is mutated.

use crate::channel::Shared;
use crate::error::RingError;
use crate::notify::Notifier;
use crate::ring::{check_rate, check_watermarks};
use crate::watermark::Edge;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info};

/// Point-in-time counters. Each field is individually consistent; the set as
/// a whole is not an atomic snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingStats {
    pub head: u64,
    pub tail: u64,
    /// Pushes lost to a full ring since creation or the last reset.
    pub drops: u64,
    /// Records written, drop summaries included.
    pub records: u64,
    /// Bytes written, headers included.
    pub bytes: u64,
    pub last_hi_cross_ns: u64,
    pub last_lo_cross_ns: u64,
}

impl RingStats {
    pub fn used(&self) -> u64 {
        self.head.wrapping_sub(self.tail)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub capacity: u64,
    pub ring_order: u32,
    pub rate_hz: u32,
}

/// Cloneable handle to the control surface of a ring.
#[derive(Clone)]
pub struct Control {
    shared: Arc<Shared>,
}

impl Control {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// # Errors
    /// [`RingError::InvalidRange`] unless `lo_pct <= hi_pct <= 100`.
    pub fn set_watermarks(&self, hi_pct: u32, lo_pct: u32) -> Result<(), RingError> {
        check_watermarks(hi_pct, lo_pct)?;
        let _admin = self.shared.admin.lock();
        let ctrl = self.shared.control();
        ctrl.hi_pct.store(hi_pct, Ordering::Relaxed);
        ctrl.lo_pct.store(lo_pct, Ordering::Relaxed);
        debug!(hi_pct, lo_pct, "watermarks updated");
        Ok(())
    }

    pub fn watermarks(&self) -> (u32, u32) {
        self.shared.control().watermarks()
    }

    /// Replaces the notification target, returning the previous one.
    /// `None` unbinds.
    ///
    /// A crossing signalled while the swap is in progress is delivered to the
    /// new target once it is installed.
    pub fn bind_notifier(&self, notifier: Option<Box<dyn Notifier>>) -> Option<Box<dyn Notifier>> {
        let _admin = self.shared.admin.lock();
        debug!(bound = notifier.is_some(), "notifier rebound");
        self.shared.notifier.replace(notifier)
    }

    pub fn stats(&self) -> RingStats {
        let ctrl = self.shared.control();
        RingStats {
            head: ctrl.head.load(Ordering::Acquire),
            tail: ctrl.tail.load(Ordering::Acquire),
            drops: self.shared.drops.load(Ordering::Relaxed),
            records: self.shared.records.load(Ordering::Relaxed),
            bytes: self.shared.bytes.load(Ordering::Relaxed),
            last_hi_cross_ns: self.shared.last_hi_cross_ns.load(Ordering::Relaxed),
            last_lo_cross_ns: self.shared.last_lo_cross_ns.load(Ordering::Relaxed),
        }
    }

    /// Moves `tail` on behalf of a consumer that cannot write it directly.
    ///
    /// The move is a compare-exchange against the tail it was checked
    /// against, so it cannot rewind a tail the consumer advanced meanwhile.
    ///
    /// # Errors
    /// [`RingError::OutOfRange`] if `new_tail` is behind the current tail or
    /// past head; the tail is left untouched.
    pub fn advance_tail(&self, new_tail: u64) -> Result<(), RingError> {
        let edge = {
            let _admin = self.shared.admin.lock();
            let ctrl = self.shared.control();
            let mut tail = ctrl.tail.load(Ordering::Acquire);
            loop {
                let head = ctrl.head.load(Ordering::Acquire);
                if new_tail > head || new_tail < tail {
                    return Err(RingError::OutOfRange {
                        requested: new_tail,
                        tail,
                        head,
                    });
                }
                match ctrl.tail.compare_exchange_weak(
                    tail,
                    new_tail,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(current) => tail = current,
                }
            }
            self.shared.watermark_edge()
        };
        if edge == Some(Edge::Rising) {
            self.shared.notify_consumer();
        }
        Ok(())
    }

    /// Zeroes cursors and counters and leaves any drop episode.
    ///
    /// Only meaningful while neither side has a record in flight.
    pub fn reset(&self) {
        let _admin = self.shared.admin.lock();
        let ctrl = self.shared.control();
        ctrl.head.store(0, Ordering::Release);
        ctrl.tail.store(0, Ordering::Release);
        ctrl.flags.store(0, Ordering::Relaxed);
        ctrl.drop_episode_start_ns.store(0, Ordering::Relaxed);
        ctrl.drop_episode_count.store(0, Ordering::Relaxed);

        let s = &self.shared;
        for counter in [
            &s.drops,
            &s.records,
            &s.bytes,
            &s.last_hi_cross_ns,
            &s.last_lo_cross_ns,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        s.latch.reset();
        info!("ring reset");
    }

    pub fn config(&self) -> ChannelConfig {
        let capacity = self.shared.capacity();
        ChannelConfig {
            capacity,
            ring_order: capacity.trailing_zeros(),
            rate_hz: self.rate_hz(),
        }
    }

    /// Sets the synthetic producer rate; picked up on its next cycle.
    ///
    /// # Errors
    /// [`RingError::InvalidRange`] unless `1 <= hz <= 100_000`.
    pub fn set_rate(&self, hz: u32) -> Result<(), RingError> {
        check_rate(hz)?;
        let _admin = self.shared.admin.lock();
        self.shared.rate_hz.store(hz, Ordering::Relaxed);
        debug!(hz, "producer rate updated");
        Ok(())
    }

    pub fn rate_hz(&self) -> u32 {
        self.shared.rate_hz.load(Ordering::Relaxed)
    }

    pub fn used(&self) -> u64 {
        self.shared.control().used()
    }

    pub fn capacity(&self) -> u64 {
        self.shared.capacity()
    }

    pub fn is_dropping(&self) -> bool {
        self.shared.control().is_dropping()
    }

    /// Level-triggered readiness: fill is at or above the high watermark.
    pub fn is_ready(&self) -> bool {
        self.shared.above_high_watermark()
    }

    /// Blocks until the ring is ready or an upward watermark crossing is
    /// signalled, or until `timeout` passes. `None` waits indefinitely.
    ///
    /// A `true` return is advisory; re-check head against tail.
    pub fn wait_ready(&self, timeout: Option<Duration>) -> bool {
        self.shared
            .readiness
            .wait(timeout, || self.shared.above_high_watermark())
    }
}
