//! Shared memory layout of a record ring.
//!
//! The mapped region is one control page followed by the data ring:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                 ControlBlock (56 bytes used)                   │
//! │  head │ tail │ capacity │ hi │ lo │ flags │ rsvd │ start │ lost │
//! │   8B  │  8B  │    8B    │ 4B │ 4B │  4B   │  4B  │  8B   │  8B  │
//! ├────────────────────────────────────────────────────────────────┤
//! │                 zero padding to CONTROL_PAGE_SIZE              │
//! ├────────────────────────────────────────────────────────────────┤
//! │                 data ring, `capacity` bytes                    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutable field is an atomic with the same size and alignment as the
//! plain integer, so the layout on the wire is exactly the integer layout.
//! Only `head` and `tail` order data; everything else is `Relaxed`.

use crate::error::RingError;
use std::mem::{offset_of, size_of};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Size of the control page; the data ring starts at this offset.
pub const CONTROL_PAGE_SIZE: usize = 4096;

pub const DEFAULT_HI_PCT: u32 = 50;
pub const DEFAULT_LO_PCT: u32 = 30;

/// Set in `flags` while the producer is inside a drop episode.
pub const FLAG_DROPPING: u32 = 1 << 0;

#[repr(C)]
pub struct ControlBlock {
    /// One past the last byte published by the producer.
    pub head: AtomicU64,
    /// Next byte the consumer will read.
    pub tail: AtomicU64,
    /// Data ring size in bytes. Power of two, written once at creation.
    pub capacity: u64,
    pub hi_pct: AtomicU32,
    pub lo_pct: AtomicU32,
    pub flags: AtomicU32,
    pub reserved: u32,
    pub drop_episode_start_ns: AtomicU64,
    pub drop_episode_count: AtomicU64,
}

const _: () = assert!(size_of::<ControlBlock>() == 56);
const _: () = assert!(offset_of!(ControlBlock, hi_pct) == 24);
const _: () = assert!(offset_of!(ControlBlock, drop_episode_start_ns) == 40);
const _: () = assert!(size_of::<ControlBlock>() <= CONTROL_PAGE_SIZE);

impl ControlBlock {
    pub fn new(capacity: u64, hi_pct: u32, lo_pct: u32) -> Self {
        Self {
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            capacity,
            hi_pct: AtomicU32::new(hi_pct),
            lo_pct: AtomicU32::new(lo_pct),
            flags: AtomicU32::new(0),
            reserved: 0,
            drop_episode_start_ns: AtomicU64::new(0),
            drop_episode_count: AtomicU64::new(0),
        }
    }

    /// Checks a control block found in an existing mapping of `view_len` bytes.
    pub fn validate(&self, view_len: usize) -> Result<(), RingError> {
        if !self.capacity.is_power_of_two() {
            return Err(RingError::BadLayout("capacity must be power of two"));
        }
        let required = bytes_for_ring(self.capacity as usize);
        if view_len < required {
            return Err(RingError::ViewTooSmall {
                len: view_len,
                required,
            });
        }
        if self.lo_pct.load(Ordering::Relaxed) > self.hi_pct.load(Ordering::Relaxed) {
            return Err(RingError::BadLayout("low watermark above high watermark"));
        }
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        match head.checked_sub(tail) {
            Some(used) if used <= self.capacity => Ok(()),
            _ => Err(RingError::BadLayout("cursors out of range")),
        }
    }

    /// Bytes published but not yet consumed.
    #[inline]
    pub fn used(&self) -> u64 {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    #[inline]
    pub fn watermarks(&self) -> (u32, u32) {
        (
            self.hi_pct.load(Ordering::Relaxed),
            self.lo_pct.load(Ordering::Relaxed),
        )
    }

    #[inline]
    pub fn is_dropping(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & FLAG_DROPPING != 0
    }

    #[inline]
    pub fn set_dropping(&self, on: bool) {
        if on {
            self.flags.fetch_or(FLAG_DROPPING, Ordering::Relaxed);
        } else {
            self.flags.fetch_and(!FLAG_DROPPING, Ordering::Relaxed);
        }
    }
}

/// Total bytes of a region holding a ring of `capacity` data bytes.
pub fn bytes_for_ring(capacity: usize) -> usize {
    CONTROL_PAGE_SIZE + capacity
}
