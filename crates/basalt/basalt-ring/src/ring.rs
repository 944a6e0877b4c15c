//! Ring configuration and the wraparound byte ring.
//!
//! Positions handed to [`ByteRing`] are logical: unbounded 64-bit offsets
//! into the byte stream. The physical offset is `position & mask`, which only
//! works because the capacity is a power of two. No code outside this module
//! masks positions.

use crate::error::RingError;
use crate::record::{DROP_RECORD_SIZE, RECORD_HEADER_SIZE};
use crate::shm_layout::{DEFAULT_HI_PCT, DEFAULT_LO_PCT};
use std::ptr;

/// Smallest accepted data ring, in bytes.
pub const MIN_CAPACITY: usize = 64;

/// Synthetic producer rate used when none is configured.
pub const DEFAULT_RATE_HZ: u32 = 2000;

/// Configuration for a record ring.
///
/// The capacity must always be a power of 2, enabling efficient offset
/// calculations via bitmasking instead of modulo.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingConfig {
    /// Data ring size in bytes. Power of 2.
    pub capacity: usize,
    pub hi_pct: u32,
    pub lo_pct: u32,
    pub rate_hz: u32,
}

impl RingConfig {
    /// Creates a configuration with default watermarks (50% / 30%).
    ///
    /// # Errors
    /// Rejects capacities that are not a power of two or are smaller than
    /// [`MIN_CAPACITY`].
    ///
    /// # Example
    /// ```
    /// use basalt_ring::RingConfig;
    /// assert!(RingConfig::new(1 << 20).is_ok());
    /// assert!(RingConfig::new(3 << 10).is_err());
    /// ```
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        if !capacity.is_power_of_two() {
            return Err(RingError::CapacityNotPowerOfTwo(capacity));
        }
        if capacity < MIN_CAPACITY {
            return Err(RingError::CapacityTooSmall {
                capacity,
                min: MIN_CAPACITY,
            });
        }
        Ok(Self {
            capacity,
            hi_pct: DEFAULT_HI_PCT,
            lo_pct: DEFAULT_LO_PCT,
            rate_hz: DEFAULT_RATE_HZ,
        })
    }

    /// Creates a configuration for a ring of `1 << order` bytes.
    pub fn from_order(order: u32) -> Result<Self, RingError> {
        let capacity = 1usize.checked_shl(order).ok_or(RingError::InvalidRange {
            what: "ring order",
            detail: format!("{order} does not fit in usize"),
        })?;
        Self::new(capacity)
    }

    /// Re-checks every field; the fields are public and may have been set
    /// directly.
    pub fn validate(&self) -> Result<(), RingError> {
        Self::new(self.capacity)?;
        check_watermarks(self.hi_pct, self.lo_pct)?;
        check_rate(self.rate_hz)
    }

    pub fn with_watermarks(mut self, hi_pct: u32, lo_pct: u32) -> Result<Self, RingError> {
        check_watermarks(hi_pct, lo_pct)?;
        self.hi_pct = hi_pct;
        self.lo_pct = lo_pct;
        Ok(self)
    }

    pub fn with_rate(mut self, rate_hz: u32) -> Result<Self, RingError> {
        check_rate(rate_hz)?;
        self.rate_hz = rate_hz;
        Ok(self)
    }

    /// Returns the bitmask `capacity - 1`.
    ///
    /// ```
    /// use basalt_ring::RingConfig;
    /// let cfg = RingConfig::new(64).unwrap();
    /// assert_eq!(cfg.mask(), 63);
    /// ```
    #[inline(always)]
    pub fn mask(&self) -> u64 {
        (self.capacity as u64) - 1
    }

    /// log2 of the capacity.
    pub fn order(&self) -> u32 {
        self.capacity.trailing_zeros()
    }

    /// Largest payload a push can ever carry.
    ///
    /// Room is kept for a drop-summary record next to the payload, so a drop
    /// episode can always be flushed once the consumer drains the ring.
    pub fn max_payload(&self) -> usize {
        max_payload(self.capacity as u64) as usize
    }
}

pub(crate) fn max_payload(capacity: u64) -> u64 {
    capacity
        .saturating_sub((RECORD_HEADER_SIZE + DROP_RECORD_SIZE) as u64)
        .min(u32::MAX as u64)
}

pub(crate) fn check_watermarks(hi_pct: u32, lo_pct: u32) -> Result<(), RingError> {
    if hi_pct > 100 || lo_pct > 100 || lo_pct > hi_pct {
        return Err(RingError::InvalidRange {
            what: "watermarks",
            detail: format!("hi={hi_pct} lo={lo_pct}, need lo <= hi <= 100"),
        });
    }
    Ok(())
}

pub(crate) fn check_rate(rate_hz: u32) -> Result<(), RingError> {
    if rate_hz == 0 || rate_hz > 100_000 {
        return Err(RingError::InvalidRange {
            what: "rate",
            detail: format!("{rate_hz} Hz, need 1..=100000"),
        });
    }
    Ok(())
}

/// The circular data region of a ring.
///
/// A thin, copyable view: it does not own the memory it points at.
#[derive(Clone, Copy)]
pub(crate) struct ByteRing {
    data: *mut u8,
    capacity: u64,
    mask: u64,
}

// SAFETY: ByteRing is a pointer plus two integers; the region it points at is
// kept alive by whoever built it and every access goes through raw copies.
unsafe impl Send for ByteRing {}
unsafe impl Sync for ByteRing {}

impl ByteRing {
    /// # Safety
    /// `data` must be valid for reads and writes of `capacity` bytes for as
    /// long as the ring is used, and `capacity` must be a power of two.
    pub unsafe fn from_raw(data: *mut u8, capacity: u64) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            data,
            capacity,
            mask: capacity - 1,
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline(always)]
    fn offset(&self, position: u64) -> usize {
        (position & self.mask) as usize
    }

    /// Copies `bytes` into the ring starting at logical `position`, wrapping to
    /// offset 0 when the copy runs past the end of the buffer.
    ///
    /// # Safety
    /// The caller must own `[position, position + bytes.len())`: no other
    /// party may read or write that range concurrently.
    #[inline]
    pub unsafe fn write(&self, position: u64, bytes: &[u8]) {
        assert!(bytes.len() as u64 <= self.capacity, "write longer than ring");
        let off = self.offset(position);
        let first = bytes.len().min(self.capacity as usize - off);
        // SAFETY: off + first <= capacity and the rest lands at offset 0; the
        // caller guarantees exclusive access to the range.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.data.add(off), first);
            if bytes.len() > first {
                ptr::copy_nonoverlapping(bytes.as_ptr().add(first), self.data, bytes.len() - first);
            }
        }
    }

    /// Mirror of [`ByteRing::write`]: fills `out` from logical `position`.
    ///
    /// # Safety
    /// The range must have been published to the caller and must not be
    /// rewritten while it is being read.
    #[inline]
    pub unsafe fn read(&self, position: u64, out: &mut [u8]) {
        assert!(out.len() as u64 <= self.capacity, "read longer than ring");
        let off = self.offset(position);
        let first = out.len().min(self.capacity as usize - off);
        // SAFETY: see `write`.
        unsafe {
            ptr::copy_nonoverlapping(self.data.add(off), out.as_mut_ptr(), first);
            if out.len() > first {
                ptr::copy_nonoverlapping(self.data, out.as_mut_ptr().add(first), out.len() - first);
            }
        }
    }
}
