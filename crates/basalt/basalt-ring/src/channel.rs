//! The channel context: one mapped region plus the producer-side state that
//! every handle shares.

use crate::clock::now_ns;
use crate::consumer::Consumer;
use crate::control::Control;
use crate::error::RingError;
use crate::notify::{NotifierSlot, ReadinessGate};
use crate::producer::Producer;
use crate::ring::{ByteRing, RingConfig};
use crate::shm_layout::{CONTROL_PAGE_SIZE, ControlBlock, bytes_for_ring};
use crate::watermark::{Edge, WatermarkLatch, utilization_pct};
use basalt_mmap::MmapFileMut;
use parking_lot::Mutex;
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::debug;

/// A mapped control page plus data ring.
pub(crate) struct Region {
    /// Owns the mmap lifetime; accessed only through `base`.
    _mm: MmapFileMut,
    base: *mut u8,
    capacity: u64,
}

// SAFETY: the region is shared memory by construction. The control block is
// made of atomics and the data ring is only touched through `ByteRing`, whose
// callers follow the head/tail ownership protocol.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Writes a fresh control block into a newly created mapping.
    fn init(mut mm: MmapFileMut, cfg: &RingConfig) -> Self {
        debug_assert!(mm.len() >= bytes_for_ring(cfg.capacity));
        let base = mm.as_mut_ptr();
        // SAFETY: we created this mapping and hold its only handle; it is
        // page aligned and at least CONTROL_PAGE_SIZE bytes long.
        unsafe {
            ptr::write(
                base as *mut ControlBlock,
                ControlBlock::new(cfg.capacity as u64, cfg.hi_pct, cfg.lo_pct),
            );
        }
        Self {
            _mm: mm,
            base,
            capacity: cfg.capacity as u64,
        }
    }

    /// Attaches to a region another party initialised.
    pub(crate) fn attach(mut mm: MmapFileMut) -> Result<Self, RingError> {
        let len = mm.len();
        if len < CONTROL_PAGE_SIZE {
            return Err(RingError::ViewTooSmall {
                len,
                required: CONTROL_PAGE_SIZE,
            });
        }
        let base = mm.as_mut_ptr();
        // SAFETY: the mapping holds at least a control page.
        let cb = unsafe { &*(base as *const ControlBlock) };
        cb.validate(len)?;
        let capacity = cb.capacity;
        Ok(Self {
            _mm: mm,
            base,
            capacity,
        })
    }

    #[inline(always)]
    pub(crate) fn control(&self) -> &ControlBlock {
        // SAFETY: base points at an initialised ControlBlock for our lifetime.
        unsafe { &*(self.base as *const ControlBlock) }
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }

    pub(crate) fn ring(&self) -> ByteRing {
        // SAFETY: the data ring follows the control page and `capacity` was
        // validated against the mapping length.
        unsafe { ByteRing::from_raw(self.base.add(CONTROL_PAGE_SIZE), self.capacity) }
    }
}

/// Producer-side state shared by the producer, the control surface and an
/// in-process consumer.
pub(crate) struct Shared {
    pub region: Arc<Region>,
    pub records: AtomicU64,
    pub bytes: AtomicU64,
    pub drops: AtomicU64,
    pub last_hi_cross_ns: AtomicU64,
    pub last_lo_cross_ns: AtomicU64,
    pub rate_hz: AtomicU32,
    pub latch: WatermarkLatch,
    pub readiness: ReadinessGate,
    pub notifier: NotifierSlot,
    /// Serialises the control surface. Never taken on the push path.
    pub admin: Mutex<()>,
}

impl Shared {
    fn new(region: Arc<Region>, cfg: &RingConfig) -> Self {
        Self {
            region,
            records: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            drops: AtomicU64::new(0),
            last_hi_cross_ns: AtomicU64::new(0),
            last_lo_cross_ns: AtomicU64::new(0),
            rate_hz: AtomicU32::new(cfg.rate_hz),
            latch: WatermarkLatch::new(),
            readiness: ReadinessGate::new(),
            notifier: NotifierSlot::new(),
            admin: Mutex::new(()),
        }
    }

    #[inline(always)]
    pub fn control(&self) -> &ControlBlock {
        self.region.control()
    }

    #[inline(always)]
    pub fn capacity(&self) -> u64 {
        self.region.capacity()
    }

    /// Level condition behind readiness: fill at or above the high watermark.
    pub fn above_high_watermark(&self) -> bool {
        let ctrl = self.control();
        let (hi, _) = ctrl.watermarks();
        utilization_pct(ctrl.used(), self.capacity()) >= hi
    }

    /// Runs the hysteresis latch against the current fill level.
    ///
    /// Does not take the admin lock, so it is safe to call while holding it.
    pub fn watermark_edge(&self) -> Option<Edge> {
        let ctrl = self.control();
        let (hi, lo) = ctrl.watermarks();
        let used = ctrl.used();
        let edge = self.latch.evaluate(used, self.capacity(), hi, lo);
        match edge {
            Some(Edge::Rising) => {
                self.last_hi_cross_ns.store(now_ns(), Ordering::Relaxed);
                debug!(used, hi, "ring crossed high watermark");
            }
            Some(Edge::Falling) => {
                self.last_lo_cross_ns.store(now_ns(), Ordering::Relaxed);
                debug!(used, lo, "ring drained to low watermark");
            }
            None => {}
        }
        edge
    }

    /// Wakes in-process waiters and signals the bound notifier. Never
    /// blocks on the admin lock.
    pub fn notify_consumer(&self) {
        self.readiness.wake();
        self.notifier.signal();
    }

    pub fn evaluate_watermarks(&self) {
        if self.watermark_edge() == Some(Edge::Rising) {
            self.notify_consumer();
        }
    }
}

/// A freshly created record ring and its three handles.
///
/// ```
/// use basalt_ring::{Record, RingChannel, RingConfig};
///
/// let (mut producer, mut consumer, _control) =
///     RingChannel::anonymous(RingConfig::new(4096).unwrap()).unwrap().into_parts();
/// producer.push(b"hello");
/// let mut seen = Vec::new();
/// consumer
///     .poll(|r| {
///         if let Record::Packet { payload, .. } = r {
///             seen.extend_from_slice(payload);
///         }
///     })
///     .unwrap();
/// assert_eq!(seen, b"hello");
/// ```
pub struct RingChannel {
    producer: Producer,
    consumer: Consumer,
    control: Control,
}

impl RingChannel {
    /// Creates (or truncates) the file at `path` and lays a ring out in it.
    ///
    /// Another process attaches with [`Consumer::open`].
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the file cannot be
    /// created, sized or mapped. Nothing stays mapped on failure.
    pub fn create<P: AsRef<Path>>(path: P, cfg: RingConfig) -> Result<Self, RingError> {
        cfg.validate()?;
        let path = path.as_ref();
        let mm = MmapFileMut::create_rw(path, bytes_for_ring(cfg.capacity) as u64)?;
        debug!(path = %path.display(), capacity = cfg.capacity, "created ring");
        Ok(Self::from_mapping(mm, &cfg))
    }

    /// Creates a ring in anonymous memory, usable by threads of this process.
    pub fn anonymous(cfg: RingConfig) -> Result<Self, RingError> {
        cfg.validate()?;
        let mm = MmapFileMut::anonymous(bytes_for_ring(cfg.capacity))?;
        debug!(capacity = cfg.capacity, "created anonymous ring");
        Ok(Self::from_mapping(mm, &cfg))
    }

    fn from_mapping(mm: MmapFileMut, cfg: &RingConfig) -> Self {
        let region = Arc::new(Region::init(mm, cfg));
        let shared = Arc::new(Shared::new(region, cfg));
        Self {
            producer: Producer::new(shared.clone()),
            consumer: Consumer::attached(shared.clone()),
            control: Control::new(shared),
        }
    }

    pub fn producer(&mut self) -> &mut Producer {
        &mut self.producer
    }

    pub fn consumer(&mut self) -> &mut Consumer {
        &mut self.consumer
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn into_parts(self) -> (Producer, Consumer, Control) {
        (self.producer, self.consumer, self.control)
    }
}
