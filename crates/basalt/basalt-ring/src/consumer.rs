//! The read side of the ring.
//!
//! The consumer owns `tail`. Each step acquire-loads `head`, peeks the header
//! at `tail` (possibly split across the wrap), checks that the whole record
//! lies below `head`, copies it into a scratch buffer and publishes the
//! advanced tail with a compare-exchange. A header that claims more bytes than were published means
//! the two sides have lost sync; the consumer stops there instead of reading
//! whatever lies past `head`.

use crate::channel::{Region, Shared};
use crate::error::RingError;
use crate::record::{DropSummary, RECORD_HEADER_SIZE, Record, RecordHeader, RecordType};
use crate::ring::ByteRing;
use crate::watermark::utilization_pct;
use basalt_mmap::MmapFileMut;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

pub struct Consumer {
    region: Arc<Region>,
    ring: ByteRing,
    /// Present when the producer lives in this process; lets the consumer
    /// evaluate the falling watermark edge right after it frees space.
    producer_side: Option<Arc<Shared>>,
    scratch: Vec<u8>,
    packets: u64,
    lost: u64,
}

impl Consumer {
    pub(crate) fn attached(shared: Arc<Shared>) -> Self {
        let region = shared.region.clone();
        Self::with_region(region, Some(shared))
    }

    fn with_region(region: Arc<Region>, producer_side: Option<Arc<Shared>>) -> Self {
        let ring = region.ring();
        Self {
            region,
            ring,
            producer_side,
            scratch: Vec::new(),
            packets: 0,
            lost: 0,
        }
    }

    /// Attaches to a ring file created by [`crate::RingChannel::create`],
    /// mapping the whole file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RingError> {
        let mm = MmapFileMut::open_rw(path.as_ref())?;
        Self::from_view(mm, path.as_ref())
    }

    /// Attaches with an explicit view length.
    ///
    /// # Errors
    /// - [`RingError::ViewTooLarge`] if `len` exceeds the file.
    /// - [`RingError::ViewTooSmall`] if `len` cannot hold the control page and
    ///   the data ring the control block describes.
    pub fn open_with_len<P: AsRef<Path>>(path: P, len: usize) -> Result<Self, RingError> {
        let mm = MmapFileMut::open_rw_view(path.as_ref(), len)?;
        Self::from_view(mm, path.as_ref())
    }

    fn from_view(mm: MmapFileMut, path: &Path) -> Result<Self, RingError> {
        let region = Region::attach(mm)?;
        debug!(path = %path.display(), capacity = region.capacity(), "attached to ring");
        Ok(Self::with_region(Arc::new(region), None))
    }

    /// Reads the next record and releases its bytes back to the producer.
    ///
    /// Returns `Ok(None)` when the ring is empty. The returned record borrows
    /// the consumer's scratch buffer; the ring slot itself is already free.
    ///
    /// `Control::advance_tail` may move the tail underneath a read. The new
    /// tail is published with a compare-exchange, so when that happens the
    /// copy is discarded and the read starts over from the moved tail.
    pub fn try_read(&mut self) -> Result<Option<Record<'_>>, RingError> {
        let ctrl = self.region.control();
        let (header, summary) = loop {
            let head = ctrl.head.load(Ordering::Acquire);
            let tail = ctrl.tail.load(Ordering::Acquire);
            if tail == head {
                return Ok(None);
            }

            let copied = copy_record(&self.ring, &mut self.scratch, tail, head);
            let (header, record_len, summary) = match copied {
                Ok(copied) => copied,
                // A tail moved mid-read can leave us decoding recycled bytes.
                Err(_) if ctrl.tail.load(Ordering::Acquire) != tail => continue,
                Err(e) => return Err(e),
            };

            // The record is copied out, so the slot can go back to the producer.
            // `copy_record` bounded record_len by head - tail, so this cannot wrap.
            let next = tail + record_len;
            if ctrl
                .tail
                .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!(tail, "tail moved during read, retrying");
                continue;
            }
            break (header, summary);
        };

        if let Some(shared) = &self.producer_side {
            shared.evaluate_watermarks();
        }

        let record = match summary {
            None => {
                self.packets += 1;
                Record::Packet {
                    header,
                    payload: &self.scratch[RECORD_HEADER_SIZE..],
                }
            }
            Some(summary) => {
                self.lost += summary.lost as u64;
                Record::Drop { header, summary }
            }
        };
        Ok(Some(record))
    }

    /// Drains every published record through `handle`.
    ///
    /// Never blocks: returns once `tail == head`, with the number of records
    /// handled. On corruption the records before the bad one stay consumed.
    pub fn poll<F: FnMut(Record<'_>)>(&mut self, mut handle: F) -> Result<usize, RingError> {
        let mut count = 0usize;
        while let Some(record) = self.try_read()? {
            handle(record);
            count += 1;
        }
        Ok(count)
    }

    pub fn head(&self) -> u64 {
        self.region.control().head.load(Ordering::Acquire)
    }

    pub fn tail(&self) -> u64 {
        self.region.control().tail.load(Ordering::Acquire)
    }

    pub fn used(&self) -> u64 {
        self.region.control().used()
    }

    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    /// Level-triggered readiness read from the shared control block: fill is
    /// at or above the high watermark. Works from any process attached to the
    /// ring.
    pub fn is_ready(&self) -> bool {
        let ctrl = self.region.control();
        let (hi, _) = ctrl.watermarks();
        utilization_pct(ctrl.used(), self.capacity()) >= hi
    }

    pub fn capacity(&self) -> u64 {
        self.region.capacity()
    }

    /// Packet records read so far.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Sum of `lost` over every drop-summary record read so far.
    pub fn lost(&self) -> u64 {
        self.lost
    }
}

/// Validates the record at `tail` against `head` and copies it into
/// scratch. Returns its header, span and decoded drop summary.
fn copy_record(
    ring: &ByteRing,
    scratch: &mut Vec<u8>,
    tail: u64,
    head: u64,
) -> Result<(RecordHeader, u64, Option<DropSummary>), RingError> {
    // Tail past head is never legal; a foreign writer may have put it there.
    let available = match head.checked_sub(tail) {
        Some(n) if n <= ring.capacity() && n >= RECORD_HEADER_SIZE as u64 => n,
        _ => return Err(corrupted(tail, head, head.wrapping_sub(tail))),
    };

    let mut raw = [0u8; RECORD_HEADER_SIZE];
    // SAFETY: [tail, head) was published by the producer's release store
    // of head, and it will not be rewritten until tail moves past it.
    unsafe { ring.read(tail, &mut raw) };
    let header = RecordHeader::decode(&raw);
    let record_len = header.span();
    if record_len > available {
        return Err(corrupted(tail, head, record_len));
    }
    let Some(kind) = header.record_type() else {
        return Err(corrupted(tail, head, record_len));
    };

    scratch.resize(record_len as usize, 0);
    // SAFETY: as above; record_len <= available.
    unsafe { ring.read(tail, scratch) };

    let summary = match kind {
        RecordType::Packet => None,
        RecordType::Drop => match DropSummary::decode(&scratch[RECORD_HEADER_SIZE..]) {
            Some(s) => Some(s),
            None => return Err(corrupted(tail, head, record_len)),
        },
    };
    Ok((header, record_len, summary))
}

fn corrupted(tail: u64, head: u64, record_len: u64) -> RingError {
    warn!(tail, head, record_len, "ring desynchronised, consumer stopped");
    RingError::Corrupted {
        tail,
        head,
        record_len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RingChannel;
    use crate::ring::RingConfig;

    /// Writes raw header bytes at head and publishes them, bypassing the
    /// producer's framing.
    fn publish_raw(shared: &Shared, bytes: &[u8]) {
        let ctrl = shared.control();
        let head = ctrl.head.load(Ordering::Relaxed);
        unsafe { shared.region.ring().write(head, bytes) };
        ctrl.head.store(head + bytes.len() as u64, Ordering::Release);
    }

    fn channel() -> (crate::Producer, Consumer, Arc<Shared>) {
        let (p, c, _ctl) = RingChannel::anonymous(RingConfig::new(256).unwrap())
            .unwrap()
            .into_parts();
        let shared = c.producer_side.clone().unwrap();
        (p, c, shared)
    }

    #[test]
    fn empty_ring_reads_none() {
        let (_p, mut c, _s) = channel();
        assert!(c.try_read().unwrap().is_none());
        assert_eq!(c.poll(|_| {}).unwrap(), 0);
    }

    #[test]
    fn length_past_head_is_corruption() {
        let (_p, mut c, shared) = channel();
        // Claims 100 payload bytes but only the header is published.
        publish_raw(&shared, &RecordHeader::packet(100, 1).encode());

        match c.try_read() {
            Err(RingError::Corrupted {
                tail,
                head,
                record_len,
            }) => {
                assert_eq!((tail, head, record_len), (0, 16, 116));
            }
            other => panic!("expected corruption, got {other:?}"),
        }
        assert_eq!(c.tail(), 0, "tail must not advance past a bad record");
    }

    #[test]
    fn unknown_record_type_is_corruption() {
        let (_p, mut c, shared) = channel();
        let mut h = RecordHeader::packet(0, 1);
        h.kind = 0x1234;
        publish_raw(&shared, &h.encode());
        assert!(matches!(c.try_read(), Err(RingError::Corrupted { .. })));
        assert_eq!(c.tail(), 0);
    }

    #[test]
    fn partial_header_is_corruption() {
        let (_p, mut c, shared) = channel();
        publish_raw(&shared, &[1, 0, 0]);
        assert!(matches!(c.try_read(), Err(RingError::Corrupted { .. })));
    }

    #[test]
    fn records_before_bad_one_are_consumed() {
        let (mut p, mut c, shared) = channel();
        p.push(b"good");
        publish_raw(&shared, &RecordHeader::packet(200, 1).encode());

        let mut seen = Vec::new();
        let err = c
            .poll(|r| {
                if let Record::Packet { payload, .. } = r {
                    seen.push(payload.to_vec());
                }
            })
            .unwrap_err();
        assert!(matches!(err, RingError::Corrupted { .. }));
        assert_eq!(seen, vec![b"good".to_vec()]);
        assert_eq!(c.tail(), 20);
    }

    /// Places both cursors at arbitrary logical positions, as a foreign
    /// writer of the shared page could.
    fn set_cursors(shared: &Shared, tail: u64, head: u64) {
        let ctrl = shared.control();
        ctrl.tail.store(tail, Ordering::Release);
        ctrl.head.store(head, Ordering::Release);
    }

    #[test]
    fn tail_past_head_is_corruption_not_overflow() {
        let (_p, mut c, shared) = channel();
        let tail = u64::MAX - 3;
        // head = tail + 17, wrapped past zero.
        let head = tail.wrapping_add(17);
        set_cursors(&shared, tail, head);
        unsafe { shared.region.ring().write(tail, &RecordHeader::packet(1, 1).encode()) };

        match c.try_read() {
            Err(RingError::Corrupted { tail: t, head: h, .. }) => assert_eq!((t, h), (tail, head)),
            other => panic!("expected corruption, got {other:?}"),
        }
        assert_eq!(c.tail(), tail);
    }

    #[test]
    fn reads_at_high_logical_positions() {
        let (_p, mut c, shared) = channel();
        let tail = u64::MAX - 40;
        let mut bytes = RecordHeader::packet(4, 9).encode().to_vec();
        bytes.extend_from_slice(b"wrap");
        set_cursors(&shared, tail, tail + bytes.len() as u64);
        unsafe { shared.region.ring().write(tail, &bytes) };

        match c.try_read().unwrap() {
            Some(Record::Packet { payload, .. }) => assert_eq!(payload, b"wrap"),
            other => panic!("expected packet, got {other:?}"),
        }
        assert_eq!(c.tail(), tail + 20);
        assert!(c.try_read().unwrap().is_none());
    }

    #[test]
    fn readiness_follows_shared_fill_level() {
        let (mut p, mut c, _shared) = channel();
        assert_eq!(c.region.control().watermarks().0, 50);
        assert!(!c.is_ready());
        p.push(&[0u8; 112]);
        assert!(c.is_ready());
        c.poll(|_| {}).unwrap();
        assert!(!c.is_ready());
    }
}
