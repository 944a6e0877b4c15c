//! The producer engine.
//!
//! # Drop state machine
//!
//! ```text
//!            reserve fails                  reserve(drop + payload) ok
//!  Normal ───────────────────▶ Dropping ──────────────────────────────▶ Normal
//!                               │    ▲      (drop summary written first)
//!                               └────┘
//!                            reserve fails: count += 1
//! ```
//!
//! A full ring never blocks or errors. The push is counted and dropped; once
//! room frees up, the next successful push first writes one drop-summary
//! record covering the whole episode, then the payload. Both are reserved in
//! one step so the summary can never be separated from the stream it
//! precedes.
//!
//! # Thread Safety
//! `Producer` is `Send` but not `Clone`: there is exactly one per ring.

use crate::channel::Shared;
use crate::clock::now_ns;
use crate::control::Control;
use crate::record::{DROP_RECORD_SIZE, DropSummary, RECORD_HEADER_SIZE, RecordHeader};
use crate::ring::{ByteRing, max_payload};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

/// What happened to a pushed payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The record is published and visible to the consumer.
    Written,
    /// The ring was full; the push is counted in the current drop episode.
    Dropped,
    /// The payload can never fit this ring. Not counted as a drop.
    TooLarge,
}

pub struct Producer {
    shared: Arc<Shared>,
    ring: ByteRing,
    capacity: u64,
    max_payload: u64,
}

impl Producer {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let ring = shared.region.ring();
        let capacity = shared.capacity();
        Self {
            shared,
            ring,
            capacity,
            max_payload: max_payload(capacity),
        }
    }

    /// Returns the head as the write position if `need` bytes are free.
    ///
    /// Head and tail are read once each; `tail` with acquire ordering so that
    /// the consumer has finished with every byte below it.
    #[inline]
    pub fn reserve(&self, need: u64) -> Option<u64> {
        let ctrl = self.shared.control();
        let head = ctrl.head.load(Ordering::Acquire);
        let tail = ctrl.tail.load(Ordering::Acquire);
        let used = head.wrapping_sub(tail);
        // A tail beyond head (or a lap behind) means the consumer broke the
        // protocol; treat it as no room rather than overwrite unread data.
        let free = self.capacity.checked_sub(used)?;
        (free >= need).then_some(head)
    }

    /// Frames `payload` as a packet record and publishes it.
    pub fn push(&mut self, payload: &[u8]) -> PushOutcome {
        let len = payload.len() as u64;
        if len > self.max_payload {
            return PushOutcome::TooLarge;
        }
        let need = RECORD_HEADER_SIZE as u64 + len;

        let dropping = self.shared.control().is_dropping();
        let total = if dropping {
            need + DROP_RECORD_SIZE as u64
        } else {
            need
        };

        let Some(mut pos) = self.reserve(total) else {
            self.on_full(need);
            return PushOutcome::Dropped;
        };

        let now = now_ns();
        if dropping {
            pos = self.flush_drop_summary(pos, now);
        }

        // `len <= max_payload < u32::MAX`, checked above.
        let header = RecordHeader::packet(len as u32, now);
        self.write_record(pos, &header, payload);

        self.shared.evaluate_watermarks();
        PushOutcome::Written
    }

    fn on_full(&self, need: u64) {
        let ctrl = self.shared.control();
        if !ctrl.is_dropping() {
            ctrl.drop_episode_start_ns.store(now_ns(), Ordering::Relaxed);
            ctrl.drop_episode_count.store(0, Ordering::Relaxed);
            ctrl.set_dropping(true);
            warn!(need, used = ctrl.used(), "ring full, dropping");
        }
        ctrl.drop_episode_count.fetch_add(1, Ordering::Relaxed);
        self.shared.drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Writes the drop-summary record at `pos` and leaves the Dropping state.
    /// Returns the position after it.
    fn flush_drop_summary(&self, pos: u64, now: u64) -> u64 {
        let ctrl = self.shared.control();
        let lost = ctrl.drop_episode_count.load(Ordering::Relaxed);
        let start = ctrl.drop_episode_start_ns.load(Ordering::Relaxed);
        let summary = DropSummary {
            lost: u32::try_from(lost).unwrap_or(u32::MAX),
            episode_start_ns: start,
            episode_end_ns: now,
        };

        let next = self.write_record(pos, &RecordHeader::drop_summary(now), &summary.encode());
        ctrl.set_dropping(false);
        info!(lost, duration_ns = now.saturating_sub(start), "drop episode ended");
        next
    }

    /// Copies header and payload into the ring and publishes the new head.
    fn write_record(&self, pos: u64, header: &RecordHeader, payload: &[u8]) -> u64 {
        debug_assert_eq!(header.length as usize, payload.len());
        // SAFETY: `reserve` proved [pos, pos + span) lies between head and
        // tail + capacity, a range the consumer does not read until we
        // publish it below.
        unsafe {
            self.ring.write(pos, &header.encode());
            self.ring.write(pos + RECORD_HEADER_SIZE as u64, payload);
        }
        let next = pos + header.span();
        // Release: the record bytes above happen-before any acquire load of
        // head that observes `next`.
        self.shared.control().head.store(next, Ordering::Release);

        self.shared.records.fetch_add(1, Ordering::Relaxed);
        self.shared.bytes.fetch_add(header.span(), Ordering::Relaxed);
        next
    }

    pub fn is_dropping(&self) -> bool {
        self.shared.control().is_dropping()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn max_payload(&self) -> u64 {
        self.max_payload
    }

    pub fn used(&self) -> u64 {
        self.shared.control().used()
    }

    pub fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.used())
    }

    /// A control handle for the same ring.
    pub fn control(&self) -> Control {
        Control::new(self.shared.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RingChannel;
    use crate::ring::RingConfig;

    fn producer(capacity: usize) -> (Producer, Control) {
        let (p, _c, ctl) = RingChannel::anonymous(RingConfig::new(capacity).unwrap())
            .unwrap()
            .into_parts();
        (p, ctl)
    }

    /// (start_ns, count) of the open drop episode.
    fn episode(p: &Producer) -> (u64, u64) {
        let cb = p.shared.control();
        (
            cb.drop_episode_start_ns.load(Ordering::Relaxed),
            cb.drop_episode_count.load(Ordering::Relaxed),
        )
    }

    #[test]
    fn reserve_reports_head_when_room() {
        let (mut p, _ctl) = producer(1024);
        assert_eq!(p.reserve(1024), Some(0));
        assert_eq!(p.reserve(1025), None);
        p.push(&[0u8; 100]);
        assert_eq!(p.reserve(116), Some(116));
        assert_eq!(p.free(), 1024 - 116);
    }

    #[test]
    fn oversized_payload_is_not_a_drop() {
        let (mut p, ctl) = producer(1024);
        let too_big = vec![0u8; p.max_payload() as usize + 1];
        assert_eq!(p.push(&too_big), PushOutcome::TooLarge);
        assert!(!p.is_dropping());
        assert_eq!(ctl.stats().drops, 0);

        let largest = vec![0u8; p.max_payload() as usize];
        assert_eq!(p.push(&largest), PushOutcome::Written);
    }

    #[test]
    fn first_failure_opens_episode_and_later_ones_count() {
        let (mut p, ctl) = producer(256);
        let payload = [7u8; 100];
        assert_eq!(p.push(&payload), PushOutcome::Written);
        assert_eq!(p.push(&payload), PushOutcome::Written);
        assert_eq!(p.push(&payload), PushOutcome::Dropped);
        assert!(p.is_dropping());

        let (start, count) = episode(&p);
        assert!(start > 0);
        assert_eq!(count, 1);

        assert_eq!(p.push(&payload), PushOutcome::Dropped);
        assert_eq!(episode(&p), (start, 2));
        assert_eq!(ctl.stats().drops, 2);
    }

    #[test]
    fn drop_summary_carries_episode_bounds() {
        let (mut p, mut c, ctl) = RingChannel::anonymous(RingConfig::new(256).unwrap())
            .unwrap()
            .into_parts();
        let payload = [3u8; 100];
        p.push(&payload);
        p.push(&payload);
        for _ in 0..3 {
            assert_eq!(p.push(&payload), PushOutcome::Dropped);
        }
        let (start, lost) = episode(&p);

        ctl.advance_tail(232).unwrap();
        assert_eq!(p.push(&payload), PushOutcome::Written);
        assert_eq!(episode(&p).1, lost, "counters stay until the next episode");

        let mut summaries = Vec::new();
        c.poll(|r| {
            if let crate::Record::Drop { header, summary } = r {
                summaries.push((header.timestamp_ns, summary));
            }
        })
        .unwrap();
        assert_eq!(summaries.len(), 1);
        let (stamped, summary) = summaries[0];
        assert_eq!(summary.lost, 3);
        assert_eq!(summary.episode_start_ns, start);
        assert_eq!(summary.episode_end_ns, stamped);
        assert!(summary.episode_end_ns >= start);
    }

    #[test]
    fn drop_summary_needs_room_next_to_payload() {
        let (mut p, ctl) = producer(256);
        let payload = [1u8; 100];
        p.push(&payload);
        p.push(&payload);
        assert_eq!(p.push(&payload), PushOutcome::Dropped);

        // Free exactly one packet's worth: enough for the payload alone but
        // not for payload plus summary, so the push keeps dropping.
        ctl.advance_tail(116).unwrap();
        assert_eq!(p.free(), 256 - 116);
        assert_eq!(p.push(&payload), PushOutcome::Dropped);

        ctl.advance_tail(232).unwrap();
        assert_eq!(p.push(&payload), PushOutcome::Written);
        assert!(!p.is_dropping());
        // summary (36) + payload (116)
        assert_eq!(ctl.stats().head, 232 + 36 + 116);
    }
}
