//! Synthetic traffic for a record ring.
//!
//! Every payload carries a self-checking pattern so a consumer in another
//! process can tell corrupted records from good ones:
//!
//! ```text
//! bytes 0..8    timestamp (ns, monotonic clock)
//! bytes 8..16   sequence number, starting at 1
//! word i >= 2   seq * 0x1234_5678_9ABC_DEF0 + i      (u64, little-endian)
//! tail byte j   (seq + j) as u8                      (when len % 8 != 0)
//! ```

use basalt_ring::{Control, Producer, PushOutcome, clock::now_ns};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

const PATTERN_MUL: u64 = 0x1234_5678_9ABC_DEF0;
const WORD: usize = 8;

/// Timestamp plus sequence number.
pub const MIN_PAYLOAD: usize = 2 * WORD;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("payload of {0} bytes is shorter than the {MIN_PAYLOAD}-byte prefix")]
    TooShort(usize),

    #[error("payload for seq {seq} differs from its pattern at byte {offset}")]
    Mismatch { seq: u64, offset: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum LoadGenError {
    #[error("payload size {size} outside {MIN_PAYLOAD}..={max}")]
    PayloadSize { size: usize, max: u64 },
}

fn word_at(seq: u64, i: usize) -> u64 {
    seq.wrapping_mul(PATTERN_MUL).wrapping_add(i as u64)
}

fn tail_byte(seq: u64, j: usize) -> u8 {
    seq.wrapping_add(j as u64) as u8
}

/// Writes the pattern for `seq` over the whole of `buf`.
///
/// # Panics
/// If `buf` is shorter than [`MIN_PAYLOAD`].
pub fn fill_payload(buf: &mut [u8], timestamp_ns: u64, seq: u64) {
    assert!(buf.len() >= MIN_PAYLOAD, "payload too short");
    let words = buf.len() / WORD;
    buf[..8].copy_from_slice(&timestamp_ns.to_le_bytes());
    buf[8..16].copy_from_slice(&seq.to_le_bytes());
    for i in 2..words {
        buf[i * WORD..(i + 1) * WORD].copy_from_slice(&word_at(seq, i).to_le_bytes());
    }
    for j in words * WORD..buf.len() {
        buf[j] = tail_byte(seq, j);
    }
}

/// Checks `payload` against its own sequence number and returns
/// `(timestamp_ns, seq)`.
pub fn verify_payload(payload: &[u8]) -> Result<(u64, u64), PatternError> {
    if payload.len() < MIN_PAYLOAD {
        return Err(PatternError::TooShort(payload.len()));
    }
    let read = |i: usize| {
        let mut w = [0u8; WORD];
        w.copy_from_slice(&payload[i * WORD..(i + 1) * WORD]);
        u64::from_le_bytes(w)
    };
    let ts = read(0);
    let seq = read(1);

    let words = payload.len() / WORD;
    if let Some(i) = (2..words).find(|&i| read(i) != word_at(seq, i)) {
        return Err(PatternError::Mismatch {
            seq,
            offset: i * WORD,
        });
    }
    if let Some(j) = (words * WORD..payload.len()).find(|&j| payload[j] != tail_byte(seq, j)) {
        return Err(PatternError::Mismatch { seq, offset: j });
    }
    Ok((ts, seq))
}

/// Totals for one [`LoadGenerator::run_until`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub written: u64,
    pub dropped: u64,
}

/// Pushes patterned payloads at the rate configured on the ring's control
/// surface.
pub struct LoadGenerator {
    producer: Producer,
    control: Control,
    buf: Vec<u8>,
    seq: u64,
}

impl LoadGenerator {
    pub fn new(producer: Producer, payload_size: usize) -> Result<Self, LoadGenError> {
        let max = producer.max_payload();
        if payload_size < MIN_PAYLOAD || payload_size as u64 > max {
            return Err(LoadGenError::PayloadSize {
                size: payload_size,
                max,
            });
        }
        let control = producer.control();
        Ok(Self {
            producer,
            control,
            buf: vec![0; payload_size],
            seq: 0,
        })
    }

    /// Builds and pushes the next payload.
    pub fn tick(&mut self) -> PushOutcome {
        self.seq += 1;
        fill_payload(&mut self.buf, now_ns(), self.seq);
        self.producer.push(&self.buf)
    }

    /// Sleep between cycles at the current rate, never below 1 ms.
    pub fn interval(&self) -> Duration {
        let hz = self.control.rate_hz().max(1);
        Duration::from_millis((1000 / hz).max(1) as u64)
    }

    /// Runs until `stop` is set. The rate is re-read every cycle so
    /// [`Control::set_rate`] takes effect on a running generator.
    pub fn run_until(&mut self, stop: &AtomicBool) -> LoadStats {
        info!(
            payload = self.buf.len(),
            rate_hz = self.control.rate_hz(),
            "load generator started"
        );
        let mut stats = LoadStats::default();
        while !stop.load(Ordering::Relaxed) {
            match self.tick() {
                PushOutcome::Written => stats.written += 1,
                PushOutcome::Dropped => stats.dropped += 1,
                // Size was checked in `new`.
                PushOutcome::TooLarge => unreachable!("payload exceeds ring"),
            }
            std::thread::sleep(self.interval());
        }
        info!(written = stats.written, dropped = stats.dropped, "load generator stopped");
        stats
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn into_producer(self) -> Producer {
        self.producer
    }
}
