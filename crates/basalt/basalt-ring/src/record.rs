//! Record framing inside the data ring.
//!
//! Every record is a 16-byte header followed by `length` payload bytes:
//!
//! ```text
//! ┌────────┬────────┬──────────┬──────────────┬──────────────────┐
//! │ type   │ flags  │ length   │ timestamp_ns │ payload ...      │
//! │ u16    │ u16    │ u32      │ u64          │ `length` bytes   │
//! └────────┴────────┴──────────┴──────────────┴──────────────────┘
//! ```
//!
//! All integers are little-endian. A record may straddle the wrap boundary;
//! the byte ring takes care of the split.

pub const RECORD_HEADER_SIZE: usize = 16;

/// Encoded size of a [`DropSummary`] payload.
pub const DROP_PAYLOAD_SIZE: usize = 20;

/// Total span of a drop-summary record, header included.
pub const DROP_RECORD_SIZE: usize = RECORD_HEADER_SIZE + DROP_PAYLOAD_SIZE;

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordType {
    Packet = 1,
    Drop = 0xFFFF,
}

impl TryFrom<u16> for RecordType {
    type Error = u16;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(RecordType::Packet),
            0xFFFF => Ok(RecordType::Drop),
            other => Err(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: u16,
    pub flags: u16,
    pub length: u32,
    pub timestamp_ns: u64,
}

impl RecordHeader {
    pub fn packet(length: u32, timestamp_ns: u64) -> Self {
        Self {
            kind: RecordType::Packet as u16,
            flags: 0,
            length,
            timestamp_ns,
        }
    }

    pub fn drop_summary(timestamp_ns: u64) -> Self {
        Self {
            kind: RecordType::Drop as u16,
            flags: 0,
            length: DROP_PAYLOAD_SIZE as u32,
            timestamp_ns,
        }
    }

    pub fn record_type(&self) -> Option<RecordType> {
        RecordType::try_from(self.kind).ok()
    }

    /// Bytes this record occupies in the ring, header included.
    #[inline]
    pub fn span(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.length as u64
    }

    pub fn encode(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut out = [0u8; RECORD_HEADER_SIZE];
        out[0..2].copy_from_slice(&self.kind.to_le_bytes());
        out[2..4].copy_from_slice(&self.flags.to_le_bytes());
        out[4..8].copy_from_slice(&self.length.to_le_bytes());
        out[8..16].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out
    }

    pub fn decode(raw: &[u8; RECORD_HEADER_SIZE]) -> Self {
        Self {
            kind: u16::from_le_bytes([raw[0], raw[1]]),
            flags: u16::from_le_bytes([raw[2], raw[3]]),
            length: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            timestamp_ns: u64::from_le_bytes(le8(&raw[8..16])),
        }
    }
}

/// Payload of a drop-summary record: how many pushes were lost and when.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DropSummary {
    pub lost: u32,
    pub episode_start_ns: u64,
    pub episode_end_ns: u64,
}

impl DropSummary {
    pub fn encode(&self) -> [u8; DROP_PAYLOAD_SIZE] {
        let mut out = [0u8; DROP_PAYLOAD_SIZE];
        out[0..4].copy_from_slice(&self.lost.to_le_bytes());
        out[4..12].copy_from_slice(&self.episode_start_ns.to_le_bytes());
        out[12..20].copy_from_slice(&self.episode_end_ns.to_le_bytes());
        out
    }

    /// Returns `None` unless `raw` is exactly [`DROP_PAYLOAD_SIZE`] bytes.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() != DROP_PAYLOAD_SIZE {
            return None;
        }
        Some(Self {
            lost: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            episode_start_ns: u64::from_le_bytes(le8(&raw[4..12])),
            episode_end_ns: u64::from_le_bytes(le8(&raw[12..20])),
        })
    }
}

/// A decoded record, borrowing its payload from the consumer's scratch buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Record<'a> {
    Packet {
        header: RecordHeader,
        payload: &'a [u8],
    },
    Drop {
        header: RecordHeader,
        summary: DropSummary,
    },
}

impl Record<'_> {
    pub fn header(&self) -> &RecordHeader {
        match self {
            Record::Packet { header, .. } | Record::Drop { header, .. } => header,
        }
    }
}

#[inline]
fn le8(b: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(b);
    out
}
