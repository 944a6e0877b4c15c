//! Single-producer, single-consumer record ring over shared memory.
//!
//! A producer hands variable-length, timestamped records to a consumer through
//! a mapped region laid out as a 4 KiB control page followed by a power-of-two
//! data ring. Overflow never blocks the producer: it drops, counts, and later
//! writes a drop-summary record ahead of the resumed stream. Upward crossings
//! of the high watermark wake the consumer through an injectable [`Notifier`].

mod channel;
pub mod clock;
mod consumer;
mod control;
mod error;
mod notify;
mod producer;
mod record;
mod ring;
mod shm_layout;
mod watermark;

pub use channel::RingChannel;
pub use consumer::Consumer;
pub use control::{ChannelConfig, Control, RingStats};
pub use error::RingError;
#[cfg(target_os = "linux")]
pub use notify::{EVENTFD_ENV, EventFdNotifier};
pub use notify::Notifier;
pub use producer::{Producer, PushOutcome};
pub use record::{
    DROP_PAYLOAD_SIZE, DROP_RECORD_SIZE, DropSummary, RECORD_HEADER_SIZE, Record, RecordHeader,
    RecordType,
};
pub use ring::{MIN_CAPACITY, RingConfig};
pub use shm_layout::{CONTROL_PAGE_SIZE, DEFAULT_HI_PCT, DEFAULT_LO_PCT, bytes_for_ring};
pub use watermark::utilization_pct;
