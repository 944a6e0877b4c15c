use basalt_mmap::MapError;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("ring capacity {0} is not a power of two")]
    CapacityNotPowerOfTwo(usize),

    #[error("ring capacity {capacity} is below the minimum of {min} bytes")]
    CapacityTooSmall { capacity: usize, min: usize },

    #[error("{what} out of range: {detail}")]
    InvalidRange { what: &'static str, detail: String },

    #[error("tail {requested} outside [{tail}, {head}]")]
    OutOfRange { requested: u64, tail: u64, head: u64 },

    #[error("requested view of {requested} bytes exceeds the {available}-byte region")]
    ViewTooLarge { requested: u64, available: u64 },

    #[error("view of {len} bytes cannot hold a ring needing {required} bytes")]
    ViewTooSmall { len: usize, required: usize },

    #[error("bad ring layout: {0}")]
    BadLayout(&'static str),

    #[error("corrupted record at tail {tail} (head {head}, record length {record_len})")]
    Corrupted { tail: u64, head: u64, record_len: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<MapError> for RingError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::Io(e) => RingError::Io(e),
            MapError::ViewTooLarge {
                requested,
                available,
            } => RingError::ViewTooLarge {
                requested,
                available,
            },
        }
    }
}
