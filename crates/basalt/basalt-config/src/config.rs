use basalt_ring::{DROP_RECORD_SIZE, RECORD_HEADER_SIZE};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BasaltConfig {
    #[serde(default = "defaults::shm_file_path")]
    pub shm_file_path: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    /// The data ring holds `1 << ring_order` bytes.
    #[serde(default = "defaults::ring_order")]
    pub ring_order: u32,
    #[serde(default = "defaults::rate_hz")]
    pub rate_hz: u32,
    #[serde(default = "defaults::hi_watermark_pct")]
    pub hi_watermark_pct: u32,
    #[serde(default = "defaults::lo_watermark_pct")]
    pub lo_watermark_pct: u32,
    /// Bytes per synthetic payload, timestamp and sequence number included.
    #[serde(default = "defaults::payload_size")]
    pub payload_size: usize,
    /// Consumer sleep between empty polls when it has no eventfd to wait on.
    #[serde(default = "defaults::poll_interval_us")]
    pub poll_interval_us: u64,
    /// Consumer binary the producer launches with the ring's eventfd.
    #[serde(default)]
    pub consumer_bin: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

mod defaults {
    pub fn shm_file_path() -> String {
        "/tmp/basalt_ring".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn ring_order() -> u32 {
        20 // 1 MiB
    }

    pub fn rate_hz() -> u32 {
        2000
    }

    pub fn hi_watermark_pct() -> u32 {
        50
    }

    pub fn lo_watermark_pct() -> u32 {
        30
    }

    pub fn payload_size() -> usize {
        256
    }

    pub fn poll_interval_us() -> u64 {
        100
    }
}

const RING_ORDERS: std::ops::RangeInclusive<u32> = 6..=30;
const MIN_PAYLOAD: usize = 16;

impl Default for BasaltConfig {
    fn default() -> Self {
        Self {
            shm_file_path: defaults::shm_file_path(),
            log_level: defaults::log_level(),
            ring_order: defaults::ring_order(),
            rate_hz: defaults::rate_hz(),
            hi_watermark_pct: defaults::hi_watermark_pct(),
            lo_watermark_pct: defaults::lo_watermark_pct(),
            payload_size: defaults::payload_size(),
            poll_interval_us: defaults::poll_interval_us(),
            consumer_bin: None,
        }
    }
}

impl BasaltConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let toml_to_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&toml_to_str)
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: BasaltConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<impl AsRef<Path>>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !RING_ORDERS.contains(&self.ring_order) {
            return Err(ConfigError::Invalid(format!(
                "ring_order {} outside {}..={}",
                self.ring_order,
                RING_ORDERS.start(),
                RING_ORDERS.end()
            )));
        }
        if self.rate_hz == 0 || self.rate_hz > 100_000 {
            return Err(ConfigError::Invalid(format!(
                "rate_hz {} outside 1..=100000",
                self.rate_hz
            )));
        }
        if self.hi_watermark_pct > 100 || self.lo_watermark_pct > self.hi_watermark_pct {
            return Err(ConfigError::Invalid(format!(
                "watermarks hi={} lo={}, need lo <= hi <= 100",
                self.hi_watermark_pct, self.lo_watermark_pct
            )));
        }
        if self.payload_size < MIN_PAYLOAD || self.payload_size > self.max_payload() {
            return Err(ConfigError::Invalid(format!(
                "payload_size {} outside {MIN_PAYLOAD}..={} for a {} byte ring",
                self.payload_size,
                self.max_payload(),
                self.capacity()
            )));
        }
        Ok(())
    }

    /// Data ring size in bytes.
    pub fn capacity(&self) -> usize {
        1usize << self.ring_order
    }

    /// Largest payload a push can carry: one record header plus room for
    /// the drop summary that may have to precede it.
    pub fn max_payload(&self) -> usize {
        self.capacity().saturating_sub(RECORD_HEADER_SIZE + DROP_RECORD_SIZE)
    }
}
