//! Measurement helpers shared by the `perf_report` binary and the criterion
//! benches.

use basalt_loadgen::fill_payload;
use basalt_ring::clock::now_ns;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

/// Order statistics of a set of nanosecond samples.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct LatencySummary {
    pub samples: usize,
    pub min: u64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub max: u64,
    pub mean: f64,
}

impl LatencySummary {
    /// Sorts `samples` in place and summarises them. `None` when empty.
    pub fn from_samples(samples: &mut [u64]) -> Option<Self> {
        let (&min, &max) = {
            samples.sort_unstable();
            (samples.first()?, samples.last()?)
        };
        let total: u128 = samples.iter().map(|&s| u128::from(s)).sum();
        Some(Self {
            samples: samples.len(),
            min,
            p50: nearest_rank(samples, 500),
            p90: nearest_rank(samples, 900),
            p99: nearest_rank(samples, 990),
            p999: nearest_rank(samples, 999),
            max,
            mean: total as f64 / samples.len() as f64,
        })
    }
}

/// Nearest-rank percentile of a sorted, non-empty slice, in permille.
fn nearest_rank(sorted: &[u64], permille: usize) -> u64 {
    let rank = (sorted.len() * permille).div_ceil(1000).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

/// One labelled row of the report.
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub label: String,
    pub unit: &'static str,
    pub summary: LatencySummary,
}

/// Shape of a batched timing run.
#[derive(Debug, Clone, Copy)]
pub struct Batches {
    /// Timed batches; one sample each.
    pub count: usize,
    /// Calls per batch.
    pub size: usize,
    /// Untimed batches run first.
    pub warmup: usize,
}

impl Default for Batches {
    fn default() -> Self {
        Self {
            count: 1000,
            size: 10_000,
            warmup: 10,
        }
    }
}

/// Times `op` in batches and records the mean cost of one call per batch,
/// so each sample sits well above the clock's resolution.
pub fn time_per_op(label: impl Into<String>, shape: Batches, mut op: impl FnMut()) -> Measurement {
    for _ in 0..shape.warmup * shape.size {
        op();
    }
    let size = shape.size.max(1) as u128;
    let mut samples: Vec<u64> = (0..shape.count.max(1))
        .map(|_| {
            let start = Instant::now();
            for _ in 0..size {
                op();
            }
            let per_op = start.elapsed().as_nanos().div_ceil(size);
            u64::try_from(per_op).unwrap_or(u64::MAX)
        })
        .collect();
    Measurement {
        label: label.into(),
        unit: "ns/op",
        summary: LatencySummary::from_samples(&mut samples)
            .unwrap_or_else(|| unreachable!("at least one batch is timed")),
    }
}

/// Process counters from `getrusage(RUSAGE_SELF)`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProcessUsage {
    pub max_rss_bytes: i64,
    pub minor_faults: i64,
    pub major_faults: i64,
    pub voluntary_switches: i64,
    pub involuntary_switches: i64,
}

impl ProcessUsage {
    pub fn now() -> Self {
        // SAFETY: getrusage fills the zeroed struct we hand it.
        let usage = unsafe {
            let mut usage: libc::rusage = std::mem::zeroed();
            libc::getrusage(libc::RUSAGE_SELF, &mut usage);
            usage
        };
        // ru_maxrss is KiB on Linux, bytes elsewhere.
        let rss_scale = if cfg!(target_os = "linux") { 1024 } else { 1 };
        Self {
            max_rss_bytes: usage.ru_maxrss as i64 * rss_scale,
            minor_faults: usage.ru_minflt as i64,
            major_faults: usage.ru_majflt as i64,
            voluntary_switches: usage.ru_nvcsw as i64,
            involuntary_switches: usage.ru_nivcsw as i64,
        }
    }

    /// Counters accumulated since `earlier`; peak RSS is kept as is.
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            max_rss_bytes: self.max_rss_bytes,
            minor_faults: self.minor_faults - earlier.minor_faults,
            major_faults: self.major_faults - earlier.major_faults,
            voluntary_switches: self.voluntary_switches - earlier.voluntary_switches,
            involuntary_switches: self.involuntary_switches - earlier.involuntary_switches,
        }
    }
}

/// A per-process ring file path under the system temp dir.
pub fn ring_file_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("basalt-perf-{label}-{}", std::process::id()))
}

/// A payload in the load generator's verifiable pattern.
pub fn stamped_payload(len: usize, seq: u64) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    fill_payload(&mut buf, now_ns(), seq);
    buf
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["B", "KiB", "MiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Fixed-width text table for report sections.
pub struct Table;

impl Table {
    const RULE: usize = 96;

    pub fn section(title: &str) {
        let rule = "\u{2500}".repeat(Self::RULE);
        println!("\n{rule}\n  {title}\n{rule}");
    }

    pub fn columns() {
        println!(
            "  {:<34} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  unit",
            "operation", "min", "p50", "p90", "p99", "p99.9", "max",
        );
    }

    pub fn row(m: &Measurement) {
        let s = &m.summary;
        println!(
            "  {:<34} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  {}",
            m.label, s.min, s.p50, s.p90, s.p99, s.p999, s.max, m.unit,
        );
    }
}
