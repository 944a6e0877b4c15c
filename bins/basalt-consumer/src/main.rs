//! Attaches to a ring file, drains it and checks every payload.
//!
//! Usage: `basalt-consumer [config.toml]`.
//!
//! Launched by a producer with an inherited eventfd, it sleeps on that
//! eventfd between drains; otherwise it polls every `poll_interval_us`.

use anyhow::Context;
use basalt_config::BasaltConfig;
use basalt_loadgen::verify_payload;
use basalt_ring::{Consumer, Record};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const OPEN_TIMEOUT: Duration = Duration::from_secs(10);
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// How the consumer idles once the ring is empty.
enum Idle {
    /// Sleep on the eventfd the producer signals on upward crossings.
    #[cfg(target_os = "linux")]
    Doorbell(basalt_ring::EventFdNotifier),
    Sleep(Duration),
}

impl Idle {
    fn from_env(poll_interval: Duration) -> anyhow::Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let inherited =
                basalt_ring::EventFdNotifier::from_env().context("adopting inherited eventfd")?;
            if let Some(doorbell) = inherited {
                info!("waiting on inherited eventfd");
                return Ok(Self::Doorbell(doorbell));
            }
        }
        Ok(Self::Sleep(poll_interval))
    }

    /// Idles until woken or until the next stats report is due.
    #[cfg_attr(not(target_os = "linux"), allow(unused_variables))]
    fn wait(&self, consumer: &Consumer) -> anyhow::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Doorbell(doorbell) => {
                if !consumer.is_ready() {
                    doorbell.wait(Some(REPORT_INTERVAL))?;
                }
            }
            Self::Sleep(interval) => std::thread::sleep(*interval),
        }
        Ok(())
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

/// Waits for the producer to create and initialise the ring file.
fn open_ring(path: &str) -> anyhow::Result<Consumer> {
    let deadline = Instant::now() + OPEN_TIMEOUT;
    loop {
        match Consumer::open(path) {
            Ok(c) => return Ok(c),
            Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => return Err(e).with_context(|| format!("opening ring at {path}")),
        }
    }
}

#[derive(Default)]
struct Tally {
    packets: u64,
    bad: u64,
    gaps: u64,
    last_seq: Option<u64>,
    latency_ns_sum: u64,
}

fn main() -> anyhow::Result<()> {
    let config =
        BasaltConfig::load_or_default(std::env::args().nth(1)).context("loading config")?;
    init_tracing(&config.log_level);

    let mut consumer = open_ring(&config.shm_file_path)?;
    info!(path = %config.shm_file_path, capacity = consumer.capacity(), "consumer attached");

    let idle = Idle::from_env(Duration::from_micros(config.poll_interval_us))?;
    let mut tally = Tally::default();
    let mut last_report = Instant::now();

    loop {
        let n = consumer.poll(|record| match record {
            Record::Packet { header, payload } => match verify_payload(payload) {
                Ok((ts, seq)) => {
                    tally.packets += 1;
                    tally.latency_ns_sum += header.timestamp_ns.saturating_sub(ts);
                    // Drop summaries account for skipped sequence numbers.
                    if let Some(prev) = tally.last_seq {
                        if seq <= prev {
                            warn!(seq, prev, "sequence went backwards");
                        }
                    }
                    tally.last_seq = Some(seq);
                }
                Err(e) => {
                    tally.bad += 1;
                    warn!(error = %e, "payload failed verification");
                }
            },
            Record::Drop { summary, .. } => {
                tally.gaps += 1;
                info!(
                    lost = summary.lost,
                    duration_ns = summary.episode_end_ns.saturating_sub(summary.episode_start_ns),
                    "producer dropped records"
                );
            }
        })?;

        if last_report.elapsed() >= REPORT_INTERVAL {
            info!(
                packets = tally.packets,
                lost = consumer.lost(),
                episodes = tally.gaps,
                bad = tally.bad,
                avg_fill_to_push_ns = tally.latency_ns_sum / tally.packets.max(1),
                used = consumer.used(),
                "consumer stats"
            );
            last_report = Instant::now();
        }
        if n == 0 {
            idle.wait(&consumer)?;
        }
    }
}
