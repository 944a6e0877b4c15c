//! Creates a ring file and feeds it synthetic traffic.
//!
//! Usage: `basalt-producer [config.toml] [seconds]`. Without a duration it
//! runs until killed.
//!
//! When the config names a `consumer_bin`, the producer launches it with an
//! inherited eventfd bound as the ring's notifier, so the consumer can sleep
//! until the high watermark is crossed.

use anyhow::Context;
use basalt_config::BasaltConfig;
use basalt_loadgen::LoadGenerator;
use basalt_ring::{Control, RingChannel, RingConfig};
use std::process::{Child, Command};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

/// Starts `bin` with a descriptor of a fresh eventfd and binds the eventfd
/// as the notifier of `control`.
#[cfg(target_os = "linux")]
fn launch_consumer(
    bin: &str,
    config_path: Option<&str>,
    control: &Control,
) -> anyhow::Result<Child> {
    use basalt_ring::{EVENTFD_ENV, EventFdNotifier};
    use std::os::fd::AsRawFd;

    let doorbell = EventFdNotifier::new().context("creating eventfd")?;
    let inherited = doorbell.dup_inheritable()?;
    let child = Command::new(bin)
        .args(config_path)
        .env(EVENTFD_ENV, inherited.as_raw_fd().to_string())
        .spawn()
        .with_context(|| format!("launching consumer {bin}"))?;
    drop(inherited);
    control.bind_notifier(Some(Box::new(doorbell)));
    info!(bin, pid = child.id(), "consumer launched with eventfd");
    Ok(child)
}

#[cfg(not(target_os = "linux"))]
fn launch_consumer(
    bin: &str,
    config_path: Option<&str>,
    _control: &Control,
) -> anyhow::Result<Child> {
    let child = Command::new(bin)
        .args(config_path)
        .spawn()
        .with_context(|| format!("launching consumer {bin}"))?;
    info!(bin, pid = child.id(), "consumer launched, polling without eventfd");
    Ok(child)
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next();
    let config = BasaltConfig::load_or_default(config_path.as_deref()).context("loading config")?;
    let run_for = args
        .next()
        .map(|s| s.parse::<u64>().map(Duration::from_secs))
        .transpose()
        .context("duration must be whole seconds")?;
    init_tracing(&config.log_level);

    let ring_cfg = RingConfig::from_order(config.ring_order)?
        .with_watermarks(config.hi_watermark_pct, config.lo_watermark_pct)?
        .with_rate(config.rate_hz)?;
    let (producer, _consumer, control) = RingChannel::create(&config.shm_file_path, ring_cfg)
        .with_context(|| format!("creating ring at {}", config.shm_file_path))?
        .into_parts();

    info!(
        path = %config.shm_file_path,
        capacity = ring_cfg.capacity,
        rate_hz = config.rate_hz,
        payload = config.payload_size,
        "producer started"
    );

    let mut consumer = config
        .consumer_bin
        .as_deref()
        .map(|bin| launch_consumer(bin, config_path.as_deref(), &control))
        .transpose()?;

    let mut generator = LoadGenerator::new(producer, config.payload_size)?;
    let stop = Arc::new(AtomicBool::new(false));
    let worker = {
        let stop = stop.clone();
        std::thread::Builder::new()
            .name("basalt-loadgen".into())
            .spawn(move || generator.run_until(&stop))?
    };

    let start = Instant::now();
    let mut last = control.stats();
    loop {
        std::thread::sleep(Duration::from_secs(1));
        let s = control.stats();
        info!(
            records_per_s = s.records - last.records,
            drops_per_s = s.drops - last.drops,
            used = s.used(),
            drops = s.drops,
            dropping = control.is_dropping(),
            "ring stats"
        );
        last = s;
        if run_for.is_some_and(|d| start.elapsed() >= d) {
            break;
        }
    }

    stop.store(true, Ordering::Relaxed);
    let totals = worker
        .join()
        .map_err(|_| anyhow::anyhow!("load generator panicked"))?;
    info!(written = totals.written, dropped = totals.dropped, "producer finished");

    if let Some(child) = consumer.as_mut() {
        child.kill().context("stopping consumer")?;
        child.wait()?;
    }
    Ok(())
}
