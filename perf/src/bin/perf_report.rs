use std::hint::black_box;
use std::sync::{Arc, Barrier};
use std::time::Instant;

use basalt_perf::*;
use basalt_ring::clock::now_ns;
use basalt_ring::{
    CONTROL_PAGE_SIZE, DROP_RECORD_SIZE, PushOutcome, RECORD_HEADER_SIZE, Record, RecordHeader,
    RingChannel, RingConfig,
};

const XTHREAD_RECORDS: usize = 200_000;
const XTHREAD_PAYLOAD: usize = 64;

fn main() {
    let usage_start = ProcessUsage::now();
    let mut results: Vec<Measurement> = Vec::new();

    print_banner();
    section_layout();
    section_clock(&mut results);
    section_single_thread(&mut results);
    section_cross_thread(&mut results);

    let usage = ProcessUsage::now().since(&usage_start);
    section_resources(&usage);

    let out = serde_json::json!({
        "results": results,
        "usage": usage,
    });
    let path = std::env::temp_dir().join("basalt_perf_report.json");
    match serde_json::to_string_pretty(&out).map(|s| std::fs::write(&path, s)) {
        Ok(Ok(())) => println!("\n  JSON written to {}", path.display()),
        Ok(Err(e)) => eprintln!("failed to write report: {e}"),
        Err(e) => eprintln!("failed to serialise report: {e}"),
    }
}

fn print_banner() {
    let bar = "\u{2550}".repeat(90);
    println!("\n{bar}");
    println!("  BASALT PERFORMANCE REPORT");
    println!("  single-thread push/read + cross-thread latency");
    println!("{bar}");
}

fn section_layout() {
    Table::section("RECORD LAYOUT");
    println!("  control page:        {CONTROL_PAGE_SIZE} B");
    println!("  record header:       {RECORD_HEADER_SIZE} B");
    println!("  drop-summary record: {DROP_RECORD_SIZE} B");
    for payload in [16usize, 64, 256, 1024] {
        let span = RECORD_HEADER_SIZE + payload;
        println!(
            "  {payload:>5} B payload -> {span:>5} B record, {:>6} per 1 MiB ring",
            (1usize << 20) / span
        );
    }
}

fn section_clock(results: &mut Vec<Measurement>) {
    Table::section("CLOCK CALIBRATION");
    Table::columns();

    let long_warmup = Batches {
        warmup: 100,
        ..Batches::default()
    };
    let mono = time_per_op("clock::now_ns()", long_warmup, || {
        black_box(now_ns());
    });
    Table::row(&mono);
    let instant = time_per_op("Instant::now()", long_warmup, || {
        black_box(Instant::now());
    });
    Table::row(&instant);

    println!(
        "\n  * Measurement floor: ~{} ns",
        mono.summary.p50.min(instant.summary.p50)
    );
    results.push(mono);
    results.push(instant);
}

fn section_single_thread(results: &mut Vec<Measurement>) {
    Table::section("SINGLE-THREAD HOT PATH");
    Table::columns();

    let header = RecordHeader::packet(64, 1);
    let r = time_per_op("RecordHeader::encode+decode", Batches::default(), || {
        black_box(RecordHeader::decode(&black_box(header).encode()));
    });
    Table::row(&r);
    results.push(r);

    for payload_len in [16usize, 64, 256] {
        let (mut producer, mut consumer, _ctl) =
            RingChannel::anonymous(RingConfig::new(1 << 16).expect("ring config"))
                .expect("ring")
                .into_parts();
        let payload = stamped_payload(payload_len, 1);
        let label = format!("push+try_read ({payload_len} B)");
        let r = time_per_op(label, Batches::default(), || {
            black_box(producer.push(&payload));
            if let Ok(Some(rec)) = consumer.try_read() {
                black_box(rec.header());
            }
        });
        Table::row(&r);
        results.push(r);
    }

    let (mut producer, _consumer, _ctl) =
        RingChannel::anonymous(RingConfig::new(1 << 12).expect("ring config"))
            .expect("ring")
            .into_parts();
    let payload = stamped_payload(256, 1);
    while producer.push(&payload) == PushOutcome::Written {}
    let r = time_per_op("push (full ring, dropping)", Batches::default(), || {
        black_box(producer.push(&payload));
    });
    Table::row(&r);
    results.push(r);
}

fn section_cross_thread(results: &mut Vec<Measurement>) {
    let (mut producer, mut consumer, control) =
        RingChannel::anonymous(RingConfig::new(1 << 16).expect("ring config"))
            .expect("ring")
            .into_parts();

    let barrier = Arc::new(Barrier::new(2));
    let b2 = barrier.clone();
    let reader = std::thread::spawn(move || {
        let mut samples = Vec::with_capacity(XTHREAD_RECORDS);
        let mut lost = 0u64;
        b2.wait();
        while (samples.len() as u64 + lost) < XTHREAD_RECORDS as u64 {
            match consumer.try_read() {
                Ok(Some(Record::Packet { header, .. })) => {
                    samples.push(now_ns().saturating_sub(header.timestamp_ns));
                }
                Ok(Some(Record::Drop { summary, .. })) => lost += summary.lost as u64,
                Ok(None) => std::hint::spin_loop(),
                Err(e) => panic!("consumer: {e}"),
            }
        }
        (samples, lost)
    });

    let payload = stamped_payload(XTHREAD_PAYLOAD, 1);
    barrier.wait();
    let start = Instant::now();
    let mut pushed = 0usize;
    while pushed < XTHREAD_RECORDS {
        match producer.push(&payload) {
            PushOutcome::Written => pushed += 1,
            PushOutcome::Dropped => {
                pushed += 1;
                std::hint::spin_loop();
            }
            PushOutcome::TooLarge => unreachable!(),
        }
    }
    // Flush any open drop episode so the reader can account for it.
    while producer.is_dropping() {
        if producer.push(&payload) == PushOutcome::Written {
            break;
        }
    }
    let elapsed = start.elapsed();
    let (mut samples, lost) = reader.join().expect("consumer thread panicked");

    Table::section("CROSS-THREAD  (producer thread \u{2192} ring \u{2192} consumer thread)");
    println!(
        "  {} records of {XTHREAD_PAYLOAD} B in {elapsed:?}, {lost} dropped, {} drop events",
        XTHREAD_RECORDS,
        control.stats().drops
    );
    let Some(summary) = LatencySummary::from_samples(&mut samples) else {
        println!("  no records reached the consumer");
        return;
    };
    Table::columns();
    let r = Measurement {
        label: "push \u{2192} read latency".into(),
        unit: "ns",
        summary,
    };
    Table::row(&r);
    results.push(r);
}

fn section_resources(usage: &ProcessUsage) {
    Table::section("RESOURCE USAGE");
    println!("  max RSS:          {}", human_bytes(usage.max_rss_bytes.max(0) as u64));
    println!("  minor faults:     {}", usage.minor_faults);
    println!("  major faults:     {}", usage.major_faults);
    println!(
        "  ctx switches:     {} voluntary, {} involuntary",
        usage.voluntary_switches, usage.involuntary_switches
    );
}
