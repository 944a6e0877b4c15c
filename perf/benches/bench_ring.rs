use basalt_perf::{ring_file_path, stamped_payload};
use basalt_ring::{Consumer, PushOutcome, RingChannel, RingConfig};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::{Duration, Instant};

const CAP: usize = 1 << 16;

fn ring(capacity: usize) -> RingChannel {
    RingChannel::anonymous(RingConfig::new(capacity).expect("ring config")).expect("ring")
}

fn bench_push(c: &mut Criterion) {
    let (mut producer, _consumer, control) = ring(CAP).into_parts();
    let payload = stamped_payload(64, 1);

    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Elements(1));

    // Pushes into a ring that is emptied between chunks, outside the timing.
    group.bench_function("push", |b| {
        b.iter_custom(|iters| {
            let mut elapsed = Duration::ZERO;
            let mut left = iters;
            while left > 0 {
                control.reset();
                let start = Instant::now();
                while left > 0 && producer.push(black_box(&payload)) == PushOutcome::Written {
                    left -= 1;
                }
                elapsed += start.elapsed();
            }
            elapsed
        });
    });

    while producer.push(&payload) == PushOutcome::Written {}
    group.bench_function("push (full, dropping)", |b| {
        b.iter(|| black_box(producer.push(black_box(&payload))));
    });
    group.finish();
}

fn bench_try_read(c: &mut Criterion) {
    let (mut producer, mut consumer, control) = ring(CAP).into_parts();
    let payload = stamped_payload(64, 1);

    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Elements(1));

    group.bench_function("try_read (data)", |b| {
        b.iter_custom(|iters| {
            let mut elapsed = Duration::ZERO;
            let mut left = iters;
            while left > 0 {
                control.reset();
                let mut filled = 0;
                while filled < left && producer.push(&payload) == PushOutcome::Written {
                    filled += 1;
                }
                let start = Instant::now();
                for _ in 0..filled {
                    let _ = black_box(consumer.try_read());
                }
                elapsed += start.elapsed();
                left -= filled;
            }
            elapsed
        });
    });

    control.reset();
    group.bench_function("try_read (empty)", |b| {
        b.iter(|| {
            let _ = black_box(consumer.try_read());
        });
    });
    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_round_trip");
    for len in [16usize, 64, 256, 1024] {
        let (mut producer, mut consumer, _control) = ring(CAP).into_parts();
        let payload = stamped_payload(len, 1);
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_function(format!("payload_{len}"), |b| {
            b.iter(|| {
                producer.push(black_box(&payload));
                let _ = black_box(consumer.try_read());
            });
        });
    }
    group.finish();
}

fn bench_capacities(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_capacity");
    group.throughput(Throughput::Elements(1));
    for order in [12u32, 16, 20] {
        let (mut producer, mut consumer, _control) =
            RingChannel::anonymous(RingConfig::from_order(order).expect("ring config"))
                .expect("ring")
                .into_parts();
        let payload = stamped_payload(64, 1);
        group.bench_function(format!("round_trip_order_{order}"), |b| {
            b.iter(|| {
                producer.push(black_box(&payload));
                let _ = black_box(consumer.try_read());
            });
        });
    }
    group.finish();
}

fn bench_file_backed(c: &mut Criterion) {
    let path = ring_file_path("crit_file");
    let mut chan = RingChannel::create(&path, RingConfig::new(CAP).expect("ring config"))
        .expect("failed to create ring");
    let mut reader = Consumer::open(&path).expect("failed to open consumer");
    let payload = stamped_payload(64, 1);

    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Elements(1));
    group.bench_function("round_trip (second mapping)", |b| {
        b.iter(|| {
            chan.producer().push(black_box(&payload));
            let _ = black_box(reader.try_read());
        });
    });
    group.finish();

    drop(reader);
    drop(chan);
    let _ = std::fs::remove_file(&path);
}

criterion_group!(
    benches,
    bench_push,
    bench_try_read,
    bench_round_trip,
    bench_capacities,
    bench_file_backed,
);
criterion_main!(benches);
