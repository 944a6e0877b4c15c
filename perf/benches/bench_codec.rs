use basalt_loadgen::{fill_payload, verify_payload};
use basalt_ring::clock::now_ns;
use basalt_ring::{DropSummary, RecordHeader};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

fn bench_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let header = RecordHeader::packet(256, 1_234_567);
    let raw = header.encode();

    group.bench_function("header_encode", |b| {
        b.iter(|| black_box(black_box(header).encode()));
    });
    group.bench_function("header_decode", |b| {
        b.iter(|| black_box(RecordHeader::decode(black_box(&raw))));
    });

    let summary = DropSummary {
        lost: 17,
        episode_start_ns: 1,
        episode_end_ns: 2,
    };
    let raw_summary = summary.encode();
    group.bench_function("drop_summary_decode", |b| {
        b.iter(|| black_box(DropSummary::decode(black_box(&raw_summary[..]))));
    });
    group.finish();
}

fn bench_pattern(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern");
    for len in [64usize, 256, 1024] {
        let mut buf = vec![0u8; len];
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_function(format!("fill_{len}"), |b| {
            let mut seq = 0u64;
            b.iter(|| {
                seq += 1;
                fill_payload(black_box(&mut buf), 0, seq);
            });
        });
        fill_payload(&mut buf, 0, 7);
        group.bench_function(format!("verify_{len}"), |b| {
            b.iter(|| black_box(verify_payload(black_box(&buf))));
        });
    }
    group.finish();
}

fn bench_clock(c: &mut Criterion) {
    c.bench_function("now_ns", |b| {
        b.iter(|| black_box(now_ns()));
    });
}

criterion_group!(benches, bench_header, bench_pattern, bench_clock);
criterion_main!(benches);
