/// Response decoding throughput and latency benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use seq_feed::{Decoder, PriceChange, Side, UpdateEvent};
use serde_json::json;

fn create_batch_body(event_count: usize) -> Vec<u8> {
    let updates: Vec<UpdateEvent> = (0..event_count as u64)
        .map(|seq| {
            UpdateEvent::new(
                seq,
                vec![PriceChange {
                    ticker: format!("T{}", seq % 16),
                    price: 100.0 + (seq % 50) as f64 * 0.25,
                    volume: (seq % 7) as f64,
                    side: if seq % 2 == 0 { Side::Bid } else { Side::Ask },
                }],
            )
        })
        .collect();

    serde_json::to_vec(&json!({
        "fromExclusive": -1,
        "latestSeq": event_count as i64 - 1,
        "updates": updates,
    }))
    .unwrap()
}

fn bench_batch_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_throughput");

    for event_count in [10, 100, 1000].iter() {
        let body = black_box(create_batch_body(*event_count));
        group.throughput(Throughput::Elements(*event_count as u64));

        group.bench_with_input(
            BenchmarkId::from_parameter(event_count),
            event_count,
            |b, _| b.iter(|| Decoder::batch(&body).map(|events| events.len())),
        );
    }
    group.finish();
}

fn bench_single_bodies(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_body");

    let update = br#"{"message":{"errorCode":0},"seq":42,"update":{"seq":42,"priceChanges":[{"ticker":"A","price":100.5,"volume":3,"side":"BID"}]}}"#;
    let not_yet = br#"{"message":{"errorCode":8,"errorMessage":"Too old or doesn't exist"}}"#;
    let gone = br#"{"error":"from-too-old","fromExclusive":4,"minAvailableSeq":50}"#;

    group.bench_function("exact_update", |b| {
        b.iter(|| Decoder::update(black_box(update)))
    });

    group.bench_function("error_code", |b| {
        b.iter(|| Decoder::error_code(black_box(not_yet)))
    });

    group.bench_function("gone", |b| {
        b.iter(|| Decoder::gone(black_box(gone)))
    });

    group.finish();
}

criterion_group!(benches, bench_batch_throughput, bench_single_bodies);
criterion_main!(benches);
