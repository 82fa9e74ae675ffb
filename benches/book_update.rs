/// Order book update latency benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use seq_feed::book_builder::parse_books;
use seq_feed::{OrderBook, PriceChange, Side};
use serde_json::json;

fn populated_book(levels: u64) -> OrderBook {
    let mut book = OrderBook::new();
    for i in 0..levels {
        book.set_level(Side::Bid, 100_00000000 - i * 1_00000000, 100 + i);
        book.set_level(Side::Ask, 101_00000000 + i * 1_00000000, 100 + i);
    }
    book
}

fn bench_apply_change(c: &mut Criterion) {
    c.bench_function("book_apply_change", |b| {
        let mut book = OrderBook::new();
        let mut tick = 0u64;

        b.iter(|| {
            let change = PriceChange {
                ticker: "A".to_string(),
                price: 100.0 + (tick % 64) as f64 * 0.01,
                volume: (tick % 5) as f64,
                side: if tick % 2 == 0 { Side::Bid } else { Side::Ask },
            };
            book.apply_change(black_box(&change));
            tick += 1;
        });
    });
}

fn bench_best_prices(c: &mut Criterion) {
    let book = populated_book(100);

    c.bench_function("book_best_bid", |b| b.iter(|| black_box(book.best_bid())));
    c.bench_function("book_spread", |b| b.iter(|| black_box(book.spread())));
}

fn bench_depth(c: &mut Criterion) {
    let book = populated_book(100);

    c.bench_function("book_depth_10", |b| b.iter(|| black_box(book.depth(10))));
}

fn bench_parse_snapshot(c: &mut Criterion) {
    let levels: Vec<(f64, f64)> = (0..200).map(|i| (100.0 + i as f64 * 0.5, 1.0 + i as f64)).collect();
    let state = json!({
        "A": {"bids": levels, "asks": levels},
        "B": {"bids": levels, "asks": levels},
    });

    c.bench_function("parse_snapshot_2x200", |b| {
        b.iter(|| parse_books(black_box(&state)).map(|books| books.len()))
    });
}

criterion_group!(
    benches,
    bench_apply_change,
    bench_best_prices,
    bench_depth,
    bench_parse_snapshot
);
criterion_main!(benches);
