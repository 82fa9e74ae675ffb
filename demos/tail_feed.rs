/// Tail a sequenced update log into in-memory order books
///
/// Runs until Ctrl-C or a fatal feed error, then prints the top of every
/// book and the feed statistics.
///
///     cargo run --example tail_feed -- --base-url http://localhost:8080 --variant batched

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use seq_feed::protocol::price_from_fixed;
use seq_feed::{BookBuilder, CancellationToken, Feed, FeedConfig, ProtocolVariant};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    ExactSeq,
    Batched,
}

impl From<Variant> for ProtocolVariant {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::ExactSeq => ProtocolVariant::ExactSeq,
            Variant::Batched => ProtocolVariant::Batched,
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Tail a sequenced update log")]
struct Args {
    /// TOML feed configuration; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    base_url: Option<String>,

    #[arg(short, long, value_enum)]
    variant: Option<Variant>,

    /// Resume from this cursor instead of bootstrapping from a snapshot
    #[arg(long)]
    start_cursor: Option<u64>,

    /// Used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => FeedConfig::from_file(path)?,
        None => FeedConfig::default(),
    };
    if let Some(base_url) = args.base_url {
        config.transport.base_url = base_url;
    }
    if let Some(variant) = args.variant {
        config.variant = variant.into();
    }
    if args.start_cursor.is_some() {
        config.start_cursor = args.start_cursor;
    }
    config.validate()?;

    info!(
        base_url = %config.transport.base_url,
        variant = ?config.variant,
        "tailing update log"
    );

    let cancel = CancellationToken::new();
    let feed = Feed::connect(&config)?;
    let handle = feed.spawn(BookBuilder::with_boundary(config.boundary()), cancel.clone());

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, shutting down");
            ctrl_c_cancel.cancel();
        }
    });

    let outcome = handle.join().await?;

    let books = &outcome.consumer;
    for ticker in books.tickers() {
        if let Some(book) = books.book(ticker) {
            let fmt = |level: Option<(u64, u64)>| match level {
                Some((price, volume)) => {
                    format!("{:.4} x {:.4}", price_from_fixed(price), price_from_fixed(volume))
                }
                None => "-".to_string(),
            };
            println!("{:>10}  bid {:>24}  ask {:>24}", ticker, fmt(book.best_bid()), fmt(book.best_ask()));
        }
    }

    match outcome.result {
        Ok(summary) => {
            let stats = &summary.stats;
            println!(
                "stopped at cursor {} after {} epochs: {} events, {} polls ({} empty), {} snapshots, {} truncations, {} gaps",
                summary.cursor,
                summary.epoch,
                stats.events_delivered(),
                stats.polls(),
                stats.empty_polls(),
                stats.snapshots(),
                stats.truncations(),
                stats.gap_events()
            );
            if let Some(latency) = stats.poll_latency_stats() {
                println!(
                    "poll latency: p50 {}us, p99 {}us, max {}us",
                    latency.p50_us, latency.p99_us, latency.max_us
                );
            }
            Ok(())
        }
        Err(e) => {
            error!(cursor = e.cursor(), restartable = e.is_restartable(), "feed failed");
            Err(e.into())
        }
    }
}
