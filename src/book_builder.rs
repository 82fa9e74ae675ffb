/// Order book builder from snapshots and price changes
///
/// Keeps one aggregated price-level book per ticker. A snapshot replaces
/// every book; each price change overwrites the volume at one level, and a
/// zero volume removes the level. Prices and volumes are stored fixed-point
/// so levels compare exactly.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::config::SnapshotBoundary;
use crate::consumer::Consumer;
use crate::error::ConsumerError;
use crate::protocol::{price_to_fixed, PriceChange, Seq, Side, Snapshot, UpdateEvent};

/// Price-level book for one ticker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBook {
    // fixed-point price -> fixed-point volume
    bids: BTreeMap<u64, u64>,
    asks: BTreeMap<u64, u64>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the volume at one level; zero removes it
    pub fn set_level(&mut self, side: Side, price: u64, volume: u64) {
        let levels = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        if volume == 0 {
            levels.remove(&price);
        } else {
            levels.insert(price, volume);
        }
    }

    pub fn apply_change(&mut self, change: &PriceChange) {
        self.set_level(
            change.side,
            price_to_fixed(change.price),
            price_to_fixed(change.volume),
        );
    }

    /// Get best bid price and volume
    pub fn best_bid(&self) -> Option<(u64, u64)> {
        self.bids.iter().next_back().map(|(&price, &vol)| (price, vol))
    }

    /// Get best ask price and volume
    pub fn best_ask(&self) -> Option<(u64, u64)> {
        self.asks.iter().next().map(|(&price, &vol)| (price, vol))
    }

    /// Get spread (best ask - best bid) in fixed-point units
    pub fn spread(&self) -> Option<u64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) if bid < ask => Some(ask - bid),
            _ => None,
        }
    }

    /// Get market depth: top n levels on each side
    pub fn depth(&self, n: usize) -> BookDepth {
        let bids = self.bids.iter().rev().take(n).map(|(&p, &v)| (p, v)).collect();
        let asks = self.asks.iter().take(n).map(|(&p, &v)| (p, v)).collect();
        BookDepth { bids, asks }
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDepth {
    pub bids: Vec<(u64, u64)>,
    pub asks: Vec<(u64, u64)>,
}

// Snapshot payload shapes accepted on the wire.

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotState {
    Single {
        ticker: String,
        #[serde(flatten)]
        book: BookState,
    },
    Many(BTreeMap<String, BookState>),
}

#[derive(Deserialize)]
struct BookState {
    #[serde(default, alias = "bidVolumes")]
    bids: Levels,
    #[serde(default, alias = "askVolumes")]
    asks: Levels,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Levels {
    Pairs(Vec<(f64, f64)>),
    Objects(Vec<LevelObject>),
    Map(BTreeMap<String, f64>),
}

impl Default for Levels {
    fn default() -> Self {
        Levels::Pairs(Vec::new())
    }
}

#[derive(Deserialize)]
struct LevelObject {
    price: f64,
    volume: f64,
}

impl Levels {
    fn into_fixed(self) -> Result<Vec<(u64, u64)>, ConsumerError> {
        let pairs = match self {
            Levels::Pairs(pairs) => pairs,
            Levels::Objects(objects) => objects.into_iter().map(|l| (l.price, l.volume)).collect(),
            Levels::Map(map) => map
                .into_iter()
                .map(|(price, volume)| {
                    price
                        .parse::<f64>()
                        .map(|p| (p, volume))
                        .map_err(|_| ConsumerError::new(format!("invalid price level {:?}", price)))
                })
                .collect::<Result<_, _>>()?,
        };
        Ok(pairs
            .into_iter()
            .map(|(price, volume)| (price_to_fixed(price), price_to_fixed(volume)))
            .collect())
    }
}

impl BookState {
    fn into_book(self) -> Result<OrderBook, ConsumerError> {
        let mut book = OrderBook::new();
        for (price, volume) in self.bids.into_fixed()? {
            book.set_level(Side::Bid, price, volume);
        }
        for (price, volume) in self.asks.into_fixed()? {
            book.set_level(Side::Ask, price, volume);
        }
        Ok(book)
    }
}

/// Parse a snapshot payload into per-ticker books
pub fn parse_books(state: &Value) -> Result<BTreeMap<String, OrderBook>, ConsumerError> {
    let parsed = SnapshotState::deserialize(state)
        .map_err(|e| ConsumerError::with_source("unrecognised snapshot payload", e))?;

    let mut books = BTreeMap::new();
    match parsed {
        SnapshotState::Single { ticker, book } => {
            books.insert(ticker, book.into_book()?);
        }
        SnapshotState::Many(map) => {
            for (ticker, book) in map {
                books.insert(ticker, book.into_book()?);
            }
        }
    }
    Ok(books)
}

/// Consumer that maintains order books for every ticker on the feed
#[derive(Debug, Clone, Default)]
pub struct BookBuilder {
    books: BTreeMap<String, OrderBook>,
    boundary: SnapshotBoundary,
    last_seq: Option<Seq>,
    events_applied: u64,
}

impl BookBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret snapshot seqs the same way the feed does
    pub fn with_boundary(boundary: SnapshotBoundary) -> Self {
        BookBuilder {
            boundary,
            ..Self::default()
        }
    }

    pub fn book(&self, ticker: &str) -> Option<&OrderBook> {
        self.books.get(ticker)
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.books.keys().map(String::as_str)
    }

    /// Seq the books reflect; `None` before any event or a non-empty snapshot
    pub fn last_seq(&self) -> Option<Seq> {
        self.last_seq
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }
}

#[async_trait]
impl Consumer for BookBuilder {
    async fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), ConsumerError> {
        self.books = parse_books(&snapshot.state)?;
        self.last_seq = match self.boundary {
            SnapshotBoundary::Inclusive => snapshot.state_seq,
            SnapshotBoundary::Exclusive => snapshot.state_seq.and_then(|seq| seq.checked_sub(1)),
        };
        Ok(())
    }

    async fn apply_event(&mut self, event: &UpdateEvent) -> Result<(), ConsumerError> {
        if let Some(last) = self.last_seq {
            if event.seq <= last {
                return Err(ConsumerError::new(format!(
                    "event {} is not after applied seq {}",
                    event.seq, last
                )));
            }
        }

        for change in &event.price_changes {
            self.books
                .entry(change.ticker.clone())
                .or_default()
                .apply_change(change);
        }
        self.last_seq = Some(event.seq);
        self.events_applied += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_book() {
        let book = OrderBook::new();
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.spread(), None);
        assert!(book.is_empty());
    }

    #[test]
    fn test_depth() {
        let book = OrderBook::new();
        let depth = book.depth(5);
        assert_eq!(depth.bids.len(), 0);
        assert_eq!(depth.asks.len(), 0);
    }

    #[test]
    fn test_parse_level_shapes() {
        let books = parse_books(&json!({
            "A": {"bids": [[100.0, 5.0]], "asks": [{"price": 101.0, "volume": 2.0}]},
            "B": {"bidVolumes": {"99.5": 1.0}, "askVolumes": {}}
        }))
        .unwrap();

        assert_eq!(books["A"].best_bid(), Some((price_to_fixed(100.0), price_to_fixed(5.0))));
        assert_eq!(books["A"].best_ask(), Some((price_to_fixed(101.0), price_to_fixed(2.0))));
        assert_eq!(books["B"].best_bid(), Some((price_to_fixed(99.5), price_to_fixed(1.0))));
        assert_eq!(books["B"].ask_levels(), 0);
    }

    #[test]
    fn test_parse_rejects_unknown_payload() {
        assert!(parse_books(&json!("not a book")).is_err());
    }
}
