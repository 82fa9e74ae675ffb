/// JSON wire format of the sequenced update log
///
/// Every update the server publishes carries a `seq`: a strictly increasing
/// position in the log. Snapshots carry the seq they are valid at. Two
/// polling contracts exist on the wire (exact-seq and batched); both share
/// the event and snapshot shapes defined here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Position of an event in the server's update log.
pub type Seq = u64;

/// Error code the exact-seq endpoint uses for "no update at this seq".
pub const INVALID_SEQ_NUM: i64 = 8;

/// Batched endpoint: the requested lower bound is below the retention window.
pub const FROM_TOO_OLD: &str = "from-too-old";

/// Batched endpoint: the log holds no entries yet.
pub const MIN_SEQ_UNAVAILABLE: &str = "min-seq-unavailable";

const FIXED_SCALE: f64 = 1e8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[serde(alias = "bid", alias = "Bid")]
    Bid,
    #[serde(alias = "ask", alias = "Ask")]
    Ask,
}

/// New aggregate volume at one price level of one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub ticker: String,
    pub price: f64,
    pub volume: f64,
    pub side: Side,
}

/// One delta from the update log.
///
/// Fields the client does not interpret are kept in `extra` so consumers
/// can still reach them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    #[serde(alias = "updateId")]
    pub seq: Seq,
    pub price_changes: Vec<PriceChange>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UpdateEvent {
    pub fn new(seq: Seq, price_changes: Vec<PriceChange>) -> Self {
        UpdateEvent {
            seq,
            price_changes,
            extra: Map::new(),
        }
    }

    /// Whether any price change in this event touches `ticker`
    pub fn touches(&self, ticker: &str) -> bool {
        self.price_changes.iter().any(|c| c.ticker == ticker)
    }
}

/// Full-state recovery point.
///
/// `state_seq` is `None` when the server reported the empty-log sentinel:
/// the state reflects no events at all.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state_seq: Option<Seq>,
    pub state: Value,
}

impl Snapshot {
    pub fn new(state_seq: Option<Seq>, state: Value) -> Self {
        Snapshot { state_seq, state }
    }

    pub fn is_empty_log(&self) -> bool {
        self.state_seq.is_none()
    }
}

/// Map a signed wire seq to the client's representation; negatives are sentinels.
pub fn seq_from_wire(raw: i64) -> Option<Seq> {
    Seq::try_from(raw).ok()
}

/// Convert price from fixed-point to float
pub fn price_from_fixed(fixed: u64) -> f64 {
    fixed as f64 / FIXED_SCALE
}

/// Convert price (or volume) to fixed-point, rounding to the nearest unit
pub fn price_to_fixed(price: f64) -> u64 {
    if price <= 0.0 {
        return 0;
    }
    (price * FIXED_SCALE).round() as u64
}
