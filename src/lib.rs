/// Seq Feed - Sequenced Update Log Client
///
/// Tails a server-side, sequence-numbered update log over HTTP and hands
/// every event to a consumer exactly once per epoch, in order. Features
/// include:
/// - Retrying transport with capped exponential backoff
/// - Exact-seq and batched polling contracts behind one source interface
/// - Snapshot bootstrap and resync on log truncation or gaps
/// - Staleness watchdog and cooperative cancellation
/// - Reference order book consumer and bounded-queue consumer
/// - Feed statistics

pub mod protocol;
pub mod decoder;
pub mod config;
pub mod error;
pub mod transport;
pub mod source;
pub mod consumer;
pub mod book_builder;
pub mod gap_detector;
pub mod recovery;
pub mod feed;
pub mod stats;

pub use protocol::{PriceChange, Seq, Side, Snapshot, UpdateEvent};
pub use decoder::{Decoder, DecodeError};
pub use config::{BackoffPolicy, ConfigError, FeedConfig, GapPolicy, ProtocolVariant, SnapshotBoundary, TransportConfig};
pub use error::{ConsumerError, FeedError, SourceError};
pub use transport::{Backoff, HttpTransport, RawResponse, Request, StatusCategory, TransportError};
pub use source::{source_for, BatchedSource, ExactSeqSource, Fetch, UpdateSource};
pub use consumer::{channel, ChannelConsumer, Consumer, FeedItem};
pub use book_builder::{BookBuilder, BookDepth, OrderBook};
pub use gap_detector::GapDetector;
pub use recovery::RecoveryManager;
pub use feed::{Feed, FeedHandle, FeedOutcome, FeedState, FeedSummary};
pub use stats::{FeedStats, LatencyStats};

pub use tokio_util::sync::CancellationToken;
