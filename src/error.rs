/// Feed error taxonomy
///
/// Transient faults never reach this level: the transport absorbs them and
/// the feed absorbs empty polls and truncations. What remains here is either
/// fatal or handed straight to the feed owner.

use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

use crate::decoder::DecodeError;
use crate::protocol::Seq;
use crate::transport::TransportError;

/// Failure of a single source operation (fetch or snapshot).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("unexpected {status} from {path}: {body}")]
    UnexpectedStatus {
        path: String,
        status: u16,
        body: String,
    },

    #[error("seq {0} cannot be expressed on the wire")]
    SeqOutOfRange(Seq),
}

impl SourceError {
    /// Malformed bodies are retried by the feed; everything else is fatal
    pub fn is_malformed(&self) -> bool {
        matches!(self, SourceError::Decode(_))
    }
}

/// Failure raised by a consumer callback.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConsumerError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ConsumerError {
    pub fn new(message: impl Into<String>) -> Self {
        ConsumerError {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        ConsumerError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Reason a feed terminated.
///
/// Every variant carries `cursor`: the next seq the feed would have
/// requested. Restarting from it (or from a fresh bootstrap) loses nothing.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("bootstrap snapshot failed: {source}")]
    Bootstrap {
        cursor: Seq,
        #[source]
        source: SourceError,
    },

    #[error("source failed at cursor {cursor}: {source}")]
    Source {
        cursor: Seq,
        #[source]
        source: SourceError,
    },

    #[error("{attempts} consecutive malformed responses at cursor {cursor}: {source}")]
    Malformed {
        cursor: Seq,
        attempts: u32,
        #[source]
        source: DecodeError,
    },

    #[error("resync gave up after {attempts} snapshots: needed cursor {required}, last snapshot at {state_seq:?}")]
    ResyncExhausted {
        cursor: Seq,
        attempts: u32,
        required: Seq,
        state_seq: Option<Seq>,
    },

    #[error("consumer rejected {} at cursor {cursor}: {source}", describe_seq(.seq))]
    Consumer {
        cursor: Seq,
        /// `None` when the rejected item was a snapshot
        seq: Option<Seq>,
        #[source]
        source: ConsumerError,
    },

    #[error("no successful exchange for {idle:?} at cursor {cursor}")]
    Stalled { cursor: Seq, idle: Duration },

    #[error("seq space exhausted at cursor {cursor}")]
    SeqOverflow { cursor: Seq },
}

fn describe_seq(seq: &Option<Seq>) -> String {
    match seq {
        Some(seq) => format!("event {}", seq),
        None => "snapshot".to_string(),
    }
}

impl FeedError {
    /// Last good cursor when the feed stopped
    pub fn cursor(&self) -> Seq {
        match self {
            FeedError::Bootstrap { cursor, .. }
            | FeedError::Source { cursor, .. }
            | FeedError::Malformed { cursor, .. }
            | FeedError::ResyncExhausted { cursor, .. }
            | FeedError::Consumer { cursor, .. }
            | FeedError::Stalled { cursor, .. }
            | FeedError::SeqOverflow { cursor } => *cursor,
        }
    }

    /// Whether restarting from BOOTSTRAP could plausibly succeed
    pub fn is_restartable(&self) -> bool {
        !matches!(self, FeedError::SeqOverflow { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_reported_for_every_variant() {
        let err = FeedError::Stalled {
            cursor: 17,
            idle: Duration::from_secs(30),
        };
        assert_eq!(err.cursor(), 17);

        let err = FeedError::Consumer {
            cursor: 5,
            seq: Some(5),
            source: ConsumerError::new("book rejected"),
        };
        assert_eq!(err.cursor(), 5);
        assert_eq!(err.to_string(), "consumer rejected event 5 at cursor 5: book rejected");
    }

    #[test]
    fn test_consumer_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = ConsumerError::with_source("persist failed", io);
        assert_eq!(err.message(), "persist failed");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_only_decode_errors_are_malformed() {
        let decode = SourceError::Decode(DecodeError::MissingField("updates"));
        assert!(decode.is_malformed());

        let status = SourceError::UnexpectedStatus {
            path: "/updates".to_string(),
            status: 404,
            body: String::new(),
        };
        assert!(!status.is_malformed());
    }

    #[test]
    fn test_overflow_is_not_restartable() {
        assert!(!FeedError::SeqOverflow { cursor: Seq::MAX }.is_restartable());
    }
}
