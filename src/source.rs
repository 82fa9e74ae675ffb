//! Update sources.
//!
//! The feed only ever asks two questions: "give me a snapshot" and "what is
//! there at or after this cursor". Each wire contract answers them in its own
//! way; [`UpdateSource`] hides the difference behind [`Fetch`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{EndpointPaths, FeedConfig, ProtocolVariant, SnapshotBoundary};
use crate::decoder::{Decoder, GoneReason};
use crate::error::SourceError;
use crate::protocol::{Seq, Snapshot, UpdateEvent, INVALID_SEQ_NUM};
use crate::transport::{HttpTransport, RawResponse, Request};

/// Outcome of one poll at a cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch {
    /// Nothing at or after the cursor yet
    Empty,
    /// Events as received; may be unordered or contain duplicates
    Events(Vec<UpdateEvent>),
    /// The log was pruned past the cursor
    Gone { min_available: Option<Seq> },
}

#[async_trait]
pub trait UpdateSource: Send + Sync {
    fn variant(&self) -> ProtocolVariant;

    /// Current full state
    async fn snapshot(&self) -> Result<Snapshot, SourceError>;

    /// Events with seq >= `cursor`
    async fn fetch(&self, cursor: Seq) -> Result<Fetch, SourceError>;
}

/// Build the source matching the configured wire contract
pub fn source_for(config: &FeedConfig, transport: HttpTransport) -> Box<dyn UpdateSource> {
    let paths = config.paths.clone();
    match config.variant {
        ProtocolVariant::ExactSeq => {
            Box::new(ExactSeqSource::new(transport, paths, config.boundary()))
        }
        ProtocolVariant::Batched => Box::new(BatchedSource::new(transport, paths)),
    }
}

async fn fetch_snapshot(
    transport: &HttpTransport,
    paths: &EndpointPaths,
) -> Result<Snapshot, SourceError> {
    let request = Request::post(paths.snapshot.as_str()).json(json!({}));
    let response = transport.execute(&request).await?;
    if response.status != StatusCode::OK {
        return Err(unexpected(&paths.snapshot, &response));
    }
    Ok(Decoder::snapshot(&response.body)?)
}

fn unexpected(path: &str, response: &RawResponse) -> SourceError {
    SourceError::UnexpectedStatus {
        path: path.to_string(),
        status: response.status.as_u16(),
        body: response.body_excerpt(),
    }
}

/// `GET updates?seq=N`: exactly one event per request.
///
/// The server answers a missing seq with error code 8 whether the seq is
/// not produced yet or already pruned. `latestSeq` tells the two apart,
/// read through the same boundary as the snapshot's seq. A `latestSeq` of
/// `0` is the empty-log sentinel.
#[derive(Debug, Clone)]
pub struct ExactSeqSource {
    transport: HttpTransport,
    paths: EndpointPaths,
    boundary: SnapshotBoundary,
}

enum Poll {
    Found(UpdateEvent),
    Missing,
}

impl ExactSeqSource {
    pub fn new(transport: HttpTransport, paths: EndpointPaths, boundary: SnapshotBoundary) -> Self {
        ExactSeqSource {
            transport,
            paths,
            boundary,
        }
    }

    /// Server's `latestSeq`; `None` while the log is empty
    pub async fn latest_seq(&self) -> Result<Option<Seq>, SourceError> {
        let request = Request::get(self.paths.latest_seq.as_str());
        let response = self.transport.execute(&request).await?;
        if response.status != StatusCode::OK {
            return Err(unexpected(&self.paths.latest_seq, &response));
        }
        Ok(non_zero(Decoder::latest_seq(&response.body)?))
    }

    /// Whether `seq` exists on a server reporting `latest`
    fn produced(&self, seq: Seq, latest: Seq) -> bool {
        match self.boundary {
            SnapshotBoundary::Inclusive => seq <= latest,
            SnapshotBoundary::Exclusive => seq < latest,
        }
    }

    async fn poll(&self, seq: Seq) -> Result<Poll, SourceError> {
        let request = Request::get(self.paths.updates.as_str()).query("seq", seq);
        let response = self.transport.execute(&request).await?;

        match response.status {
            StatusCode::OK => Ok(Poll::Found(Decoder::update(&response.body)?)),
            StatusCode::BAD_REQUEST => match Decoder::error_code(&response.body)? {
                Some(INVALID_SEQ_NUM) => Ok(Poll::Missing),
                _ => Err(unexpected(&self.paths.updates, &response)),
            },
            _ => Err(unexpected(&self.paths.updates, &response)),
        }
    }
}

#[async_trait]
impl UpdateSource for ExactSeqSource {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::ExactSeq
    }

    async fn snapshot(&self) -> Result<Snapshot, SourceError> {
        let mut snapshot = fetch_snapshot(&self.transport, &self.paths).await?;
        snapshot.state_seq = non_zero(snapshot.state_seq);
        Ok(snapshot)
    }

    async fn fetch(&self, cursor: Seq) -> Result<Fetch, SourceError> {
        if let Poll::Found(event) = self.poll(cursor).await? {
            return Ok(Fetch::Events(vec![event]));
        }

        match self.latest_seq().await? {
            Some(latest) if self.produced(cursor, latest) => {}
            latest => {
                debug!(cursor, ?latest, "seq not produced yet");
                return Ok(Fetch::Empty);
            }
        }

        // Already produced: it may have been published between the two
        // requests, so ask once more before declaring it pruned.
        match self.poll(cursor).await? {
            Poll::Found(event) => Ok(Fetch::Events(vec![event])),
            Poll::Missing => {
                warn!(cursor, "seq below latest is missing, treating as pruned");
                Ok(Fetch::Gone { min_available: None })
            }
        }
    }
}

fn non_zero(seq: Option<Seq>) -> Option<Seq> {
    seq.filter(|&seq| seq != 0)
}

/// `GET updates?fromExclusive=N`: every retained event after N.
#[derive(Debug, Clone)]
pub struct BatchedSource {
    transport: HttpTransport,
    paths: EndpointPaths,
}

impl BatchedSource {
    pub fn new(transport: HttpTransport, paths: EndpointPaths) -> Self {
        BatchedSource { transport, paths }
    }
}

#[async_trait]
impl UpdateSource for BatchedSource {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Batched
    }

    async fn snapshot(&self) -> Result<Snapshot, SourceError> {
        fetch_snapshot(&self.transport, &self.paths).await
    }

    async fn fetch(&self, cursor: Seq) -> Result<Fetch, SourceError> {
        let from_exclusive = i64::try_from(cursor)
            .map(|c| c - 1)
            .map_err(|_| SourceError::SeqOutOfRange(cursor))?;
        let request =
            Request::get(self.paths.updates.as_str()).query("fromExclusive", from_exclusive);
        let response = self.transport.execute(&request).await?;

        match response.status {
            StatusCode::OK => {
                let events = Decoder::batch(&response.body)?;
                if events.is_empty() {
                    Ok(Fetch::Empty)
                } else {
                    Ok(Fetch::Events(events))
                }
            }
            StatusCode::GONE => match Decoder::gone(&response.body)? {
                GoneReason::LogEmpty => Ok(Fetch::Empty),
                GoneReason::TooOld { min_available } => Ok(Fetch::Gone { min_available }),
                GoneReason::Unknown(reason) => {
                    warn!(cursor, %reason, "unrecognised gone reason");
                    Ok(Fetch::Gone { min_available: None })
                }
            },
            _ => Err(unexpected(&self.paths.updates, &response)),
        }
    }
}
