//! Sequenced feed client.
//!
//! One [`Feed`] owns one cursor and walks it through the update log:
//!
//! ```text
//! BOOTSTRAP --snapshot--> STREAMING --gone / gap--> RESYNCING
//!                             ^                         |
//!                             +--------snapshot---------+
//! ```
//!
//! Any state may move to TERMINATED on cancellation, a finished consumer,
//! or an unrecoverable error. The cursor only moves forward: after a
//! delivered event it becomes `seq + 1`, after an accepted snapshot it
//! becomes the snapshot's next cursor, which is never behind the old one.

use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{BackoffPolicy, FeedConfig, GapPolicy};
use crate::consumer::Consumer;
use crate::decoder::DecodeError;
use crate::error::{FeedError, SourceError};
use crate::gap_detector::GapDetector;
use crate::protocol::{Seq, Snapshot, UpdateEvent};
use crate::recovery::{RecoveryManager, SnapshotCheck};
use crate::source::{source_for, Fetch, UpdateSource};
use crate::stats::FeedStats;
use crate::transport::{HttpTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Bootstrap,
    Streaming,
    Resyncing,
    Terminated,
}

/// Where a cleanly stopped feed left off.
#[derive(Debug, Clone)]
pub struct FeedSummary {
    /// Next seq to request; a warm restart resumes here
    pub cursor: Seq,
    pub epoch: u64,
    pub stats: FeedStats,
}

enum Flow {
    Continue,
    Cancelled,
}

pub struct Feed {
    source: Box<dyn UpdateSource>,
    state: FeedState,
    cursor: Seq,
    epoch: u64,
    recovery: RecoveryManager,
    gaps: GapDetector,
    stats: FeedStats,
    gap_policy: GapPolicy,
    poll_interval: Duration,
    staleness_timeout: Duration,
    malformed_backoff: BackoffPolicy,
    max_malformed_retries: u32,
    malformed_streak: u32,
    last_progress: Instant,
}

impl Feed {
    pub fn new(source: Box<dyn UpdateSource>, config: &FeedConfig) -> Self {
        let mut recovery =
            RecoveryManager::new(config.boundary(), config.max_resync_attempts);
        let mut gaps = GapDetector::new();

        let (state, cursor) = match config.start_cursor {
            Some(cursor) => {
                gaps.anchor(cursor);
                (FeedState::Streaming, cursor)
            }
            None => {
                recovery.begin(0, None);
                (FeedState::Bootstrap, 0)
            }
        };

        Feed {
            source,
            state,
            cursor,
            epoch: 0,
            recovery,
            gaps,
            stats: FeedStats::new(),
            gap_policy: config.gap_policy,
            poll_interval: config.poll_interval(),
            staleness_timeout: config.staleness_timeout(),
            malformed_backoff: config.transport.backoff.clone(),
            max_malformed_retries: config.max_malformed_retries,
            malformed_streak: 0,
            last_progress: Instant::now(),
        }
    }

    /// Build the HTTP transport and the configured source, then the feed
    pub fn connect(config: &FeedConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self::new(source_for(config, transport), config))
    }

    pub fn cursor(&self) -> Seq {
        self.cursor
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Snapshots applied so far; a new epoch starts with each one
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    pub fn gaps(&self) -> &GapDetector {
        &self.gaps
    }

    /// Drive the feed until cancelled, the consumer is done, or a fatal error
    pub async fn run<C>(
        &mut self,
        consumer: &mut C,
        cancel: &CancellationToken,
    ) -> Result<FeedSummary, FeedError>
    where
        C: Consumer + ?Sized,
    {
        info!(
            variant = ?self.source.variant(),
            state = ?self.state,
            cursor = self.cursor,
            "feed starting"
        );
        self.last_progress = Instant::now();

        let result = self.drive(consumer, cancel).await;
        self.state = FeedState::Terminated;

        match &result {
            Ok(()) => info!(cursor = self.cursor, epoch = self.epoch, "feed stopped"),
            Err(e) => error!(cursor = e.cursor(), error = %e, "feed terminated"),
        }
        self.stats.log_summary();

        result.map(|()| FeedSummary {
            cursor: self.cursor,
            epoch: self.epoch,
            stats: self.stats.clone(),
        })
    }

    /// Run on a background task owning both the feed and the consumer
    pub fn spawn<C>(mut self, mut consumer: C, cancel: CancellationToken) -> FeedHandle<C>
    where
        C: Consumer + 'static,
    {
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let result = self.run(&mut consumer, &token).await;
            FeedOutcome { consumer, result }
        });
        FeedHandle { cancel, task }
    }

    async fn drive<C>(&mut self, consumer: &mut C, cancel: &CancellationToken) -> Result<(), FeedError>
    where
        C: Consumer + ?Sized,
    {
        loop {
            if cancel.is_cancelled() || consumer.is_done() {
                return Ok(());
            }

            let flow = match self.state {
                FeedState::Bootstrap | FeedState::Resyncing => self.recover(consumer, cancel).await?,
                FeedState::Streaming => self.stream(consumer, cancel).await?,
                FeedState::Terminated => return Ok(()),
            };

            if let Flow::Cancelled = flow {
                return Ok(());
            }
        }
    }

    async fn recover<C>(&mut self, consumer: &mut C, cancel: &CancellationToken) -> Result<Flow, FeedError>
    where
        C: Consumer + ?Sized,
    {
        let snapshot = match self.guard(cancel, self.source.snapshot()).await? {
            None => return Ok(Flow::Cancelled),
            Some(Ok(snapshot)) => snapshot,
            Some(Err(SourceError::Decode(e))) => return self.malformed(e, cancel).await,
            Some(Err(e)) => return Err(self.source_failure(e)),
        };
        self.touch();

        match self.recovery.check(&snapshot) {
            SnapshotCheck::Accepted { cursor } => {
                self.apply_snapshot(consumer, &snapshot, cursor).await?;
                Ok(Flow::Continue)
            }
            SnapshotCheck::Stale { cursor, required } => {
                warn!(
                    snapshot_cursor = cursor,
                    required,
                    attempt = self.recovery.attempts(),
                    "snapshot behind the log, retrying"
                );
                self.idle(cancel).await
            }
            SnapshotCheck::Exhausted { required, .. } => Err(FeedError::ResyncExhausted {
                cursor: self.cursor,
                attempts: self.recovery.attempts(),
                required,
                state_seq: snapshot.state_seq,
            }),
            SnapshotCheck::Overflow => Err(FeedError::SeqOverflow { cursor: self.cursor }),
        }
    }

    async fn apply_snapshot<C>(
        &mut self,
        consumer: &mut C,
        snapshot: &Snapshot,
        cursor: Seq,
    ) -> Result<(), FeedError>
    where
        C: Consumer + ?Sized,
    {
        consumer
            .apply_snapshot(snapshot)
            .await
            .map_err(|source| FeedError::Consumer {
                cursor: self.cursor,
                seq: None,
                source,
            })?;

        let from = self.state;
        self.cursor = cursor;
        self.epoch += 1;
        self.gaps.anchor(cursor);
        self.stats.record_snapshot();
        self.state = FeedState::Streaming;
        self.touch();

        info!(
            ?from,
            state_seq = ?snapshot.state_seq,
            cursor,
            epoch = self.epoch,
            "snapshot applied, streaming"
        );
        Ok(())
    }

    async fn stream<C>(&mut self, consumer: &mut C, cancel: &CancellationToken) -> Result<Flow, FeedError>
    where
        C: Consumer + ?Sized,
    {
        let cursor = self.cursor;
        let started = Instant::now();

        let fetched = match self.guard(cancel, self.source.fetch(cursor)).await? {
            None => return Ok(Flow::Cancelled),
            Some(Ok(fetched)) => fetched,
            Some(Err(SourceError::Decode(e))) => return self.malformed(e, cancel).await,
            Some(Err(e)) => return Err(self.source_failure(e)),
        };
        self.touch();
        self.stats.record_poll(started.elapsed());

        match fetched {
            Fetch::Empty => {
                self.stats.record_empty_poll();
                self.idle(cancel).await
            }
            Fetch::Gone { min_available } => {
                self.stats.record_truncation();
                warn!(cursor, ?min_available, "log pruned past cursor, resyncing");
                self.begin_resync(min_available);
                Ok(Flow::Continue)
            }
            Fetch::Events(events) => self.deliver(consumer, events, cancel).await,
        }
    }

    async fn deliver<C>(
        &mut self,
        consumer: &mut C,
        mut events: Vec<UpdateEvent>,
        cancel: &CancellationToken,
    ) -> Result<Flow, FeedError>
    where
        C: Consumer + ?Sized,
    {
        let received = events.len();
        events.sort_by_key(|event| event.seq);
        events.dedup_by_key(|event| event.seq);
        let cursor = self.cursor;
        events.retain(|event| event.seq >= cursor);

        let dropped = received - events.len();
        if dropped > 0 {
            debug!(cursor, dropped, "dropped already delivered events");
            self.stats.record_duplicates(dropped as u64);
        }
        if events.is_empty() {
            self.stats.record_empty_poll();
            return self.idle(cancel).await;
        }

        for event in &events {
            if cancel.is_cancelled() || consumer.is_done() {
                return Ok(Flow::Cancelled);
            }

            if let Some((start, end)) = self.gaps.process(event.seq) {
                self.stats.record_gap(end - start + 1);
                match self.gap_policy {
                    GapPolicy::Resync => {
                        warn!(cursor = self.cursor, missing_from = start, missing_to = end, "gap in update log, resyncing");
                        self.begin_resync(Some(event.seq));
                        return Ok(Flow::Continue);
                    }
                    GapPolicy::Skip => {
                        warn!(cursor = self.cursor, missing_from = start, missing_to = end, "gap in update log, skipping");
                    }
                }
            }

            let started = Instant::now();
            consumer
                .apply_event(event)
                .await
                .map_err(|source| FeedError::Consumer {
                    cursor: self.cursor,
                    seq: Some(event.seq),
                    source,
                })?;
            self.stats.record_delivery(started.elapsed());

            self.cursor = event
                .seq
                .checked_add(1)
                .ok_or(FeedError::SeqOverflow { cursor: self.cursor })?;
            self.touch();
        }

        debug!(cursor = self.cursor, delivered = events.len(), "batch delivered");
        Ok(Flow::Continue)
    }

    fn begin_resync(&mut self, min_available: Option<Seq>) {
        self.recovery.begin(self.cursor, min_available);
        self.state = FeedState::Resyncing;
    }

    async fn malformed(&mut self, error: DecodeError, cancel: &CancellationToken) -> Result<Flow, FeedError> {
        self.malformed_streak += 1;
        self.stats.record_malformed();

        if self.malformed_streak > self.max_malformed_retries {
            return Err(FeedError::Malformed {
                cursor: self.cursor,
                attempts: self.malformed_streak,
                source: error,
            });
        }

        let delay = self.malformed_backoff.delay_for(self.malformed_streak - 1);
        warn!(
            cursor = self.cursor,
            streak = self.malformed_streak,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "malformed response, retrying"
        );
        match self.guard(cancel, sleep(delay)).await? {
            Some(()) => Ok(Flow::Continue),
            None => Ok(Flow::Cancelled),
        }
    }

    async fn idle(&self, cancel: &CancellationToken) -> Result<Flow, FeedError> {
        match self.guard(cancel, sleep(self.poll_interval)).await? {
            Some(()) => Ok(Flow::Continue),
            None => Ok(Flow::Cancelled),
        }
    }

    /// Race `fut` against cancellation and the staleness deadline.
    ///
    /// `Ok(None)` means cancelled; the dropped future aborts any request in
    /// flight.
    async fn guard<F>(&self, cancel: &CancellationToken, fut: F) -> Result<Option<F::Output>, FeedError>
    where
        F: Future,
    {
        let deadline = self.last_progress + self.staleness_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            _ = sleep_until(deadline) => Err(FeedError::Stalled {
                cursor: self.cursor,
                idle: self.last_progress.elapsed(),
            }),
            output = fut => Ok(Some(output)),
        }
    }

    fn touch(&mut self) {
        self.last_progress = Instant::now();
        self.malformed_streak = 0;
    }

    fn source_failure(&self, source: SourceError) -> FeedError {
        match self.state {
            FeedState::Bootstrap => FeedError::Bootstrap {
                cursor: self.cursor,
                source,
            },
            _ => FeedError::Source {
                cursor: self.cursor,
                source,
            },
        }
    }
}

/// What a spawned feed hands back: the consumer and how the feed ended.
#[derive(Debug)]
pub struct FeedOutcome<C> {
    pub consumer: C,
    pub result: Result<FeedSummary, FeedError>,
}

/// Handle to a feed running on its own task.
pub struct FeedHandle<C> {
    cancel: CancellationToken,
    task: JoinHandle<FeedOutcome<C>>,
}

impl<C> FeedHandle<C> {
    /// Ask the feed to stop at its next suspension point
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the feed to end on its own
    pub async fn join(self) -> Result<FeedOutcome<C>, JoinError> {
        self.task.await
    }

    /// Cancel and wait
    pub async fn shutdown(self) -> Result<FeedOutcome<C>, JoinError> {
        self.cancel();
        self.join().await
    }
}
