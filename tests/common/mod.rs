#![allow(dead_code)]
// Scripted source and recording consumer shared by the feed tests

use std::collections::VecDeque;
use std::future::pending;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use seq_feed::{
    CancellationToken, Consumer, ConsumerError, DecodeError, Fetch, PriceChange, ProtocolVariant,
    Seq, Side, Snapshot, SourceError, UpdateEvent, UpdateSource,
};
use serde_json::json;

/// One scripted answer
pub enum Step<T> {
    Reply(T),
    Malformed,
    Status(u16),
    /// Never answers
    Hang,
}

#[derive(Debug, Default)]
pub struct SourceLog {
    /// Cursor of every fetch, in order
    pub cursors: Vec<Seq>,
    pub snapshots: usize,
}

/// Source that plays back canned answers.
///
/// Once the fetch script runs out it cancels `exhausted` and never answers,
/// so a feed under test stops cleanly right after the last scripted poll.
pub struct ScriptedSource {
    snapshots: Mutex<VecDeque<Step<Snapshot>>>,
    fetches: Mutex<VecDeque<Step<Fetch>>>,
    log: Arc<Mutex<SourceLog>>,
    exhausted: CancellationToken,
}

impl ScriptedSource {
    pub fn new(exhausted: CancellationToken) -> Self {
        ScriptedSource {
            snapshots: Mutex::new(VecDeque::new()),
            fetches: Mutex::new(VecDeque::new()),
            log: Arc::new(Mutex::new(SourceLog::default())),
            exhausted,
        }
    }

    pub fn with_snapshot(self, step: Step<Snapshot>) -> Self {
        self.snapshots.lock().unwrap().push_back(step);
        self
    }

    pub fn with_fetch(self, step: Step<Fetch>) -> Self {
        self.fetches.lock().unwrap().push_back(step);
        self
    }

    pub fn log(&self) -> Arc<Mutex<SourceLog>> {
        Arc::clone(&self.log)
    }

    async fn play<T>(&self, step: Option<Step<T>>, path: &str) -> Result<T, SourceError> {
        match step {
            Some(Step::Reply(value)) => Ok(value),
            Some(Step::Malformed) => Err(SourceError::Decode(DecodeError::MissingField("updates"))),
            Some(Step::Status(status)) => Err(SourceError::UnexpectedStatus {
                path: path.to_string(),
                status,
                body: String::new(),
            }),
            Some(Step::Hang) => pending().await,
            None => {
                self.exhausted.cancel();
                pending().await
            }
        }
    }
}

#[async_trait]
impl UpdateSource for ScriptedSource {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Batched
    }

    async fn snapshot(&self) -> Result<Snapshot, SourceError> {
        self.log.lock().unwrap().snapshots += 1;
        let step = self.snapshots.lock().unwrap().pop_front();
        self.play(step, "/snapshot").await
    }

    async fn fetch(&self, cursor: Seq) -> Result<Fetch, SourceError> {
        self.log.lock().unwrap().cursors.push(cursor);
        let step = self.fetches.lock().unwrap().pop_front();
        self.play(step, "/updates").await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Snapshot(Option<Seq>),
    Event(Seq),
}

#[derive(Debug, Default)]
pub struct RecordingConsumer {
    pub seen: Vec<Seen>,
    pub events: Vec<UpdateEvent>,
    /// Reject the event with this seq
    pub fail_on: Option<Seq>,
    /// Report done after this many events
    pub stop_after: Option<usize>,
}

impl RecordingConsumer {
    pub fn event_seqs(&self) -> Vec<Seq> {
        self.events.iter().map(|e| e.seq).collect()
    }
}

#[async_trait]
impl Consumer for RecordingConsumer {
    async fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), ConsumerError> {
        self.seen.push(Seen::Snapshot(snapshot.state_seq));
        Ok(())
    }

    async fn apply_event(&mut self, event: &UpdateEvent) -> Result<(), ConsumerError> {
        if self.fail_on == Some(event.seq) {
            return Err(ConsumerError::new(format!("refusing {}", event.seq)));
        }
        self.seen.push(Seen::Event(event.seq));
        self.events.push(event.clone());
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.stop_after.map_or(false, |n| self.events.len() >= n)
    }
}

pub fn event(seq: Seq, ticker: &str) -> UpdateEvent {
    UpdateEvent::new(
        seq,
        vec![PriceChange {
            ticker: ticker.to_string(),
            price: 100.0 + seq as f64,
            volume: 1.0,
            side: Side::Bid,
        }],
    )
}

/// Successful fetch carrying `seqs` in the given order
pub fn events(seqs: &[Seq]) -> Step<Fetch> {
    Step::Reply(Fetch::Events(seqs.iter().map(|&s| event(s, "A")).collect()))
}

pub fn empty() -> Step<Fetch> {
    Step::Reply(Fetch::Empty)
}

pub fn gone(min_available: Option<Seq>) -> Step<Fetch> {
    Step::Reply(Fetch::Gone { min_available })
}

pub fn snapshot_at(state_seq: Option<Seq>) -> Step<Snapshot> {
    Step::Reply(Snapshot::new(state_seq, json!({})))
}
