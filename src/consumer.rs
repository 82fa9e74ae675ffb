//! Consumer interface.
//!
//! The feed calls a [`Consumer`] inline, one item at a time, in seq order.
//! A slow consumer therefore throttles polling. When that is unwanted,
//! [`channel`] hands items to a bounded queue and lets another task drain it.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ConsumerError;
use crate::protocol::{Seq, Snapshot, UpdateEvent};

#[async_trait]
pub trait Consumer: Send {
    /// Replace all state with `snapshot`
    async fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), ConsumerError>;

    /// Apply one delta; the feed does not advance past it on error
    async fn apply_event(&mut self, event: &UpdateEvent) -> Result<(), ConsumerError>;

    /// Checked before every poll; returning true ends the feed cleanly
    fn is_done(&self) -> bool {
        false
    }
}

#[async_trait]
impl<C: Consumer + ?Sized> Consumer for Box<C> {
    async fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), ConsumerError> {
        (**self).apply_snapshot(snapshot).await
    }

    async fn apply_event(&mut self, event: &UpdateEvent) -> Result<(), ConsumerError> {
        (**self).apply_event(event).await
    }

    fn is_done(&self) -> bool {
        (**self).is_done()
    }
}

/// Item delivered through a [`ChannelConsumer`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Snapshot(Snapshot),
    Event(UpdateEvent),
}

impl FeedItem {
    /// Seq the item brings the receiver up to
    pub fn seq(&self) -> Option<Seq> {
        match self {
            FeedItem::Snapshot(snapshot) => snapshot.state_seq,
            FeedItem::Event(event) => Some(event.seq),
        }
    }
}

/// Forwards every item into a bounded queue.
///
/// A full queue blocks the feed until the receiver catches up. A receiver
/// dropped between items ends the feed cleanly at its next poll. One
/// dropped while a send is blocked fails that item, so the feed stops with
/// a consumer error and the cursor still on the undelivered seq.
#[derive(Debug)]
pub struct ChannelConsumer {
    tx: mpsc::Sender<FeedItem>,
}

/// Bounded queue pair; `capacity` must be non-zero
pub fn channel(capacity: usize) -> (ChannelConsumer, mpsc::Receiver<FeedItem>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelConsumer { tx }, rx)
}

impl ChannelConsumer {
    async fn forward(&mut self, item: FeedItem) -> Result<(), ConsumerError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| ConsumerError::new("feed receiver dropped"))
    }
}

#[async_trait]
impl Consumer for ChannelConsumer {
    async fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), ConsumerError> {
        self.forward(FeedItem::Snapshot(snapshot.clone())).await
    }

    async fn apply_event(&mut self, event: &UpdateEvent) -> Result<(), ConsumerError> {
        self.forward(FeedItem::Event(event.clone())).await
    }

    fn is_done(&self) -> bool {
        self.tx.is_closed()
    }
}
