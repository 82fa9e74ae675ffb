/// Feed statistics tracking
///
/// Counts polls, deliveries, duplicates, resyncs and gaps, and keeps rolling
/// windows of poll and delivery latency.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::info;

const WINDOW_SIZE: usize = 10000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p99_us: u64,
}

#[derive(Debug, Clone)]
pub struct FeedStats {
    start_time: Option<Instant>,

    polls: u64,
    empty_polls: u64,
    events_delivered: u64,
    duplicates_dropped: u64,
    snapshots: u64,
    truncations: u64,
    malformed: u64,

    // Gap tracking
    total_gaps: u64,
    gap_events: u64,

    // Latencies in microseconds
    poll_latencies: VecDeque<u64>,
    delivery_latencies: VecDeque<u64>,
}

impl FeedStats {
    pub fn new() -> Self {
        FeedStats {
            start_time: None,
            polls: 0,
            empty_polls: 0,
            events_delivered: 0,
            duplicates_dropped: 0,
            snapshots: 0,
            truncations: 0,
            malformed: 0,
            total_gaps: 0,
            gap_events: 0,
            poll_latencies: VecDeque::with_capacity(WINDOW_SIZE),
            delivery_latencies: VecDeque::with_capacity(WINDOW_SIZE),
        }
    }

    /// Record a successful poll and how long it took
    pub fn record_poll(&mut self, latency: Duration) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
        self.polls += 1;
        push_window(&mut self.poll_latencies, latency);
    }

    pub fn record_empty_poll(&mut self) {
        self.empty_polls += 1;
    }

    /// Record one event handed to the consumer
    pub fn record_delivery(&mut self, latency: Duration) {
        self.events_delivered += 1;
        push_window(&mut self.delivery_latencies, latency);
    }

    pub fn record_duplicates(&mut self, count: u64) {
        self.duplicates_dropped += count;
    }

    pub fn record_snapshot(&mut self) {
        self.snapshots += 1;
    }

    /// The server reported the log pruned past the cursor
    pub fn record_truncation(&mut self) {
        self.truncations += 1;
    }

    pub fn record_malformed(&mut self) {
        self.malformed += 1;
    }

    /// Record a gap event
    pub fn record_gap(&mut self, gap_size: u64) {
        self.total_gaps = self.total_gaps.saturating_add(gap_size);
        self.gap_events += 1;
    }

    /// Get events delivered per second since the first poll
    pub fn events_per_sec(&self) -> f64 {
        match self.start_time {
            None => 0.0,
            Some(start) => {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    self.events_delivered as f64 / elapsed
                } else {
                    0.0
                }
            }
        }
    }

    pub fn poll_latency_stats(&self) -> Option<LatencyStats> {
        latency_stats(&self.poll_latencies)
    }

    pub fn delivery_latency_stats(&self) -> Option<LatencyStats> {
        latency_stats(&self.delivery_latencies)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.start_time.map(|st| st.elapsed())
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn empty_polls(&self) -> u64 {
        self.empty_polls
    }

    pub fn events_delivered(&self) -> u64 {
        self.events_delivered
    }

    pub fn duplicates_dropped(&self) -> u64 {
        self.duplicates_dropped
    }

    pub fn snapshots(&self) -> u64 {
        self.snapshots
    }

    pub fn truncations(&self) -> u64 {
        self.truncations
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Get total missing seqs
    pub fn total_gaps(&self) -> u64 {
        self.total_gaps
    }

    /// Get number of gap events
    pub fn gap_events(&self) -> u64 {
        self.gap_events
    }

    /// Reset all statistics
    /// Emit a statistics summary through tracing
    pub fn log_summary(&self) {
        info!(
            polls = self.polls,
            empty_polls = self.empty_polls,
            events = self.events_delivered,
            duplicates = self.duplicates_dropped,
            snapshots = self.snapshots,
            truncations = self.truncations,
            malformed = self.malformed,
            gaps = self.total_gaps,
            gap_events = self.gap_events,
            events_per_sec = format_args!("{:.2}", self.events_per_sec()),
            "feed statistics"
        );

        if let Some(stats) = self.poll_latency_stats() {
            info!(
                min_us = stats.min_us,
                max_us = stats.max_us,
                mean_us = format_args!("{:.2}", stats.mean_us),
                p50_us = stats.p50_us,
                p99_us = stats.p99_us,
                "poll latency"
            );
        }

        if let Some(stats) = self.delivery_latency_stats() {
            info!(
                min_us = stats.min_us,
                max_us = stats.max_us,
                mean_us = format_args!("{:.2}", stats.mean_us),
                p50_us = stats.p50_us,
                p99_us = stats.p99_us,
                "delivery latency"
            );
        }
    }
}

impl Default for FeedStats {
    fn default() -> Self {
        Self::new()
    }
}

fn push_window(window: &mut VecDeque<u64>, latency: Duration) {
    if window.len() >= WINDOW_SIZE {
        window.pop_front();
    }
    window.push_back(latency.as_micros().min(u64::MAX as u128) as u64);
}

fn latency_stats(window: &VecDeque<u64>) -> Option<LatencyStats> {
    if window.is_empty() {
        return None;
    }

    let mut sorted: Vec<u64> = window.iter().copied().collect();
    sorted.sort_unstable();

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let mean = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
    let p50 = sorted[sorted.len() / 2];
    let p99 = sorted[(sorted.len() * 99) / 100];

    Some(LatencyStats {
        min_us: min,
        max_us: max,
        mean_us: mean,
        p50_us: p50,
        p99_us: p99,
    })
}
