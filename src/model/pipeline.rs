use std::sync::Arc;
use std::time::Duration;

use super::history::{HistoricalDataPoint, HistoryBuffer};
use super::rate::{RateTracker, elapsed_seconds, per_second};
use crate::system::snapshot::Snapshot;

/// Derivation state carried from one sampling cycle to the next.
///
/// The history is published as an `Arc`: readers keep whatever buffer they
/// grabbed, and `ingest` copies on write if a reader still holds the old one.
/// The copy shares every existing point with the reader's buffer.
#[derive(Debug)]
pub struct Pipeline {
    rx: RateTracker,
    tx: RateTracker,
    last_captured_ms: Option<u64>,
    history: Arc<HistoryBuffer>,
}

impl Pipeline {
    pub fn new(history: HistoryBuffer) -> Self {
        Self {
            rx: RateTracker::new(),
            tx: RateTracker::new(),
            last_captured_ms: None,
            history: Arc::new(history),
        }
    }

    /// A pipeline whose history is pre-filled with placeholders ending at `now_ms`.
    pub fn seeded(capacity: usize, interval: Duration, now_ms: u64) -> Self {
        Self::new(HistoryBuffer::seeded(capacity, interval, now_ms))
    }

    /// Turn one snapshot into a data point and append it to the history.
    pub fn ingest(&mut self, snapshot: &Snapshot) -> HistoricalDataPoint {
        let _span = tracing::debug_span!(
            "pipeline.ingest",
            captured_at_ms = snapshot.captured_at_ms,
            processes = snapshot.processes.len()
        )
        .entered();

        let now = snapshot.captured_at_ms;
        let delta = self
            .last_captured_ms
            .map(|prev| elapsed_seconds(prev, now))
            .unwrap_or(0.0);
        self.last_captured_ms = Some(now);

        let point = HistoricalDataPoint {
            timestamp_ms: now,
            cpu_percent: snapshot.cpu.usage,
            per_core_percent: snapshot.cpu.per_core.clone(),
            memory_percent: percent(snapshot.memory.used, snapshot.memory.total),
            swap_percent: percent(snapshot.memory.used_swap, snapshot.memory.total_swap),
            disk_read_bytes_per_sec: per_second(snapshot.disk.read, delta),
            disk_write_bytes_per_sec: per_second(snapshot.disk.write, delta),
            network_rx_bytes_per_sec: self.rx.update(snapshot.network.rx_cumulative, now),
            network_tx_bytes_per_sec: self.tx.update(snapshot.network.tx_cumulative, now),
        };

        Arc::make_mut(&mut self.history).append(point.clone());
        point
    }

    pub fn history(&self) -> Arc<HistoryBuffer> {
        Arc::clone(&self.history)
    }
}

/// `part / total` as a percentage; 0 when the total is 0.
pub fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let value = part as f64 / total as f64 * 100.0;
    if value.is_finite() { value } else { 0.0 }
}
