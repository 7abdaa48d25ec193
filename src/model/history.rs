use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

/// Default capacity: 30 minutes at a 2 second cadence.
pub const DEFAULT_CAPACITY: usize = 900;
/// Default chart sub-window: the last 5 minutes at a 2 second cadence.
pub const DEFAULT_CHART_WINDOW: usize = 150;

/// Values derived from one sampling cycle. Never mutated once appended.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalDataPoint {
    pub timestamp_ms: u64,
    pub cpu_percent: f32,
    pub per_core_percent: Vec<f32>,
    pub memory_percent: f64,
    pub swap_percent: f64,
    pub disk_read_bytes_per_sec: f64,
    pub disk_write_bytes_per_sec: f64,
    pub network_rx_bytes_per_sec: f64,
    pub network_tx_bytes_per_sec: f64,
}

impl HistoricalDataPoint {
    /// A zero-valued point used to pre-fill the buffer.
    pub fn placeholder(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            ..Self::default()
        }
    }
}

/// Fixed-capacity ring buffer of data points, oldest first.
///
/// Points are immutable and reference counted, so cloning the buffer copies
/// pointers only. A clone taken for readers costs O(capacity) refcount bumps
/// and no per-core vectors.
#[derive(Clone, Debug)]
pub struct HistoryBuffer {
    points: VecDeque<Arc<HistoricalDataPoint>>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// A full buffer of placeholders spaced `interval` apart, the last one
    /// stamped one interval before `now_ms`.
    pub fn seeded(capacity: usize, interval: Duration, now_ms: u64) -> Self {
        let mut buffer = Self::new(capacity);
        let step = interval.as_millis() as u64;
        for i in (1..=buffer.capacity as u64).rev() {
            let ts = now_ms.saturating_sub(i.saturating_mul(step));
            buffer.append(HistoricalDataPoint::placeholder(ts));
        }
        buffer
    }

    pub fn append(&mut self, point: HistoricalDataPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(Arc::new(point));
    }

    /// The most recent `window` points (all of them for `None`), oldest first.
    pub fn snapshot(&self, window: Option<usize>) -> Vec<HistoricalDataPoint> {
        self.recent(window).cloned().collect()
    }

    pub fn recent(
        &self,
        window: Option<usize>,
    ) -> impl DoubleEndedIterator<Item = &HistoricalDataPoint> {
        let take = window.unwrap_or(self.points.len()).min(self.points.len());
        self.points
            .iter()
            .skip(self.points.len() - take)
            .map(Arc::as_ref)
    }

    pub fn latest(&self) -> Option<&HistoricalDataPoint> {
        self.points.back().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
